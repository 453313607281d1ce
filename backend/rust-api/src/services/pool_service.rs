use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Database, IndexModel};
use rand::seq::IndexedRandom;

use crate::metrics::track_db_operation;
use crate::models::{AskedQuestionRecord, QuestionCatalog, QuestionCatalogEntry, QuizLevel};
use crate::services::{EngineError, EngineResult};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

const ASKED_COLLECTION: &str = "asked_questions";

/// Result of drawing a question set for (user, team, level).
#[derive(Debug)]
pub enum DrawOutcome {
    /// Up to the requested batch of unseen questions, already marked asked.
    Drawn {
        questions: Vec<QuestionCatalogEntry>,
        total_available: usize,
    },
    /// Every catalog entry for the level has been served to this user.
    Exhausted {
        total_asked: usize,
        total_available: usize,
    },
}

/// Tracks which catalog entries each (user, team, level) has already seen,
/// against the immutable catalog injected at startup.
pub struct PoolService {
    mongo: Database,
    catalog: Arc<QuestionCatalog>,
}

impl PoolService {
    pub fn new(mongo: Database, catalog: Arc<QuestionCatalog>) -> Self {
        Self { mongo, catalog }
    }

    /// Unique index so re-marking an already-asked question is a no-op at the
    /// storage layer rather than a duplicate record.
    pub async fn ensure_indexes(mongo: &Database) -> Result<(), mongodb::error::Error> {
        let collection = mongo.collection::<AskedQuestionRecord>(ASKED_COLLECTION);
        let index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "team": 1, "level": 1, "question_id": 1 })
            .options(
                mongodb::options::IndexOptions::builder()
                    .unique(true)
                    .build(),
            )
            .build();
        collection.create_index(index).await?;
        Ok(())
    }

    /// Draws up to `n` unseen questions and synchronously records them as
    /// asked, so a concurrent draw for the same (user, team, level) cannot
    /// hand out the same questions. Ids that another in-flight draw claims
    /// between our read and our mark are dropped from the result and the
    /// draw retries against a fresh asked-set. Exhaustion does not mutate
    /// asked-state.
    pub async fn draw_unseen(
        &self,
        user_id: &str,
        team: &str,
        level: QuizLevel,
        n: usize,
    ) -> EngineResult<DrawOutcome> {
        let total_available = self.catalog.count_for(team, level);
        if total_available == 0 {
            return Err(EngineError::NoQuestionsForTeam {
                team: team.to_string(),
                level: Some(level),
            });
        }

        for _ in 0..MAX_DRAW_ATTEMPTS {
            let asked = self.asked_ids(user_id, team, level).await?;
            let unseen = self.catalog.unseen_for(team, level, &asked);

            if unseen.is_empty() {
                return Ok(DrawOutcome::Exhausted {
                    total_asked: total_available,
                    total_available,
                });
            }

            // ThreadRng is not Send; keep it out of scope before awaiting.
            let mut questions: Vec<QuestionCatalogEntry> = {
                let mut rng = rand::rng();
                unseen
                    .choose_multiple(&mut rng, n)
                    .map(|&entry| entry.clone())
                    .collect()
            };

            let ids: Vec<String> = questions.iter().map(|q| q.id.clone()).collect();
            let claimed = self.mark_asked(user_id, team, level, &ids).await?;
            drop_contested(&mut questions, &claimed);

            if questions.is_empty() {
                // A concurrent draw took the whole batch; re-read and retry.
                continue;
            }

            tracing::info!(
                user_id,
                team,
                level = %level,
                drawn = questions.len(),
                contested = claimed.len(),
                "Drew quiz questions"
            );

            return Ok(DrawOutcome::Drawn {
                questions,
                total_available,
            });
        }

        // Every attempt lost the race; the pool is effectively spoken for.
        Ok(DrawOutcome::Exhausted {
            total_asked: total_available,
            total_available,
        })
    }

    /// Records question ids as asked with one unordered batch insert.
    /// Returns the ids the unique index rejected as already asked, so the
    /// caller can tell which questions a concurrent draw claimed first.
    pub async fn mark_asked(
        &self,
        user_id: &str,
        team: &str,
        level: QuizLevel,
        question_ids: &[String],
    ) -> EngineResult<HashSet<String>> {
        if question_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let collection = self.mongo.collection::<AskedQuestionRecord>(ASKED_COLLECTION);
        let now = Utc::now();

        let records: Vec<AskedQuestionRecord> = question_ids
            .iter()
            .map(|question_id| AskedQuestionRecord {
                user_id: user_id.to_string(),
                team: team.to_string(),
                level,
                question_id: question_id.clone(),
                asked_at: now,
            })
            .collect();

        let result = track_db_operation("insert", ASKED_COLLECTION, async {
            collection.insert_many(&records).ordered(false).await
        })
        .await;

        match result {
            Ok(_) => Ok(HashSet::new()),
            Err(e) => match duplicate_ids_from_insert_error(&e, question_ids) {
                Some(claimed) => {
                    tracing::debug!(
                        user_id,
                        contested = claimed.len(),
                        "Questions already marked asked by a concurrent draw"
                    );
                    Ok(claimed)
                }
                None => Err(e.into()),
            },
        }
    }

    /// Clears asked-question records for every level of (user, team); the
    /// progress record is untouched. Returns how many records were deleted.
    pub async fn reset_pool(&self, user_id: &str, team: &str) -> EngineResult<u64> {
        let collection = self.mongo.collection::<AskedQuestionRecord>(ASKED_COLLECTION);
        let result = track_db_operation("delete", ASKED_COLLECTION, async {
            collection
                .delete_many(doc! { "user_id": user_id, "team": team })
                .await
        })
        .await?;

        tracing::info!(
            user_id,
            team,
            cleared = result.deleted_count,
            "Question pool reset"
        );
        Ok(result.deleted_count)
    }

    pub async fn asked_ids(
        &self,
        user_id: &str,
        team: &str,
        level: QuizLevel,
    ) -> EngineResult<HashSet<String>> {
        let collection = self.mongo.collection::<AskedQuestionRecord>(ASKED_COLLECTION);
        let filter = doc! {
            "user_id": user_id,
            "team": team,
            "level": level.as_str(),
        };

        let records: Vec<AskedQuestionRecord> =
            retry_async_with_config(RetryConfig::default(), || async {
                let cursor = collection.find(filter.clone()).await?;
                cursor.try_collect().await
            })
            .await?;

        Ok(records.into_iter().map(|r| r.question_id).collect())
    }
}

const MAX_DRAW_ATTEMPTS: usize = 3;

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Removes questions whose ids a concurrent draw marked first; only the
/// remainder may be handed to this session.
fn drop_contested(questions: &mut Vec<QuestionCatalogEntry>, claimed: &HashSet<String>) {
    if !claimed.is_empty() {
        questions.retain(|q| !claimed.contains(&q.id));
    }
}

/// If the batch insert failed only because some ids already exist, returns
/// those ids; any other failure (or a write-concern error) returns None so
/// the caller surfaces it.
fn duplicate_ids_from_insert_error(
    error: &mongodb::error::Error,
    question_ids: &[String],
) -> Option<HashSet<String>> {
    let mongodb::error::ErrorKind::InsertMany(ref failure) = *error.kind else {
        return None;
    };
    if failure.write_concern_error.is_some() {
        return None;
    }

    let write_errors = failure.write_errors.as_ref()?;
    let mut claimed = HashSet::new();
    for write_error in write_errors {
        if write_error.code != DUPLICATE_KEY_CODE {
            return None;
        }
        claimed.insert(question_ids.get(write_error.index)?.clone());
    }
    Some(claimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::tests::entry;

    // Axum handlers need Send futures; this fails to compile if the draw
    // ever holds a non-Send value (like a thread-local rng) across an await.
    #[allow(unused)]
    fn draw_future_is_send(pool: &PoolService) {
        fn assert_send<T: Send>(_: T) {}
        assert_send(pool.draw_unseen("u1", "Arsenal", QuizLevel::Easy, 5));
        assert_send(pool.reset_pool("u1", "Arsenal"));
    }

    #[test]
    fn contested_questions_are_dropped_from_the_draw() {
        let mut questions = vec![
            entry("ars-e1", "Arsenal", QuizLevel::Easy),
            entry("ars-e2", "Arsenal", QuizLevel::Easy),
            entry("ars-e3", "Arsenal", QuizLevel::Easy),
        ];
        let claimed: HashSet<String> = ["ars-e1", "ars-e3"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        drop_contested(&mut questions, &claimed);

        let ids: Vec<&str> = questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["ars-e2"]);

        // No contention: the draw is untouched.
        drop_contested(&mut questions, &HashSet::new());
        assert_eq!(questions.len(), 1);
    }
}

use chrono::Utc;
use mongodb::bson::doc;
use mongodb::Database;

use crate::metrics::track_db_operation;
use crate::models::{ProgressRecord, ProgressView, QuizLevel};
use crate::services::EngineResult;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

const PROGRESS_COLLECTION: &str = "quiz_progress";

/// Per (user, team) difficulty level and team-scoped points. Records are
/// created lazily on the first quiz start and never deleted; a pool reset
/// leaves them alone.
pub struct ProgressService {
    mongo: Database,
}

impl ProgressService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Reads progress. A missing record reports the no-progress default and
    /// persists nothing.
    pub async fn get_progress(&self, user_id: &str, team: &str) -> EngineResult<ProgressView> {
        let record = self.find(user_id, team).await?;
        Ok(match record {
            Some(record) => ProgressView {
                has_progress: true,
                current_level: record.current_level,
                team_points: record.team_points,
            },
            None => ProgressView::default(),
        })
    }

    /// Creates the progress record if this (user, team) has none yet.
    pub async fn ensure_progress(&self, user_id: &str, team: &str) -> EngineResult<()> {
        let collection = self.mongo.collection::<ProgressRecord>(PROGRESS_COLLECTION);
        let now = mongodb::bson::DateTime::from_millis(Utc::now().timestamp_millis());
        let id = ProgressRecord::doc_id(user_id, team);

        track_db_operation("upsert", PROGRESS_COLLECTION, async {
            collection
                .update_one(
                    doc! { "_id": &id },
                    doc! { "$setOnInsert": {
                        "user_id": user_id,
                        "team": team,
                        "current_level": QuizLevel::Easy.as_str(),
                        "team_points": 0i64,
                        "createdAt": now,
                        "updatedAt": now,
                    }},
                )
                .upsert(true)
                .await
        })
        .await?;

        Ok(())
    }

    /// Applies the user's continue/stop choice after completing a level and
    /// returns the level now in effect. Progression never moves backwards and
    /// Hard is terminal.
    pub async fn advance_level(
        &self,
        user_id: &str,
        team: &str,
        completed_level: QuizLevel,
        continue_to_next: bool,
    ) -> EngineResult<QuizLevel> {
        self.ensure_progress(user_id, team).await?;

        let current = self
            .find(user_id, team)
            .await?
            .map(|record| record.current_level)
            .unwrap_or(QuizLevel::Easy);

        let next = next_level(current, completed_level, continue_to_next);
        if next != current {
            let collection = self.mongo.collection::<ProgressRecord>(PROGRESS_COLLECTION);
            let now = mongodb::bson::DateTime::from_millis(Utc::now().timestamp_millis());
            track_db_operation("update", PROGRESS_COLLECTION, async {
                collection
                    .update_one(
                        doc! { "_id": ProgressRecord::doc_id(user_id, team) },
                        doc! { "$set": {
                            "current_level": next.as_str(),
                            "updatedAt": now,
                        }},
                    )
                    .await
            })
            .await?;
            tracing::info!(user_id, team, from = %current, to = %next, "Level advanced");
        }

        Ok(next)
    }

    /// Adds team-scoped points, creating the record on first call. A single
    /// upsert keeps the read-modify-write atomic.
    pub async fn add_team_points(
        &self,
        user_id: &str,
        team: &str,
        delta: i64,
    ) -> EngineResult<i64> {
        debug_assert!(delta >= 0, "team points never decrease");

        let collection = self.mongo.collection::<ProgressRecord>(PROGRESS_COLLECTION);
        let now = mongodb::bson::DateTime::from_millis(Utc::now().timestamp_millis());
        let id = ProgressRecord::doc_id(user_id, team);

        let updated = track_db_operation("upsert", PROGRESS_COLLECTION, async {
            collection
                .find_one_and_update(
                    doc! { "_id": &id },
                    doc! {
                        "$inc": { "team_points": delta },
                        "$set": { "updatedAt": now },
                        "$setOnInsert": {
                            "user_id": user_id,
                            "team": team,
                            "current_level": QuizLevel::Easy.as_str(),
                            "createdAt": now,
                        },
                    },
                )
                .upsert(true)
                .return_document(mongodb::options::ReturnDocument::After)
                .await
        })
        .await?;

        Ok(updated.map(|record| record.team_points).unwrap_or(delta))
    }

    async fn find(&self, user_id: &str, team: &str) -> EngineResult<Option<ProgressRecord>> {
        let collection = self.mongo.collection::<ProgressRecord>(PROGRESS_COLLECTION);
        let id = ProgressRecord::doc_id(user_id, team);

        let record = retry_async_with_config(RetryConfig::default(), || async {
            collection.find_one(doc! { "_id": &id }).await
        })
        .await?;

        Ok(record)
    }
}

/// Pure progression rule: declining to continue keeps the current level;
/// continuing moves one step up the ladder, and never below where the user
/// already is.
pub fn next_level(current: QuizLevel, completed: QuizLevel, continue_to_next: bool) -> QuizLevel {
    if !continue_to_next {
        return current;
    }
    match completed.next() {
        Some(next) => current.max(next),
        None => current.max(QuizLevel::Hard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continue_moves_one_step_up() {
        assert_eq!(
            next_level(QuizLevel::Easy, QuizLevel::Easy, true),
            QuizLevel::Medium
        );
        assert_eq!(
            next_level(QuizLevel::Medium, QuizLevel::Medium, true),
            QuizLevel::Hard
        );
    }

    #[test]
    fn hard_is_terminal_and_idempotent() {
        assert_eq!(
            next_level(QuizLevel::Hard, QuizLevel::Hard, true),
            QuizLevel::Hard
        );
        assert_eq!(
            next_level(QuizLevel::Hard, QuizLevel::Hard, false),
            QuizLevel::Hard
        );
    }

    #[test]
    fn declining_keeps_current_level() {
        assert_eq!(
            next_level(QuizLevel::Medium, QuizLevel::Medium, false),
            QuizLevel::Medium
        );
    }

    #[test]
    fn progression_never_moves_backwards() {
        // Replaying an Easy completion after reaching Hard must not demote.
        assert_eq!(
            next_level(QuizLevel::Hard, QuizLevel::Easy, true),
            QuizLevel::Hard
        );
        assert_eq!(
            next_level(QuizLevel::Medium, QuizLevel::Easy, true),
            QuizLevel::Medium
        );
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use mongodb::Database;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::config::QuizConfig;
use crate::metrics::{
    record_cache_hit, record_cache_miss, record_cache_operation, QUIZ_SESSIONS_TOTAL,
    QUIZ_SUBMISSIONS_TOTAL,
};
use crate::models::{QuestionCatalog, QuestionCatalogEntry, QuizLevel};
use crate::services::grader::{self, GradedQuestion};
use crate::services::pool_service::{DrawOutcome, PoolService};
use crate::services::progress_service::ProgressService;
use crate::services::reward_service::RewardService;
use crate::services::{EngineError, EngineResult};

/// Cached submission results live a day; long enough to absorb client
/// retries, short enough that storage stays bounded.
const SUBMISSION_CACHE_TTL_SECS: u64 = 86_400;

/// A question as the client sees it mid-session. The correct answer and
/// explanation stay server-side until grading.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
}

impl From<&QuestionCatalogEntry> for QuestionView {
    fn from(entry: &QuestionCatalogEntry) -> Self {
        Self {
            id: entry.id.clone(),
            question: entry.question.clone(),
            options: entry.options.clone(),
        }
    }
}

/// What a session start produced: questions to answer, or the signal that
/// this user has seen the whole pool for the level.
#[derive(Debug)]
pub enum QuizSession {
    Started {
        level: QuizLevel,
        questions: Vec<QuestionView>,
        total_available: usize,
    },
    Exhausted {
        level: QuizLevel,
        total_asked: usize,
        total_available: usize,
    },
}

/// A graded, settled submission. Serializable because the idempotency cache
/// stores the whole thing and replays it verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub level: QuizLevel,
    pub results: Vec<GradedQuestion>,
    pub correct_count: u32,
    pub total: u32,
    pub score: f64,
    pub points_earned: i64,
    pub points_per_question: i64,
    pub total_points: i64,
    pub team_points: i64,
    pub badges_earned: Vec<String>,
    pub next_level: QuizLevel,
}

#[derive(Debug, Deserialize)]
pub struct SubmissionRequest {
    pub user_id: String,
    pub team: String,
    pub level: QuizLevel,
    /// Ids of the questions served for this session, in presentation order.
    #[serde(rename = "questions")]
    pub question_ids: Vec<String>,
    /// Question index -> selected option text.
    pub answers: HashMap<usize, String>,
    /// Whether the user chose to move up a level after this quiz.
    #[serde(default)]
    pub continue_to_next: bool,
    /// Optional client token; submissions sharing it settle once.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Builds quiz sessions against the catalog and settles submissions.
pub struct QuizService {
    mongo: Database,
    redis: ConnectionManager,
    catalog: Arc<QuestionCatalog>,
    quiz_config: QuizConfig,
}

impl QuizService {
    pub fn new(
        mongo: Database,
        redis: ConnectionManager,
        catalog: Arc<QuestionCatalog>,
        quiz_config: QuizConfig,
    ) -> Self {
        Self {
            mongo,
            redis,
            catalog,
            quiz_config,
        }
    }

    /// Starts a session for (user, team): resolves the level from stored
    /// progress unless the caller pins one, draws a batch of unseen
    /// questions, and marks them asked in the same operation.
    pub async fn start_session(
        &self,
        user_id: &str,
        team: &str,
        requested_level: Option<QuizLevel>,
    ) -> EngineResult<QuizSession> {
        if !self.catalog.has_team(team) {
            return Err(EngineError::NoQuestionsForTeam {
                team: team.to_string(),
                level: None,
            });
        }

        let progress = ProgressService::new(self.mongo.clone());
        progress.ensure_progress(user_id, team).await?;
        let level = match requested_level {
            Some(level) => level,
            None => progress.get_progress(user_id, team).await?.current_level,
        };

        let pool = PoolService::new(self.mongo.clone(), Arc::clone(&self.catalog));
        let outcome = pool
            .draw_unseen(user_id, team, level, self.quiz_config.questions_per_session)
            .await?;

        Ok(match outcome {
            DrawOutcome::Drawn {
                questions,
                total_available,
            } => {
                QUIZ_SESSIONS_TOTAL
                    .with_label_values(&["started", level.as_str()])
                    .inc();
                QuizSession::Started {
                    level,
                    questions: questions.iter().map(QuestionView::from).collect(),
                    total_available,
                }
            }
            DrawOutcome::Exhausted {
                total_asked,
                total_available,
            } => {
                QUIZ_SESSIONS_TOTAL
                    .with_label_values(&["exhausted", level.as_str()])
                    .inc();
                tracing::info!(user_id, team, level = %level, "Question pool exhausted");
                QuizSession::Exhausted {
                    level,
                    total_asked,
                    total_available,
                }
            }
        })
    }

    /// Grades and settles a submission. The client sends question ids, never
    /// answers-with-correctness; the server resolves each id against the
    /// catalog so the grading inputs cannot be forged.
    ///
    /// Settlement is idempotent: a cached outcome under the same key is
    /// replayed without touching points, badges, or progression again.
    pub async fn submit(&self, request: &SubmissionRequest) -> EngineResult<SubmissionOutcome> {
        let questions: Vec<&QuestionCatalogEntry> = request
            .question_ids
            .iter()
            .map(|id| {
                self.catalog
                    .get(id)
                    .ok_or_else(|| EngineError::UnknownQuestion(id.clone()))
            })
            .collect::<EngineResult<_>>()?;

        let cache_key = self.cache_key(request);
        if let Some(cached) = self.cached_outcome(&cache_key).await {
            record_cache_hit();
            tracing::info!(
                user_id = request.user_id,
                team = request.team,
                "Replaying cached submission outcome"
            );
            return Ok(cached);
        }
        record_cache_miss();

        let grade = grader::grade(&questions, &request.answers)?;

        let rewards = RewardService::new(self.mongo.clone(), self.quiz_config.clone());
        let settlement = rewards
            .settle_quiz(&request.user_id, &request.team, request.level, &grade)
            .await?;

        let progress = ProgressService::new(self.mongo.clone());
        let next_level = progress
            .advance_level(
                &request.user_id,
                &request.team,
                request.level,
                request.continue_to_next,
            )
            .await?;

        QUIZ_SUBMISSIONS_TOTAL
            .with_label_values(&[request.level.as_str()])
            .inc();

        let outcome = SubmissionOutcome {
            level: request.level,
            score: grade.score_percentage(),
            results: grade.results,
            correct_count: grade.correct_count,
            total: grade.total,
            points_earned: settlement.points_earned,
            points_per_question: settlement.points_per_question,
            total_points: settlement.total_points,
            team_points: settlement.team_points,
            badges_earned: settlement.badges_earned,
            next_level,
        };

        self.cache_outcome(&cache_key, &outcome).await;

        Ok(outcome)
    }

    fn cache_key(&self, request: &SubmissionRequest) -> String {
        derive_cache_key(request)
    }

    async fn cached_outcome(&self, key: &str) -> Option<SubmissionOutcome> {
        let mut conn = self.redis.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => {
                record_cache_operation("get", true);
                serde_json::from_str(&raw).ok()
            }
            Ok(None) => {
                record_cache_operation("get", true);
                None
            }
            Err(e) => {
                // Cache unavailability degrades idempotency, not correctness
                // of a first submission; log and grade normally.
                record_cache_operation("get", false);
                tracing::warn!(error = %e, "Submission cache read failed");
                None
            }
        }
    }

    async fn cache_outcome(&self, key: &str, outcome: &SubmissionOutcome) {
        let Ok(raw) = serde_json::to_string(outcome) else {
            return;
        };
        let mut conn = self.redis.clone();
        match conn
            .set_ex::<_, _, ()>(key, raw, SUBMISSION_CACHE_TTL_SECS)
            .await
        {
            Ok(()) => record_cache_operation("setex", true),
            Err(e) => {
                record_cache_operation("setex", false);
                tracing::warn!(error = %e, "Submission cache write failed");
            }
        }
    }
}

/// Idempotency key: the client token when provided, otherwise the
/// submission's full identity (user, team, level, question set, answers).
/// The answers must participate: after a pool reset the same user can
/// legitimately redraw the same question set, and a fresh submission with
/// different answers is a new submission, not a retry.
fn derive_cache_key(request: &SubmissionRequest) -> String {
    match &request.idempotency_key {
        Some(token) => format!("quiz:submit:token:{}", token),
        None => {
            let mut ids = request.question_ids.clone();
            ids.sort();

            let mut answers: Vec<(usize, &str)> = request
                .answers
                .iter()
                .map(|(idx, answer)| (*idx, answer.as_str()))
                .collect();
            answers.sort_by_key(|(idx, _)| *idx);
            let answers: Vec<String> = answers
                .into_iter()
                .map(|(idx, answer)| format!("{}={}", idx, answer))
                .collect();

            format!(
                "quiz:submit:{}:{}:{}:{}:{}",
                request.user_id,
                request.team,
                request.level,
                ids.join(","),
                answers.join("|")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_view_hides_the_answer() {
        let entry = crate::models::catalog::tests::entry("q1", "Arsenal", QuizLevel::Easy);
        let view = QuestionView::from(&entry);
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["id"], "q1");
        assert_eq!(json["options"].as_array().unwrap().len(), 4);
        assert!(json.get("correctAnswerIndex").is_none());
        assert!(json.get("correct_answer_index").is_none());
        assert!(json.get("explanation").is_none());
    }

    fn request(ids: &[&str], token: Option<&str>) -> SubmissionRequest {
        SubmissionRequest {
            user_id: "u1".into(),
            team: "Arsenal".into(),
            level: QuizLevel::Easy,
            question_ids: ids.iter().map(|s| s.to_string()).collect(),
            answers: HashMap::new(),
            continue_to_next: false,
            idempotency_key: token.map(|s| s.to_string()),
        }
    }

    fn answers(pairs: &[(usize, &str)]) -> HashMap<usize, String> {
        pairs.iter().map(|(i, a)| (*i, a.to_string())).collect()
    }

    #[test]
    fn derived_cache_key_ignores_question_order() {
        let base = request(&["a", "b", "c"], None);
        let shuffled = request(&["c", "a", "b"], None);
        assert_eq!(derive_cache_key(&base), derive_cache_key(&shuffled));

        let other_user = SubmissionRequest {
            user_id: "u2".into(),
            ..request(&["a", "b", "c"], None)
        };
        assert_ne!(derive_cache_key(&base), derive_cache_key(&other_user));
    }

    #[test]
    fn derived_cache_key_distinguishes_answer_sets() {
        // After a pool reset a user can redraw the same question set; a new
        // submission with different answers must not replay the old outcome.
        let mut first = request(&["q1", "q2", "q3"], None);
        first.answers = answers(&[(0, "Alpha"), (1, "Bravo"), (2, "Charlie")]);
        let mut second = request(&["q1", "q2", "q3"], None);
        second.answers = answers(&[(0, "Delta"), (1, "Delta"), (2, "Delta")]);

        assert_ne!(derive_cache_key(&first), derive_cache_key(&second));

        // Identical answers derive identical keys, whatever the map's
        // iteration order.
        let mut replay = request(&["q1", "q2", "q3"], None);
        replay.answers = answers(&[(2, "Charlie"), (0, "Alpha"), (1, "Bravo")]);
        assert_eq!(derive_cache_key(&first), derive_cache_key(&replay));
    }

    #[test]
    fn client_token_wins_over_derived_key() {
        let tokened = request(&["a"], Some("retry-7"));
        assert_eq!(derive_cache_key(&tokened), "quiz:submit:token:retry-7");
        // Same token, different question set: still the same key.
        let retried = request(&["b"], Some("retry-7"));
        assert_eq!(derive_cache_key(&tokened), derive_cache_key(&retried));
    }

    #[test]
    fn submission_outcome_round_trips_through_cache_encoding() {
        let outcome = SubmissionOutcome {
            level: QuizLevel::Medium,
            results: vec![],
            correct_count: 4,
            total: 5,
            score: 80.0,
            points_earned: 80,
            points_per_question: 20,
            total_points: 180,
            team_points: 80,
            badges_earned: vec!["bronze".into()],
            next_level: QuizLevel::Hard,
        };
        let raw = serde_json::to_string(&outcome).unwrap();
        let replayed: SubmissionOutcome = serde_json::from_str(&raw).unwrap();
        assert_eq!(replayed.points_earned, 80);
        assert_eq!(replayed.next_level, QuizLevel::Hard);
        assert_eq!(replayed.badges_earned, vec!["bronze".to_string()]);
    }
}

use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::Database;
use serde::Serialize;
use uuid::Uuid;

use crate::config::QuizConfig;
use crate::metrics::{track_db_operation, BADGES_AWARDED_TOTAL, POINTS_AWARDED_TOTAL, PREDICTIONS_TOTAL};
use crate::models::{PredictionRecord, QuizAttempt, QuizLevel};
use crate::services::grader::GradeResult;
use crate::services::progress_service::ProgressService;
use crate::services::user_service::UserService;
use crate::services::{EngineError, EngineResult};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

const HISTORY_COLLECTION: &str = "quiz_history";
const PREDICTIONS_COLLECTION: &str = "predictions";

/// Declarative badge ladder: ordered by threshold, evaluated against the
/// user's lifetime points at every settlement. Adding a badge is a data
/// change here, not a code change.
#[derive(Debug, Clone, Copy)]
pub struct BadgeRule {
    pub id: &'static str,
    pub min_points: i64,
}

pub const BADGE_LADDER: &[BadgeRule] = &[
    BadgeRule { id: "bronze", min_points: 100 },
    BadgeRule { id: "silver", min_points: 250 },
    BadgeRule { id: "gold", min_points: 500 },
    BadgeRule { id: "platinum", min_points: 1000 },
    BadgeRule { id: "diamond", min_points: 2000 },
    BadgeRule { id: "crown", min_points: 3500 },
    BadgeRule { id: "ace", min_points: 5000 },
    BadgeRule { id: "conqueror", min_points: 7500 },
];

/// Badges implied by a points total, in ladder order.
pub fn badges_for_points(total_points: i64) -> Vec<&'static str> {
    BADGE_LADDER
        .iter()
        .filter(|rule| total_points >= rule.min_points)
        .map(|rule| rule.id)
        .collect()
}

/// What a quiz settlement produced.
#[derive(Debug)]
pub struct QuizSettlement {
    pub points_earned: i64,
    pub points_per_question: i64,
    pub total_points: i64,
    pub team_points: i64,
    pub badges_earned: Vec<String>,
}

/// Converts graded results into persisted point/badge changes and settles
/// predictions when the oracle reports an outcome.
pub struct RewardService {
    mongo: Database,
    quiz_config: QuizConfig,
}

impl RewardService {
    pub fn new(mongo: Database, quiz_config: QuizConfig) -> Self {
        Self { mongo, quiz_config }
    }

    /// Settles a graded quiz: credits the lifetime and team-scoped totals,
    /// appends the attempt to history, and recomputes badges.
    pub async fn settle_quiz(
        &self,
        user_id: &str,
        team: &str,
        level: QuizLevel,
        grade: &GradeResult,
    ) -> EngineResult<QuizSettlement> {
        let points_per_question = self.quiz_config.points_per_question(level);
        let points_earned = i64::from(grade.correct_count) * points_per_question;

        let users = UserService::new(self.mongo.clone());
        let progress = ProgressService::new(self.mongo.clone());

        let total_points = users.add_points(user_id, points_earned).await?;
        let team_points = progress.add_team_points(user_id, team, points_earned).await?;

        self.record_attempt(user_id, team, level, grade, points_earned)
            .await?;

        let badges_earned = self.recompute_badges(user_id).await?;

        POINTS_AWARDED_TOTAL
            .with_label_values(&["quiz"])
            .inc_by(points_earned.max(0) as u64);

        tracing::info!(
            user_id,
            team,
            level = %level,
            correct = grade.correct_count,
            total = grade.total,
            points_earned,
            total_points,
            "Quiz settled"
        );

        Ok(QuizSettlement {
            points_earned,
            points_per_question,
            total_points,
            team_points,
            badges_earned,
        })
    }

    /// Evaluates the badge ladder against the user's current total and
    /// persists any newly crossed thresholds. The stored set is append-only:
    /// badges already present stay even if a future metric would not imply
    /// them. Returns the badges added by this call.
    pub async fn recompute_badges(&self, user_id: &str) -> EngineResult<Vec<String>> {
        let users = UserService::new(self.mongo.clone());
        let user = users
            .get_user(user_id)
            .await?
            .ok_or_else(|| EngineError::UnknownUser(user_id.to_string()))?;

        let implied = badges_for_points(user.total_points);
        let new_badges: Vec<String> = implied
            .iter()
            .filter(|badge| !user.badges.iter().any(|b| b == *badge))
            .map(|badge| badge.to_string())
            .collect();

        if !new_badges.is_empty() {
            users.add_badges(user_id, &new_badges).await?;
            for badge in &new_badges {
                BADGES_AWARDED_TOTAL.with_label_values(&[badge]).inc();
                tracing::info!(user_id, badge, "Badge earned");
            }
        }

        Ok(new_badges)
    }

    /// Stores a pending prediction for later settlement.
    pub async fn submit_prediction(
        &self,
        user_id: &str,
        sport: &str,
        team1: &str,
        team2: &str,
        predicted_winner: &str,
    ) -> EngineResult<PredictionRecord> {
        let record = PredictionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            sport: sport.to_string(),
            team1: team1.to_string(),
            team2: team2.to_string(),
            predicted_winner: predicted_winner.to_string(),
            actual_outcome: None,
            points_earned: 0,
            created_at: Utc::now(),
        };

        let collection = self
            .mongo
            .collection::<PredictionRecord>(PREDICTIONS_COLLECTION);
        track_db_operation("insert", PREDICTIONS_COLLECTION, async {
            collection.insert_one(&record).await
        })
        .await?;

        PREDICTIONS_TOTAL.with_label_values(&["submitted"]).inc();
        tracing::info!(user_id, team1, team2, predicted_winner, "Prediction stored");

        Ok(record)
    }

    /// Settles a prediction exactly once against the oracle-supplied actual
    /// outcome. The conditional update on `actual_outcome == null` is what
    /// makes double settlement impossible, even under concurrent calls.
    pub async fn settle_prediction(
        &self,
        prediction_id: &str,
        actual_outcome: &str,
    ) -> EngineResult<PredictionRecord> {
        let collection = self
            .mongo
            .collection::<PredictionRecord>(PREDICTIONS_COLLECTION);

        let pending = collection
            .find_one(doc! { "_id": prediction_id })
            .await?
            .ok_or_else(|| EngineError::UnknownPrediction(prediction_id.to_string()))?;

        let is_correct = pending.predicted_winner == actual_outcome;
        let points_earned = if is_correct {
            self.quiz_config.prediction_points_correct
        } else {
            0
        };

        let updated = track_db_operation("update", PREDICTIONS_COLLECTION, async {
            collection
                .find_one_and_update(
                    doc! { "_id": prediction_id, "actual_outcome": null },
                    doc! { "$set": {
                        "actual_outcome": actual_outcome,
                        "points_earned": points_earned,
                    }},
                )
                .return_document(mongodb::options::ReturnDocument::After)
                .await
        })
        .await?;

        let Some(settled) = updated else {
            return Err(EngineError::PredictionAlreadySettled(
                prediction_id.to_string(),
            ));
        };

        if points_earned > 0 {
            let users = UserService::new(self.mongo.clone());
            users.add_points(&settled.user_id, points_earned).await?;
            self.recompute_badges(&settled.user_id).await?;
            POINTS_AWARDED_TOTAL
                .with_label_values(&["prediction"])
                .inc_by(points_earned as u64);
        }

        PREDICTIONS_TOTAL.with_label_values(&["settled"]).inc();
        tracing::info!(
            prediction_id,
            user_id = settled.user_id,
            is_correct,
            points_earned,
            "Prediction settled"
        );

        Ok(settled)
    }

    /// A user's predictions, newest first.
    pub async fn prediction_history(&self, user_id: &str) -> EngineResult<Vec<PredictionRecord>> {
        let collection = self
            .mongo
            .collection::<PredictionRecord>(PREDICTIONS_COLLECTION);

        let records = retry_async_with_config(RetryConfig::default(), || async {
            let cursor = collection
                .find(doc! { "user_id": user_id })
                .sort(doc! { "createdAt": -1 })
                .await?;
            cursor.try_collect().await
        })
        .await?;

        Ok(records)
    }

    /// Aggregate accuracy over a user's settled predictions.
    pub async fn prediction_stats(&self, user_id: &str) -> EngineResult<PredictionStats> {
        let history = self.prediction_history(user_id).await?;
        Ok(PredictionStats::from_records(&history))
    }

    async fn record_attempt(
        &self,
        user_id: &str,
        team: &str,
        level: QuizLevel,
        grade: &GradeResult,
        points_earned: i64,
    ) -> EngineResult<()> {
        let attempt = QuizAttempt {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            team: team.to_string(),
            level,
            correct: grade.correct_count,
            total: grade.total,
            score: grade.score_percentage(),
            points_earned,
            created_at: Utc::now(),
        };

        let collection = self.mongo.collection::<QuizAttempt>(HISTORY_COLLECTION);
        track_db_operation("insert", HISTORY_COLLECTION, async {
            collection.insert_one(&attempt).await
        })
        .await?;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize)]
pub struct PredictionStats {
    pub total: usize,
    pub pending: usize,
    pub settled: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub points_earned: i64,
}

impl PredictionStats {
    pub fn from_records(records: &[PredictionRecord]) -> Self {
        let total = records.len();
        let settled = records.iter().filter(|r| r.is_settled()).count();
        let correct = records
            .iter()
            .filter(|r| r.is_correct() == Some(true))
            .count();
        let points_earned = records.iter().map(|r| r.points_earned).sum();
        let accuracy = if settled == 0 {
            0.0
        } else {
            correct as f64 / settled as f64 * 100.0
        };

        Self {
            total,
            pending: total - settled,
            settled,
            correct,
            accuracy,
            points_earned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ladder_is_ordered_by_threshold() {
        for window in BADGE_LADDER.windows(2) {
            assert!(window[0].min_points < window[1].min_points);
        }
        let ids: HashSet<&str> = BADGE_LADDER.iter().map(|rule| rule.id).collect();
        assert_eq!(ids.len(), BADGE_LADDER.len(), "badge ids must be unique");
    }

    #[test]
    fn badges_accumulate_with_points() {
        assert!(badges_for_points(0).is_empty());
        assert!(badges_for_points(99).is_empty());
        assert_eq!(badges_for_points(100), vec!["bronze"]);
        assert_eq!(badges_for_points(600), vec!["bronze", "silver", "gold"]);
        assert_eq!(badges_for_points(7500).len(), BADGE_LADDER.len());
    }

    #[test]
    fn prediction_stats_cover_pending_and_settled() {
        fn record(predicted: &str, actual: Option<&str>, points: i64) -> PredictionRecord {
            PredictionRecord {
                id: Uuid::new_v4().to_string(),
                user_id: "u1".into(),
                sport: "soccer".into(),
                team1: "Arsenal".into(),
                team2: "Chelsea".into(),
                predicted_winner: predicted.into(),
                actual_outcome: actual.map(|s| s.to_string()),
                points_earned: points,
                created_at: Utc::now(),
            }
        }

        let stats = PredictionStats::from_records(&[
            record("Arsenal", Some("Arsenal"), 25),
            record("Arsenal", Some("Chelsea"), 0),
            record("Chelsea", None, 0),
        ]);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.settled, 2);
        assert_eq!(stats.correct, 1);
        assert_eq!(stats.accuracy, 50.0);
        assert_eq!(stats.points_earned, 25);

        let empty = PredictionStats::from_records(&[]);
        assert_eq!(empty.accuracy, 0.0);
    }

    #[test]
    fn implied_badges_grow_monotonically_with_points() {
        // More points never imply fewer badges, which combined with the
        // append-only store keeps earned badges permanent.
        let mut previous = 0;
        for points in [0, 50, 100, 250, 1000, 2000, 5000, 7500, 100_000] {
            let count = badges_for_points(points).len();
            assert!(count >= previous);
            previous = count;
        }
    }
}

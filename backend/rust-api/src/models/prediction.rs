use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bson_datetime_as_chrono;

/// A match-outcome prediction, "predictions" collection. Stored pending and
/// settled exactly once when the external oracle reports the actual outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub sport: String,
    pub team1: String,
    pub team2: String,
    pub predicted_winner: String,
    /// None while the outcome is pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_outcome: Option<String>,
    #[serde(default)]
    pub points_earned: i64,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn is_settled(&self) -> bool {
        self.actual_outcome.is_some()
    }

    pub fn is_correct(&self) -> Option<bool> {
        self.actual_outcome
            .as_deref()
            .map(|outcome| outcome == self.predicted_winner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(predicted: &str, actual: Option<&str>) -> PredictionRecord {
        PredictionRecord {
            id: "p1".into(),
            user_id: "u1".into(),
            sport: "soccer".into(),
            team1: "Arsenal".into(),
            team2: "Chelsea".into(),
            predicted_winner: predicted.into(),
            actual_outcome: actual.map(|s| s.to_string()),
            points_earned: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pending_prediction_has_no_correctness() {
        let pending = record("Arsenal", None);
        assert!(!pending.is_settled());
        assert_eq!(pending.is_correct(), None);
    }

    #[test]
    fn correctness_means_predicted_winner_matches_outcome() {
        assert_eq!(record("Arsenal", Some("Arsenal")).is_correct(), Some(true));
        assert_eq!(record("Arsenal", Some("Chelsea")).is_correct(), Some(false));
        assert_eq!(record("Draw", Some("Draw")).is_correct(), Some(true));
    }
}

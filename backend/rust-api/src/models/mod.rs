use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod catalog;
pub mod prediction;

pub use catalog::{QuestionCatalog, QuestionCatalogEntry, TeamAvailability};
pub use prediction::PredictionRecord;

/// Quiz difficulty. Ordering matters: progression is monotonic
/// Easy -> Medium -> Hard, with Hard terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum QuizLevel {
    Easy,
    Medium,
    Hard,
}

// Deserialize through FromStr so every surface that accepts a level (path
// segments, request bodies, stored records) is equally case-insensitive.
impl<'de> Deserialize<'de> for QuizLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl QuizLevel {
    pub const ALL: [QuizLevel; 3] = [QuizLevel::Easy, QuizLevel::Medium, QuizLevel::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuizLevel::Easy => "Easy",
            QuizLevel::Medium => "Medium",
            QuizLevel::Hard => "Hard",
        }
    }

    /// The level that follows this one, or None at the top of the ladder.
    pub fn next(&self) -> Option<QuizLevel> {
        match self {
            QuizLevel::Easy => Some(QuizLevel::Medium),
            QuizLevel::Medium => Some(QuizLevel::Hard),
            QuizLevel::Hard => None,
        }
    }
}

impl fmt::Display for QuizLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuizLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(QuizLevel::Easy),
            "medium" => Ok(QuizLevel::Medium),
            "hard" => Ok(QuizLevel::Hard),
            other => Err(format!("Level must be Easy, Medium, or Hard (got '{other}')")),
        }
    }
}

/// User profile stored in the MongoDB "users" collection. The id is the
/// client-supplied opaque identifier, not an ObjectId.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub favorite_team: String,
    #[serde(default)]
    pub total_points: i64,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastInteractionAt", with = "bson_datetime_as_chrono")]
    pub last_interaction_at: DateTime<Utc>,
}

/// Per (user, team) progression state, "quiz_progress" collection.
/// The document id is "user_id:team" so each pair has exactly one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub team: String,
    pub current_level: QuizLevel,
    #[serde(default)]
    pub team_points: i64,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn doc_id(user_id: &str, team: &str) -> String {
        format!("{}:{}", user_id, team)
    }
}

/// What a progress read reports. Absent records resolve to the no-progress
/// default without persisting anything.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    pub has_progress: bool,
    pub current_level: QuizLevel,
    pub team_points: i64,
}

impl Default for ProgressView {
    fn default() -> Self {
        Self {
            has_progress: false,
            current_level: QuizLevel::Easy,
            team_points: 0,
        }
    }
}

/// One served question, "asked_questions" collection. A catalog entry may be
/// drawn again for the same (user, team, level) only after an explicit pool
/// reset deletes these records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskedQuestionRecord {
    pub user_id: String,
    pub team: String,
    pub level: QuizLevel,
    pub question_id: String,
    #[serde(rename = "askedAt", with = "bson_datetime_as_chrono")]
    pub asked_at: DateTime<Utc>,
}

/// Settled quiz submission, "quiz_history" collection. Feeds user stats and
/// the accuracy history behind badge evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub team: String,
    pub level: QuizLevel,
    pub correct: u32,
    pub total: u32,
    pub score: f64,
    pub points_earned: i64,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

// Serde converters for chrono::DateTime <-> mongodb::bson::DateTime
pub(crate) mod bson_datetime_as_chrono {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bson_dt = bson::DateTime::from_millis(date.timestamp_millis());
        bson_dt.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bson_dt = bson::DateTime::deserialize(deserializer)?;
        DateTime::from_timestamp_millis(bson_dt.timestamp_millis())
            .ok_or_else(|| serde::de::Error::custom("bson datetime out of chrono range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_matches_progression() {
        assert!(QuizLevel::Easy < QuizLevel::Medium);
        assert!(QuizLevel::Medium < QuizLevel::Hard);
    }

    #[test]
    fn level_ladder_is_terminal_at_hard() {
        assert_eq!(QuizLevel::Easy.next(), Some(QuizLevel::Medium));
        assert_eq!(QuizLevel::Medium.next(), Some(QuizLevel::Hard));
        assert_eq!(QuizLevel::Hard.next(), None);
    }

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!("easy".parse::<QuizLevel>().unwrap(), QuizLevel::Easy);
        assert_eq!("MEDIUM".parse::<QuizLevel>().unwrap(), QuizLevel::Medium);
        assert_eq!(" Hard ".parse::<QuizLevel>().unwrap(), QuizLevel::Hard);
        assert!("legendary".parse::<QuizLevel>().is_err());
    }

    #[test]
    fn level_serializes_capitalized() {
        assert_eq!(
            serde_json::to_string(&QuizLevel::Medium).unwrap(),
            "\"Medium\""
        );
    }

    #[test]
    fn level_deserializes_case_insensitively() {
        // Body fields and path segments accept the same lenient spelling.
        assert_eq!(
            serde_json::from_str::<QuizLevel>("\"easy\"").unwrap(),
            QuizLevel::Easy
        );
        assert_eq!(
            serde_json::from_str::<QuizLevel>("\" HARD \"").unwrap(),
            QuizLevel::Hard
        );
        assert!(serde_json::from_str::<QuizLevel>("\"legendary\"").is_err());
    }

    #[test]
    fn progress_view_defaults_to_easy_with_no_points() {
        let view = ProgressView::default();
        assert!(!view.has_progress);
        assert_eq!(view.current_level, QuizLevel::Easy);
        assert_eq!(view.team_points, 0);
    }
}

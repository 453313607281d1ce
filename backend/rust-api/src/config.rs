use serde::Deserialize;
use std::env;

use crate::models::QuizLevel;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub questions_path: String,
    pub quiz: QuizConfig,
}

/// Scoring constants. Kept out of the engine algorithms so tuning the reward
/// economy is a config change, not a code change.
#[derive(Debug, Clone, Deserialize)]
pub struct QuizConfig {
    /// Questions drawn per session (a draw may return fewer when the unseen
    /// pool is smaller).
    pub questions_per_session: usize,
    pub points_easy: i64,
    pub points_medium: i64,
    pub points_hard: i64,
    /// Points for a prediction whose predicted winner matches the oracle
    /// outcome.
    pub prediction_points_correct: i64,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            questions_per_session: 5,
            points_easy: 10,
            points_medium: 20,
            points_hard: 30,
            prediction_points_correct: 25,
        }
    }
}

impl QuizConfig {
    pub fn points_per_question(&self, level: QuizLevel) -> i64 {
        match level {
            QuizLevel::Easy => self.points_easy,
            QuizLevel::Medium => self.points_medium,
            QuizLevel::Hard => self.points_hard,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            .add_source(
                config::File::with_name(&format!("config/{}", env)).required(false), // Allow missing config file, fallback to ENV
            )
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017/fanpulse".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| {
                let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                format!("redis://{}:{}/0", host, port)
            });

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "fanpulse".to_string());

        let questions_path = settings
            .get_string("catalog.questions_path")
            .or_else(|_| env::var("QUESTIONS_PATH"))
            .unwrap_or_else(|_| "data/questions.json".to_string());

        let defaults = QuizConfig::default();
        let quiz = QuizConfig {
            questions_per_session: settings
                .get_int("quiz.questions_per_session")
                .map(|v| v.max(1) as usize)
                .unwrap_or(defaults.questions_per_session),
            points_easy: settings
                .get_int("quiz.points_easy")
                .unwrap_or(defaults.points_easy),
            points_medium: settings
                .get_int("quiz.points_medium")
                .unwrap_or(defaults.points_medium),
            points_hard: settings
                .get_int("quiz.points_hard")
                .unwrap_or(defaults.points_hard),
            prediction_points_correct: settings
                .get_int("quiz.prediction_points_correct")
                .unwrap_or(defaults.prediction_points_correct),
        };

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            questions_path,
            quiz,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_scoring_scales_with_level() {
        let quiz = QuizConfig::default();
        assert!(
            quiz.points_per_question(QuizLevel::Easy) < quiz.points_per_question(QuizLevel::Medium)
        );
        assert!(
            quiz.points_per_question(QuizLevel::Medium) < quiz.points_per_question(QuizLevel::Hard)
        );
        assert_eq!(quiz.points_per_question(QuizLevel::Easy), 10);
        assert_eq!(quiz.questions_per_session, 5);
    }

    #[test]
    #[serial]
    fn load_picks_up_env_overrides() {
        std::env::set_var("SKIP_ROOT_ENV", "1");
        std::env::set_var("MONGO_DATABASE", "fanpulse_test");
        std::env::set_var("QUESTIONS_PATH", "fixtures/questions.json");

        let config = Config::load().expect("config should load without files");
        assert_eq!(config.mongo_database, "fanpulse_test");
        assert_eq!(config.questions_path, "fixtures/questions.json");

        std::env::remove_var("SKIP_ROOT_ENV");
        std::env::remove_var("MONGO_DATABASE");
        std::env::remove_var("QUESTIONS_PATH");
    }
}

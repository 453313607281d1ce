use std::sync::Arc;

use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

use crate::config::Config;
use crate::models::{QuestionCatalog, QuizLevel};

pub mod grader;
pub mod leaderboard_service;
pub mod pool_service;
pub mod progress_service;
pub mod quiz_service;
pub mod reward_service;
pub mod user_service;

/// Engine failure classes, recoverable and fatal. Pool exhaustion is
/// intentionally absent: it is a status the session builder reports, not an
/// error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no questions available for team '{team}'")]
    NoQuestionsForTeam { team: String, level: Option<QuizLevel> },
    #[error("submission answered {answered} of {total} questions")]
    IncompleteSubmission { answered: usize, total: usize },
    #[error("unknown question id '{0}'")]
    UnknownQuestion(String),
    #[error("user '{0}' not found")]
    UnknownUser(String),
    #[error("user '{0}' already exists")]
    UserAlreadyExists(String),
    #[error("prediction '{0}' not found")]
    UnknownPrediction(String),
    #[error("prediction '{0}' is already settled")]
    PredictionAlreadySettled(String),
    #[error("storage error: {0}")]
    Storage(#[from] mongodb::error::Error),
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub redis: ConnectionManager,
    pub catalog: Arc<QuestionCatalog>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
        catalog: QuestionCatalog,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!(
            catalog_version = catalog.version(),
            catalog_entries = catalog.len(),
            "Redis connection established, question catalog loaded"
        );

        Ok(Self {
            config,
            mongo,
            redis,
            catalog: Arc::new(catalog),
        })
    }
}

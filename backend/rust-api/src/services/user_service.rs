use chrono::Utc;
use mongodb::bson::doc;
use mongodb::Database;

use crate::metrics::track_db_operation;
use crate::models::User;
use crate::services::{EngineError, EngineResult};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

const USERS_COLLECTION: &str = "users";
const HISTORY_COLLECTION: &str = "quiz_history";
const PREDICTIONS_COLLECTION: &str = "predictions";

/// Profile plus derived activity counts, as the profile endpoint reports it.
#[derive(Debug, serde::Serialize)]
pub struct UserStats {
    pub user_id: String,
    pub username: String,
    pub favorite_team: String,
    pub total_points: i64,
    pub badges: Vec<String>,
    pub quiz_count: u64,
    pub prediction_count: u64,
    pub created_at: chrono::DateTime<Utc>,
}

pub struct UserService {
    mongo: Database,
}

impl UserService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Creates a profile for an opaque client-supplied id. A second create
    /// for the same id is rejected, not overwritten.
    pub async fn create_user(
        &self,
        user_id: &str,
        username: &str,
        favorite_team: &str,
    ) -> EngineResult<User> {
        let collection = self.mongo.collection::<User>(USERS_COLLECTION);
        let now = Utc::now();
        let user = User {
            id: user_id.to_string(),
            username: username.to_string(),
            favorite_team: favorite_team.to_string(),
            total_points: 0,
            badges: Vec::new(),
            created_at: now,
            last_interaction_at: now,
        };

        let result = track_db_operation("insert", USERS_COLLECTION, async {
            collection.insert_one(&user).await
        })
        .await;

        match result {
            Ok(_) => {
                tracing::info!(user_id, username, "User created");
                Ok(user)
            }
            Err(e) if is_duplicate_key_error(&e) => {
                Err(EngineError::UserAlreadyExists(user_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_user(&self, user_id: &str) -> EngineResult<Option<User>> {
        let collection = self.mongo.collection::<User>(USERS_COLLECTION);
        let user = retry_async_with_config(RetryConfig::default(), || async {
            collection.find_one(doc! { "_id": user_id }).await
        })
        .await?;
        Ok(user)
    }

    /// Profile plus quiz/prediction counts derived from the history
    /// collections.
    pub async fn get_user_stats(&self, user_id: &str) -> EngineResult<UserStats> {
        let user = self
            .get_user(user_id)
            .await?
            .ok_or_else(|| EngineError::UnknownUser(user_id.to_string()))?;

        let quiz_count = self
            .mongo
            .collection::<mongodb::bson::Document>(HISTORY_COLLECTION)
            .count_documents(doc! { "user_id": user_id })
            .await?;
        let prediction_count = self
            .mongo
            .collection::<mongodb::bson::Document>(PREDICTIONS_COLLECTION)
            .count_documents(doc! { "user_id": user_id })
            .await?;

        Ok(UserStats {
            user_id: user.id,
            username: user.username,
            favorite_team: user.favorite_team,
            total_points: user.total_points,
            badges: user.badges,
            quiz_count,
            prediction_count,
            created_at: user.created_at,
        })
    }

    /// Credits points to the user's lifetime total and returns the new
    /// total. Points are never decremented; mutating an unknown user is an
    /// error (reads are not).
    pub async fn add_points(&self, user_id: &str, delta: i64) -> EngineResult<i64> {
        debug_assert!(delta >= 0, "total points never decrease");

        let collection = self.mongo.collection::<User>(USERS_COLLECTION);
        let now = mongodb::bson::DateTime::from_millis(Utc::now().timestamp_millis());

        let updated = track_db_operation("update", USERS_COLLECTION, async {
            collection
                .find_one_and_update(
                    doc! { "_id": user_id },
                    doc! {
                        "$inc": { "total_points": delta },
                        "$set": { "lastInteractionAt": now },
                    },
                )
                .return_document(mongodb::options::ReturnDocument::After)
                .await
        })
        .await?;

        updated
            .map(|user| user.total_points)
            .ok_or_else(|| EngineError::UnknownUser(user_id.to_string()))
    }

    /// Adds badges to the user's set. `$addToSet` keeps the set append-only
    /// and the call idempotent.
    pub async fn add_badges(&self, user_id: &str, badges: &[String]) -> EngineResult<()> {
        if badges.is_empty() {
            return Ok(());
        }

        let collection = self.mongo.collection::<User>(USERS_COLLECTION);
        let result = track_db_operation("update", USERS_COLLECTION, async {
            collection
                .update_one(
                    doc! { "_id": user_id },
                    doc! { "$addToSet": { "badges": { "$each": badges.to_vec() } } },
                )
                .await
        })
        .await?;

        if result.matched_count == 0 {
            return Err(EngineError::UnknownUser(user_id.to_string()));
        }
        Ok(())
    }
}

fn is_duplicate_key_error(error: &mongodb::error::Error) -> bool {
    if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we)) =
        *error.kind
    {
        return we.code == 11000;
    }
    false
}

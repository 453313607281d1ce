use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::Database;
use serde::Serialize;

use crate::metrics::track_db_operation;
use crate::models::User;
use crate::services::EngineResult;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

const USERS_COLLECTION: &str = "users";

pub const DEFAULT_LEADERBOARD_SIZE: usize = 10;
pub const MAX_LEADERBOARD_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub username: String,
    pub favorite_team: String,
    pub total_points: i64,
    pub badge_count: usize,
}

#[derive(Debug, Serialize)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
    pub total_users: u64,
}

/// Global ranking over lifetime points. Read-only; ranks are computed at
/// query time from the users collection.
pub struct LeaderboardService {
    mongo: Database,
}

impl LeaderboardService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Top `limit` users by lifetime points, descending. Ties break by who
    /// registered first, which keeps ranks stable between reads.
    pub async fn top(&self, limit: usize) -> EngineResult<Leaderboard> {
        let limit = limit.clamp(1, MAX_LEADERBOARD_SIZE);
        let collection = self.mongo.collection::<User>(USERS_COLLECTION);

        let users: Vec<User> = retry_async_with_config(RetryConfig::default(), || async {
            let cursor = collection
                .find(doc! {})
                .sort(doc! { "total_points": -1, "createdAt": 1 })
                .limit(limit as i64)
                .await?;
            cursor.try_collect().await
        })
        .await?;

        let total_users = track_db_operation("count", USERS_COLLECTION, async {
            collection.count_documents(doc! {}).await
        })
        .await?;

        let entries = users
            .into_iter()
            .enumerate()
            .map(|(idx, user)| LeaderboardEntry {
                rank: idx + 1,
                user_id: user.id,
                username: user.username,
                favorite_team: user.favorite_team,
                total_points: user.total_points,
                badge_count: user.badges.len(),
            })
            .collect();

        Ok(Leaderboard {
            entries,
            total_users,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_with_rank_first_fields() {
        let entry = LeaderboardEntry {
            rank: 1,
            user_id: "u1".into(),
            username: "gooner".into(),
            favorite_team: "Arsenal".into(),
            total_points: 420,
            badge_count: 3,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["rank"], 1);
        assert_eq!(json["total_points"], 420);
        assert_eq!(json["badge_count"], 3);
    }
}

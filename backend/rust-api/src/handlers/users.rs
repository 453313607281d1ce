use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::extractors::AppJson;
use crate::handlers::ApiError;
use crate::services::leaderboard_service::{LeaderboardService, DEFAULT_LEADERBOARD_SIZE};
use crate::services::user_service::UserService;
use crate::services::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserPayload {
    #[validate(length(min = 1, max = 128, message = "user_id must be 1-128 characters"))]
    pub user_id: String,
    #[validate(length(min = 1, max = 64, message = "username must be 1-64 characters"))]
    pub username: String,
    #[validate(length(min = 1, max = 64, message = "favorite_team must be 1-64 characters"))]
    pub favorite_team: String,
}

/// POST /api/v1/users
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<CreateUserPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let user = UserService::new(state.mongo.clone())
        .create_user(&payload.user_id, &payload.username, &payload.favorite_team)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user_id": user.id,
            "username": user.username,
            "favorite_team": user.favorite_team,
            "total_points": user.total_points,
            "badges": user.badges,
        })),
    ))
}

/// GET /api/v1/users/{user_id}
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = UserService::new(state.mongo.clone())
        .get_user_stats(&user_id)
        .await?;

    let value = serde_json::to_value(stats).map_err(crate::services::EngineError::from)?;
    Ok(Json(value))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    pub limit: Option<usize>,
}

/// GET /api/v1/leaderboard?limit=N
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LEADERBOARD_SIZE);
    let board = LeaderboardService::new(state.mongo.clone()).top(limit).await?;

    Ok(Json(json!({
        "leaderboard": board.entries,
        "total_users": board.total_users,
    })))
}

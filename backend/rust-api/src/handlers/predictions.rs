use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::extractors::AppJson;
use crate::handlers::ApiError;
use crate::services::reward_service::RewardService;
use crate::services::user_service::UserService;
use crate::services::{AppState, EngineError};

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitPredictionPayload {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[validate(length(min = 1, max = 32))]
    pub sport: String,
    #[validate(length(min = 1, max = 64))]
    pub team1: String,
    #[validate(length(min = 1, max = 64))]
    pub team2: String,
    #[validate(length(min = 1, max = 64))]
    pub predicted_winner: String,
}

/// POST /api/v1/predictions/submit
pub async fn submit_prediction(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<SubmitPredictionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    if payload.predicted_winner != payload.team1 && payload.predicted_winner != payload.team2 {
        return Err(ApiError::bad_request(
            "predicted_winner must be one of the two teams",
        ));
    }

    // Predictions belong to registered users only.
    UserService::new(state.mongo.clone())
        .get_user(&payload.user_id)
        .await?
        .ok_or_else(|| ApiError::from(EngineError::UnknownUser(payload.user_id.clone())))?;

    let prediction = reward_service(&state)
        .submit_prediction(
            &payload.user_id,
            &payload.sport,
            &payload.team1,
            &payload.team2,
            &payload.predicted_winner,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "prediction_id": prediction.id,
            "predicted_winner": prediction.predicted_winner,
            "created_at": prediction.created_at,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SettlePredictionPayload {
    pub prediction_id: String,
    pub actual_outcome: String,
}

/// POST /api/v1/predictions/settle
///
/// Oracle-facing: reports the real match outcome and credits points exactly
/// once per prediction.
pub async fn settle_prediction(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<SettlePredictionPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settled = reward_service(&state)
        .settle_prediction(&payload.prediction_id, &payload.actual_outcome)
        .await?;

    Ok(Json(json!({
        "status": "success",
        "prediction_id": settled.id,
        "actual_outcome": settled.actual_outcome,
        "is_correct": settled.is_correct(),
        "points_earned": settled.points_earned,
    })))
}

/// GET /api/v1/predictions/history/{user_id}
pub async fn prediction_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let history = reward_service(&state).prediction_history(&user_id).await?;

    let predictions: Vec<serde_json::Value> = history
        .iter()
        .map(|p| {
            json!({
                "prediction_id": p.id,
                "sport": p.sport,
                "team1": p.team1,
                "team2": p.team2,
                "predicted_winner": p.predicted_winner,
                "actual_outcome": p.actual_outcome,
                "is_correct": p.is_correct(),
                "points_earned": p.points_earned,
                "created_at": p.created_at,
            })
        })
        .collect();

    Ok(Json(json!({
        "user_id": user_id,
        "predictions": predictions,
    })))
}

/// GET /api/v1/predictions/stats/{user_id}
pub async fn prediction_stats(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = reward_service(&state).prediction_stats(&user_id).await?;

    Ok(Json(json!({
        "user_id": user_id,
        "stats": stats,
    })))
}

fn reward_service(state: &AppState) -> RewardService {
    RewardService::new(state.mongo.clone(), state.config.quiz.clone())
}

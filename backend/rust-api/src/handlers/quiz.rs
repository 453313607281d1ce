use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::extractors::AppJson;
use crate::handlers::ApiError;
use crate::metrics::POOL_RESETS_TOTAL;
use crate::models::QuizLevel;
use crate::services::pool_service::PoolService;
use crate::services::progress_service::ProgressService;
use crate::services::quiz_service::{QuizService, QuizSession, SubmissionRequest};
use crate::services::AppState;

/// GET /api/v1/teams/available
pub async fn teams_available(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "teams": state.catalog.teams_available() }))
}

/// GET /api/v1/quiz/progress/{user_id}/{team}
///
/// Read-only: unknown users or teams report the no-progress default rather
/// than an error, so the client can always render a level picker.
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path((user_id, team)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let progress = ProgressService::new(state.mongo.clone())
        .get_progress(&user_id, &team)
        .await?;

    Ok(Json(json!({
        "user_id": user_id,
        "team": team,
        "has_progress": progress.has_progress,
        "current_level": progress.current_level,
        "team_points": progress.team_points,
    })))
}

/// GET /api/v1/quiz/generate/{user_id}/{team}/{level}
pub async fn generate_quiz(
    State(state): State<Arc<AppState>>,
    Path((user_id, team, level)): Path<(String, String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let level: QuizLevel = level.parse().map_err(ApiError::BadRequest)?;

    let service = quiz_service(&state);
    let session = service.start_session(&user_id, &team, Some(level)).await?;

    Ok(Json(match session {
        QuizSession::Started {
            level,
            questions,
            total_available,
        } => json!({
            "status": "success",
            "level": level,
            "team": team,
            "total_questions": questions.len(),
            "total_available": total_available,
            "questions": questions,
        }),
        QuizSession::Exhausted {
            level,
            total_asked,
            total_available,
        } => json!({
            "status": "questions_exhausted",
            "level": level,
            "team": team,
            "total_asked": total_asked,
            "total_available": total_available,
            "message": format!(
                "You have answered all {} available {} questions for {}. Reset the pool to replay them.",
                total_available, level, team
            ),
        }),
    }))
}

/// POST /api/v1/quiz/submit
pub async fn submit_quiz(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<SubmissionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = quiz_service(&state);
    let outcome = service.submit(&request).await?;

    Ok(Json(json!({
        "status": "success",
        "level": outcome.level,
        "correct": outcome.correct_count,
        "total": outcome.total,
        "score": outcome.score,
        "points_earned": outcome.points_earned,
        "points_per_question": outcome.points_per_question,
        "total_points": outcome.total_points,
        "team_points": outcome.team_points,
        "badges_earned": outcome.badges_earned,
        "next_level": outcome.next_level,
        "results": outcome.results,
    })))
}

/// POST /api/v1/quiz/reset-pool/{user_id}/{team}
pub async fn reset_pool(
    State(state): State<Arc<AppState>>,
    Path((user_id, team)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pool = PoolService::new(state.mongo.clone(), Arc::clone(&state.catalog));
    let result = pool.reset_pool(&user_id, &team).await;

    let outcome = if result.is_ok() { "success" } else { "error" };
    POOL_RESETS_TOTAL.with_label_values(&[outcome]).inc();
    let total_cleared = result?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Question pool for {} has been reset", team),
        "total_cleared": total_cleared,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LevelChoicePayload {
    pub user_id: String,
    pub team: String,
    pub level: QuizLevel,
    pub continue_to_next: bool,
}

/// POST /api/v1/quiz/level-choice
///
/// Applies the user's continue/stop decision after finishing a level.
pub async fn level_choice(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<LevelChoicePayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let progress = ProgressService::new(state.mongo.clone());
    let current_level = progress
        .advance_level(
            &payload.user_id,
            &payload.team,
            payload.level,
            payload.continue_to_next,
        )
        .await?;

    Ok(Json(json!({
        "status": "success",
        "action": if payload.continue_to_next { "continue" } else { "stop" },
        "current_level": current_level,
    })))
}

fn quiz_service(state: &AppState) -> QuizService {
    QuizService::new(
        state.mongo.clone(),
        state.redis.clone(),
        Arc::clone(&state.catalog),
        state.config.quiz.clone(),
    )
}

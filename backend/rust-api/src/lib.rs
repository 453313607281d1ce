#![allow(dead_code)]

use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    // The API is consumed by web and mobile clients on other origins.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any); // TODO: restrict to specific origins in production

    Router::new()
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1", api_routes().layer(cors))
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        // Users and ranking
        .route("/users", post(handlers::users::create_user))
        .route("/users/{user_id}", get(handlers::users::get_user))
        .route("/leaderboard", get(handlers::users::leaderboard))
        // Quiz engine
        .route("/teams/available", get(handlers::quiz::teams_available))
        .route(
            "/quiz/progress/{user_id}/{team}",
            get(handlers::quiz::get_progress),
        )
        .route(
            "/quiz/generate/{user_id}/{team}/{level}",
            get(handlers::quiz::generate_quiz),
        )
        .route("/quiz/submit", post(handlers::quiz::submit_quiz))
        .route(
            "/quiz/reset-pool/{user_id}/{team}",
            post(handlers::quiz::reset_pool),
        )
        .route("/quiz/level-choice", post(handlers::quiz::level_choice))
        // Match predictions
        .route(
            "/predictions/submit",
            post(handlers::predictions::submit_prediction),
        )
        .route(
            "/predictions/settle",
            post(handlers::predictions::settle_prediction),
        )
        .route(
            "/predictions/history/{user_id}",
            get(handlers::predictions::prediction_history),
        )
        .route(
            "/predictions/stats/{user_id}",
            get(handlers::predictions::prediction_stats),
        )
}

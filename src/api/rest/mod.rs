pub mod assignments;
pub mod triggers;
pub mod ws;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(assignments::router())
        .merge(triggers::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    assignments: usize,
    pending_notifications: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counts = async {
        let assignments = state.store.assignments().await?.len();
        let pending = state.store.unprocessed_queue_len().await?;
        Ok::<_, crate::store::StoreError>((assignments, pending))
    }
    .await;

    match counts {
        Ok((assignments, pending_notifications)) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                assignments,
                pending_notifications,
            }),
        )
            .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "degraded", "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}

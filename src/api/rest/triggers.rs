use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::post;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::auto_assign::{self, ScanReport};
use crate::engine::auto_release::{self, ReapReport};
use crate::engine::notifier::{self, DrainReport};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/triggers/auto-assign", post(trigger_auto_assign))
        .route("/triggers/auto-release", post(trigger_auto_release))
        .route("/triggers/notifications", post(trigger_notifications))
}

#[derive(Deserialize, Default)]
pub struct AutoAssignScope {
    pub operator_id: Option<Uuid>,
}

#[derive(Deserialize, Default)]
pub struct DrainRequest {
    pub batch_size: Option<usize>,
}

async fn trigger_auto_assign(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<AutoAssignScope>>,
) -> Result<Json<ScanReport>, AppError> {
    let scope = payload.map(|Json(body)| body).unwrap_or_default();
    Ok(Json(auto_assign::run(&state, scope.operator_id).await?))
}

async fn trigger_auto_release(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReapReport>, AppError> {
    Ok(Json(auto_release::run(&state).await?))
}

async fn trigger_notifications(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<DrainRequest>>,
) -> Result<Json<DrainReport>, AppError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    if request.batch_size == Some(0) {
        return Err(AppError::BadRequest("batch_size must be > 0".to_string()));
    }
    Ok(Json(notifier::run(&state, request.batch_size).await?))
}

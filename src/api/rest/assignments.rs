use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::assignment::{
    self, Actor, UnassignOutcome, assign_crew, assign_lead, confirm_assignment,
};
use crate::engine::availability::is_available;
use crate::engine::ranking::{Candidate, rank_candidates};
use crate::error::AppError;
use crate::models::assignment::{Assignment, AssignmentStatus, RoleKind};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/assignments", get(list_assignments))
        .route("/assignments/:id", get(get_assignment))
        .route("/assignments/:id/confirm", post(confirm))
        .route(
            "/journeys/:journey_id/vehicles/:vehicle_id/candidates",
            get(list_candidates),
        )
        .route("/journeys/:journey_id/vehicles/:vehicle_id/lead", post(post_lead))
        .route("/journeys/:journey_id/vehicles/:vehicle_id/crew", post(post_crew))
        .route(
            "/journeys/:journey_id/vehicles/:vehicle_id/lead/:staff_id",
            delete(remove_lead),
        )
        .route(
            "/journeys/:journey_id/vehicles/:vehicle_id/crew/:staff_id",
            delete(remove_crew),
        )
}

#[derive(Deserialize, Default)]
pub struct AssignLeadRequest {
    pub staff_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct AssignCrewRequest {
    pub staff_id: Uuid,
}

#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub actor: Actor,
}

#[derive(Deserialize, Default)]
pub struct AssignmentFilter {
    pub journey_id: Option<Uuid>,
    pub status: Option<AssignmentStatus>,
}

#[derive(Serialize)]
pub struct RankedCandidate {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub available: bool,
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AssignmentFilter>,
) -> Result<Json<Vec<Assignment>>, AppError> {
    let assignments = state
        .store
        .assignments()
        .await?
        .into_iter()
        .filter(|a| filter.journey_id.is_none_or(|id| a.journey_id == id))
        .filter(|a| filter.status.is_none_or(|s| a.status == s))
        .collect();

    Ok(Json(assignments))
}

async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Assignment>, AppError> {
    let assignment = state
        .store
        .assignment(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("assignment {id} not found")))?;

    Ok(Json(assignment))
}

async fn list_candidates(
    State(state): State<Arc<AppState>>,
    Path((journey_id, vehicle_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<RankedCandidate>>, AppError> {
    let now = Utc::now();
    let store = state.store.as_ref();
    let journey = store
        .journey(journey_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("journey {journey_id} not found")))?;

    let ranked = rank_candidates(store, state.policy.fair_use_window, journey_id, vehicle_id, now).await?;

    let mut annotated = Vec::with_capacity(ranked.len());
    for candidate in ranked {
        let available = is_available(
            store,
            candidate.staff_id,
            journey.departs_at,
            state.policy.conflict_window,
        )
        .await?;
        annotated.push(RankedCandidate { candidate, available });
    }

    Ok(Json(annotated))
}

async fn post_lead(
    State(state): State<Arc<AppState>>,
    Path((journey_id, vehicle_id)): Path<(Uuid, Uuid)>,
    payload: Option<Json<AssignLeadRequest>>,
) -> Result<Json<Assignment>, AppError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let lead = assign_lead(&state, journey_id, vehicle_id, request.staff_id, Utc::now()).await?;
    Ok(Json(lead))
}

async fn post_crew(
    State(state): State<Arc<AppState>>,
    Path((journey_id, vehicle_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<AssignCrewRequest>,
) -> Result<Json<Assignment>, AppError> {
    let crew = assign_crew(&state, journey_id, vehicle_id, payload.staff_id, Utc::now()).await?;
    Ok(Json(crew))
}

async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ConfirmRequest>,
) -> Result<Json<Assignment>, AppError> {
    let confirmed = confirm_assignment(&state, id, payload.actor, Utc::now()).await?;
    Ok(Json(confirmed))
}

async fn remove_lead(
    State(state): State<Arc<AppState>>,
    Path((journey_id, vehicle_id, staff_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<Json<UnassignOutcome>, AppError> {
    let outcome = assignment::unassign(
        &state,
        RoleKind::Lead,
        journey_id,
        vehicle_id,
        staff_id,
        Utc::now(),
    )
    .await?;
    Ok(Json(outcome))
}

async fn remove_crew(
    State(state): State<Arc<AppState>>,
    Path((journey_id, vehicle_id, staff_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<Json<UnassignOutcome>, AppError> {
    let outcome = assignment::unassign(
        &state,
        RoleKind::Crew,
        journey_id,
        vehicle_id,
        staff_id,
        Utc::now(),
    )
    .await?;
    Ok(Json(outcome))
}

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::FairUseWindow;
use crate::engine::ledger::recent_loads;
use crate::error::AppError;
use crate::models::journey::Journey;
use crate::models::staff::Staff;
use crate::store::Datastore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// Listed on the vehicle's preference roster.
    Preference,
    /// Pulled from the operator's captain-like staff because the roster was empty.
    RoleFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub staff_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub priority: Option<u32>,
    pub recent_load: u32,
    pub source: CandidateSource,
}

/// Lead candidates for a vehicle on a journey, best first. Availability is
/// not considered here.
pub async fn rank_candidates(
    store: &dyn Datastore,
    window: FairUseWindow,
    journey_id: Uuid,
    vehicle_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Candidate>, AppError> {
    let journey = store
        .journey(journey_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("journey {journey_id} not found")))?;

    if !journey.schedules_vehicle(vehicle_id) {
        return Err(AppError::NotFound(format!(
            "vehicle {vehicle_id} is not scheduled on journey {journey_id}"
        )));
    }

    rank_for_journey(store, window, &journey, vehicle_id, now).await
}

pub async fn rank_for_journey(
    store: &dyn Datastore,
    window: FairUseWindow,
    journey: &Journey,
    vehicle_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Candidate>, AppError> {
    let loads = recent_loads(store, journey.operator_id, window, now).await?;

    let mut pool = Vec::new();
    for preference in store.vehicle_preferences(vehicle_id).await? {
        if !preference.is_lead_eligible {
            continue;
        }
        let Some(staff) = store.staff(preference.staff_id).await? else {
            continue;
        };
        if staff.active && staff.operator_id == journey.operator_id {
            pool.push(candidate(
                &staff,
                Some(preference.priority),
                &loads,
                CandidateSource::Preference,
            ));
        }
    }

    if pool.is_empty() {
        pool = store
            .operator_staff(journey.operator_id)
            .await?
            .iter()
            .filter(|staff| staff.active && staff.is_captain_like())
            .map(|staff| candidate(staff, None, &loads, CandidateSource::RoleFallback))
            .collect();
    }

    let ranked = order_candidates(pool);
    debug!(
        journey_id = %journey.id,
        vehicle_id = %vehicle_id,
        candidates = ranked.len(),
        "candidates ranked"
    );
    Ok(ranked)
}

fn candidate(
    staff: &Staff,
    priority: Option<u32>,
    loads: &HashMap<Uuid, u32>,
    source: CandidateSource,
) -> Candidate {
    Candidate {
        staff_id: staff.id,
        name: staff.name.clone(),
        email: staff.contact_email().map(str::to_string),
        priority,
        recent_load: loads.get(&staff.id).copied().unwrap_or(0),
        source,
    }
}

/// Declared priority first (undeclared last), then lighter recent load, then
/// name, then id so equal rows always come out in the same order.
pub fn order_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(compare);
    candidates
}

fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    let priority = match (a.priority, b.priority) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    priority
        .then(a.recent_load.cmp(&b.recent_load))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.staff_id.cmp(&b.staff_id))
}

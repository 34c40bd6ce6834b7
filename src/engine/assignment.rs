//! Lifecycle of lead and crew assignments.
//!
//! Every transition is a conditional write against the datastore. The reads
//! done beforehand only shape the error the caller sees; a write that loses a
//! race still ends in `Conflict` or `InvalidState`, never in a duplicate lead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::engine::availability::find_conflict;
use crate::engine::ledger;
use crate::engine::queue::{notification_for, record_enqueued};
use crate::engine::ranking::rank_for_journey;
use crate::error::AppError;
use crate::models::assignment::{Assignment, AssignmentChange, AssignmentStatus, RoleKind};
use crate::models::journey::{Journey, JourneyEvent, JourneyEventKind};
use crate::models::staff::Staff;
use crate::state::AppState;

/// Who is attempting a confirmation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Staff(Uuid),
    OperatorAdmin(Uuid),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnassignOutcome {
    pub released: bool,
}

/// Manual lead assignment. Creates the lead, or swaps the staff member on the
/// existing one. Without a `staff_id` the best available candidate is used,
/// which is only allowed while the vehicle has no lead.
pub async fn assign_lead(
    state: &AppState,
    journey_id: Uuid,
    vehicle_id: Uuid,
    staff_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<Assignment, AppError> {
    let result: Result<Assignment, AppError> = async {
        let journey = schedulable_journey(state, journey_id, vehicle_id, now).await?;
        let current = state.store.active_lead(journey.id, vehicle_id).await?;

        let Some(staff_id) = staff_id else {
            if let Some(current) = current {
                return Err(AppError::Conflict(format!(
                    "vehicle {vehicle_id} on journey {journey_id} already has lead {}",
                    current.id
                )));
            }
            let staff = top_available_candidate(state, &journey, vehicle_id, now).await?;
            return insert_lead(state, &journey, vehicle_id, &staff, now).await;
        };

        let staff = eligible_staff(state, &journey, vehicle_id, staff_id, RoleKind::Lead).await?;
        match current {
            Some(current) if current.staff_id == staff.id => Ok(current),
            Some(current) => reassign(state, &journey, current, &staff, now).await,
            None => insert_lead(state, &journey, vehicle_id, &staff, now).await,
        }
    }
    .await;

    observe(state, "assign_lead", result)
}

/// Strict create: fails with `Conflict` if the vehicle already has a lead.
pub async fn create_lead(
    state: &AppState,
    journey_id: Uuid,
    vehicle_id: Uuid,
    staff_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Assignment, AppError> {
    let result: Result<Assignment, AppError> = async {
        let journey = schedulable_journey(state, journey_id, vehicle_id, now).await?;
        let staff = eligible_staff(state, &journey, vehicle_id, staff_id, RoleKind::Lead).await?;
        insert_lead(state, &journey, vehicle_id, &staff, now).await
    }
    .await;

    observe(state, "create_lead", result)
}

pub async fn assign_crew(
    state: &AppState,
    journey_id: Uuid,
    vehicle_id: Uuid,
    staff_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Assignment, AppError> {
    let result: Result<Assignment, AppError> = async {
        let journey = schedulable_journey(state, journey_id, vehicle_id, now).await?;
        let staff = eligible_staff(state, &journey, vehicle_id, staff_id, RoleKind::Crew).await?;

        if let Some(existing) = state
            .store
            .active_assignment_for(journey.id, vehicle_id, staff.id)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "staff {} already holds assignment {} on this vehicle",
                staff.id, existing.id
            )));
        }
        ensure_available(state, &staff, &journey).await?;

        let assignment = Assignment::allocate(journey.id, vehicle_id, staff.id, RoleKind::Crew, now);
        state.store.insert_assignment(&assignment).await?;
        state.publish(AssignmentChange::Created, &assignment);

        info!(
            assignment_id = %assignment.id,
            journey_id = %journey.id,
            vehicle_id = %vehicle_id,
            staff_id = %staff.id,
            "crew assigned"
        );
        Ok(assignment)
    }
    .await;

    observe(state, "assign_crew", result)
}

/// `allocated -> confirmed`, by the assigned staff member or the operator's admin.
pub async fn confirm_assignment(
    state: &AppState,
    assignment_id: Uuid,
    actor: Actor,
    now: DateTime<Utc>,
) -> Result<Assignment, AppError> {
    let result: Result<Assignment, AppError> = async {
        let assignment = state
            .store
            .assignment(assignment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("assignment {assignment_id} not found")))?;
        let journey = state.store.journey(assignment.journey_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("journey {} not found", assignment.journey_id))
        })?;

        let authorized = match actor {
            Actor::Staff(id) => id == assignment.staff_id,
            Actor::OperatorAdmin(operator_id) => operator_id == journey.operator_id,
        };
        if !authorized {
            return Err(AppError::Forbidden(format!(
                "{actor:?} may not confirm assignment {assignment_id}"
            )));
        }

        if assignment.status != AssignmentStatus::Allocated {
            return Err(AppError::InvalidState(format!(
                "assignment {assignment_id} is {:?}, only allocated assignments can be confirmed",
                assignment.status
            )));
        }

        let mut confirmed = assignment.clone();
        confirmed.status = AssignmentStatus::Confirmed;
        confirmed.confirmed_at = Some(now);

        // Status, accepted event and ledger entry land together or not at all.
        let written = state
            .store
            .confirm_assignment_if(
                &confirmed,
                &journey_event(&confirmed, JourneyEventKind::Accepted, now),
                &ledger::confirmation_entry(journey.operator_id, &confirmed, now),
            )
            .await?;
        if !written {
            return Err(AppError::InvalidState(format!(
                "assignment {assignment_id} changed before it could be confirmed"
            )));
        }

        state.publish(AssignmentChange::Confirmed, &confirmed);

        info!(
            assignment_id = %confirmed.id,
            staff_id = %confirmed.staff_id,
            role = ?confirmed.role,
            "assignment confirmed"
        );
        Ok(confirmed)
    }
    .await;

    observe(state, "confirm", result)
}

/// `allocated -> released` for a lead nobody confirmed.
pub async fn release_lead(
    state: &AppState,
    lead: &Assignment,
    now: DateTime<Utc>,
) -> Result<Assignment, AppError> {
    let result: Result<Assignment, AppError> = async {
        if lead.status != AssignmentStatus::Allocated {
            return Err(AppError::InvalidState(format!(
                "assignment {} is {:?}, only allocated leads can be released",
                lead.id, lead.status
            )));
        }

        let mut released = lead.clone();
        released.status = AssignmentStatus::Released;

        let written = state
            .store
            .update_assignment_if(&released, AssignmentStatus::Allocated, lead.staff_id)
            .await?;
        if !written {
            return Err(AppError::InvalidState(format!(
                "assignment {} changed before it could be released",
                lead.id
            )));
        }

        record_event(state, &released, JourneyEventKind::Released, now).await?;
        state.publish(AssignmentChange::Released, &released);
        Ok(released)
    }
    .await;

    observe(state, "release", result)
}

/// Operator removal. Leads are released (confirmed ones included); crew rows
/// are deleted. Unassigning someone who holds nothing is a no-op.
pub async fn unassign(
    state: &AppState,
    kind: RoleKind,
    journey_id: Uuid,
    vehicle_id: Uuid,
    staff_id: Uuid,
    now: DateTime<Utc>,
) -> Result<UnassignOutcome, AppError> {
    let result: Result<UnassignOutcome, AppError> = async {
        let current = state
            .store
            .active_assignment_for(journey_id, vehicle_id, staff_id)
            .await?
            .filter(|a| a.role == kind);
        let Some(current) = current else {
            return Ok(UnassignOutcome { released: false });
        };

        match kind {
            RoleKind::Lead => {
                let mut released = current.clone();
                released.status = AssignmentStatus::Released;

                let written = state
                    .store
                    .update_assignment_if(&released, current.status, current.staff_id)
                    .await?;
                if !written {
                    return Err(AppError::Conflict(format!(
                        "assignment {} changed while being unassigned",
                        current.id
                    )));
                }

                record_event(state, &released, JourneyEventKind::Released, now).await?;
                state.publish(AssignmentChange::Released, &released);
            }
            RoleKind::Crew => {
                if !state.store.delete_assignment(current.id).await? {
                    return Ok(UnassignOutcome { released: false });
                }
                state.publish(AssignmentChange::Removed, &current);
            }
        }

        if current.status == AssignmentStatus::Confirmed {
            ledger::revoke_confirmation(state.store.as_ref(), &current).await?;
        }

        info!(
            assignment_id = %current.id,
            staff_id = %staff_id,
            role = ?kind,
            "staff unassigned"
        );
        Ok(UnassignOutcome { released: true })
    }
    .await;

    observe(state, "unassign", result)
}

async fn insert_lead(
    state: &AppState,
    journey: &Journey,
    vehicle_id: Uuid,
    staff: &Staff,
    now: DateTime<Utc>,
) -> Result<Assignment, AppError> {
    if let Some(existing) = state.store.active_lead(journey.id, vehicle_id).await? {
        return Err(AppError::Conflict(format!(
            "vehicle {vehicle_id} on journey {} already has lead {}",
            journey.id, existing.id
        )));
    }
    ensure_available(state, staff, journey).await?;

    let lead = Assignment::allocate(journey.id, vehicle_id, staff.id, RoleKind::Lead, now);
    let notification = notification_for(&lead, staff, now);
    // The store's uniqueness constraint is the real arbiter; a violation here
    // converts to the same Conflict as the pre-check above.
    state.store.insert_lead(&lead, &notification).await?;
    record_enqueued(state, &lead, &notification);
    state.publish(AssignmentChange::Created, &lead);

    info!(
        assignment_id = %lead.id,
        journey_id = %journey.id,
        vehicle_id = %vehicle_id,
        staff_id = %staff.id,
        "lead allocated"
    );
    Ok(lead)
}

async fn reassign(
    state: &AppState,
    journey: &Journey,
    current: Assignment,
    staff: &Staff,
    now: DateTime<Utc>,
) -> Result<Assignment, AppError> {
    ensure_available(state, staff, journey).await?;

    let mut next = current.clone();
    next.staff_id = staff.id;
    next.status = AssignmentStatus::Allocated;
    next.assigned_at = now;
    next.confirmed_at = None;

    let notification = notification_for(&next, staff, now);
    let written = state
        .store
        .reassign_lead_if(&next, current.status, current.staff_id, &notification)
        .await?;
    if !written {
        return Err(AppError::Conflict(format!(
            "lead {} changed while being reassigned",
            current.id
        )));
    }
    record_enqueued(state, &next, &notification);

    if current.status == AssignmentStatus::Confirmed {
        ledger::revoke_confirmation(state.store.as_ref(), &current).await?;
    }
    record_event(state, &current, JourneyEventKind::Released, now).await?;
    state.publish(AssignmentChange::Reassigned, &next);

    info!(
        assignment_id = %next.id,
        previous_staff_id = %current.staff_id,
        staff_id = %staff.id,
        "lead reassigned"
    );
    Ok(next)
}

async fn schedulable_journey(
    state: &AppState,
    journey_id: Uuid,
    vehicle_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Journey, AppError> {
    let journey = state
        .store
        .journey(journey_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("journey {journey_id} not found")))?;

    if !journey.schedules_vehicle(vehicle_id) {
        return Err(AppError::NotFound(format!(
            "vehicle {vehicle_id} is not scheduled on journey {journey_id}"
        )));
    }

    let vehicle = state
        .store
        .vehicle(vehicle_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("vehicle {vehicle_id} not found")))?;

    if !journey.active {
        return Err(AppError::InvalidState(format!("journey {journey_id} is inactive")));
    }
    if !vehicle.active {
        return Err(AppError::InvalidState(format!("vehicle {vehicle_id} is inactive")));
    }
    if journey.departs_at <= now {
        return Err(AppError::InvalidState(format!(
            "journey {journey_id} departed at {}",
            journey.departs_at
        )));
    }

    Ok(journey)
}

async fn eligible_staff(
    state: &AppState,
    journey: &Journey,
    vehicle_id: Uuid,
    staff_id: Uuid,
    role: RoleKind,
) -> Result<Staff, AppError> {
    let staff = state
        .store
        .staff(staff_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("staff {staff_id} not found")))?;

    if !staff.active {
        return Err(AppError::NotEligible(format!("staff {staff_id} is inactive")));
    }
    if staff.operator_id != journey.operator_id {
        return Err(AppError::NotEligible(format!(
            "staff {staff_id} does not work for operator {}",
            journey.operator_id
        )));
    }

    if role == RoleKind::Lead && !staff.is_captain_like() {
        let on_roster = state
            .store
            .vehicle_preferences(vehicle_id)
            .await?
            .iter()
            .any(|p| p.staff_id == staff_id && p.is_lead_eligible);
        if !on_roster {
            return Err(AppError::NotEligible(format!(
                "staff {staff_id} ({}) cannot lead vehicle {vehicle_id}",
                staff.role
            )));
        }
    }

    Ok(staff)
}

async fn ensure_available(state: &AppState, staff: &Staff, journey: &Journey) -> Result<(), AppError> {
    let conflict = find_conflict(
        state.store.as_ref(),
        staff.id,
        journey.departs_at,
        state.policy.conflict_window,
    )
    .await?;

    match conflict {
        Some(held) => Err(AppError::Conflict(format!(
            "staff {} already holds assignment {} within {}h of this departure",
            staff.id,
            held.id,
            state.policy.conflict_window.num_hours()
        ))),
        None => Ok(()),
    }
}

async fn top_available_candidate(
    state: &AppState,
    journey: &Journey,
    vehicle_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Staff, AppError> {
    let ranked = rank_for_journey(
        state.store.as_ref(),
        state.policy.fair_use_window,
        journey,
        vehicle_id,
        now,
    )
    .await?;

    for candidate in ranked {
        let conflict = find_conflict(
            state.store.as_ref(),
            candidate.staff_id,
            journey.departs_at,
            state.policy.conflict_window,
        )
        .await?;
        if conflict.is_some() {
            continue;
        }
        if let Some(staff) = state.store.staff(candidate.staff_id).await? {
            return Ok(staff);
        }
    }

    Err(AppError::NotEligible(format!(
        "no available lead candidate for vehicle {vehicle_id} on journey {}",
        journey.id
    )))
}

fn journey_event(assignment: &Assignment, kind: JourneyEventKind, now: DateTime<Utc>) -> JourneyEvent {
    JourneyEvent {
        id: Uuid::new_v4(),
        journey_id: assignment.journey_id,
        vehicle_id: assignment.vehicle_id,
        staff_id: assignment.staff_id,
        kind,
        occurred_at: now,
    }
}

async fn record_event(
    state: &AppState,
    assignment: &Assignment,
    kind: JourneyEventKind,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    state
        .store
        .append_journey_event(&journey_event(assignment, kind, now))
        .await?;
    Ok(())
}

fn observe<T>(state: &AppState, transition: &str, result: Result<T, AppError>) -> Result<T, AppError> {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    state.metrics.record_transition(transition, outcome);
    result
}

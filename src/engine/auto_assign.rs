use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::assignment::create_lead;
use crate::engine::availability::is_available;
use crate::engine::ranking::rank_for_journey;
use crate::error::AppError;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::journey::Journey;
use crate::state::AppState;

const SWEEP: &str = "auto_assign";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanReport {
    /// Vehicle slots without a lead that the scan tried to fill.
    pub scanned: usize,
    pub assigned: usize,
    /// Slots whose lead is allocated and waiting for confirmation.
    pub skipped: usize,
    pub failed: usize,
}

enum SlotOutcome {
    Confirmed,
    AwaitingConfirmation,
    Assigned(Assignment),
}

/// Fills lead slots on booked journeys departing inside the auto-assign
/// horizon. Per-slot failures are counted, never propagated.
pub async fn scan(
    state: &AppState,
    operator_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<ScanReport, AppError> {
    let from = now + state.policy.auto_assign_min_lead;
    let to = now + state.policy.auto_assign_max_lead;

    let journeys = state
        .store
        .journeys_departing_between(from, to, operator_id)
        .await?;

    let mut report = ScanReport::default();
    for journey in journeys {
        if !(journey.active && journey.departs_at > from && journey.departs_at < to) {
            continue;
        }
        if operator_id.is_some_and(|op| op != journey.operator_id) {
            continue;
        }

        match state.store.booked_seats(journey.id).await {
            Ok(0) => continue,
            Ok(_) => {}
            Err(err) => {
                warn!(journey_id = %journey.id, error = %err, "booked seats lookup failed");
                report.failed += journey.vehicle_ids.len();
                continue;
            }
        }

        for &vehicle_id in &journey.vehicle_ids {
            match fill_slot(state, &journey, vehicle_id, now).await {
                Ok(SlotOutcome::Confirmed) => {}
                Ok(SlotOutcome::AwaitingConfirmation) => report.skipped += 1,
                Ok(SlotOutcome::Assigned(lead)) => {
                    report.scanned += 1;
                    report.assigned += 1;
                    info!(
                        journey_id = %journey.id,
                        vehicle_id = %vehicle_id,
                        staff_id = %lead.staff_id,
                        "lead auto-assigned"
                    );
                }
                Err(err) => {
                    report.scanned += 1;
                    report.failed += 1;
                    warn!(
                        journey_id = %journey.id,
                        vehicle_id = %vehicle_id,
                        error = %err,
                        "auto-assign failed for slot"
                    );
                }
            }
        }
    }

    Ok(report)
}

async fn fill_slot(
    state: &AppState,
    journey: &Journey,
    vehicle_id: Uuid,
    now: DateTime<Utc>,
) -> Result<SlotOutcome, AppError> {
    if let Some(lead) = state.store.active_lead(journey.id, vehicle_id).await? {
        return Ok(match lead.status {
            AssignmentStatus::Confirmed => SlotOutcome::Confirmed,
            _ => SlotOutcome::AwaitingConfirmation,
        });
    }

    let ranked = rank_for_journey(
        state.store.as_ref(),
        state.policy.fair_use_window,
        journey,
        vehicle_id,
        now,
    )
    .await?;

    for candidate in ranked {
        let free = is_available(
            state.store.as_ref(),
            candidate.staff_id,
            journey.departs_at,
            state.policy.conflict_window,
        )
        .await?;
        if free {
            let lead = create_lead(state, journey.id, vehicle_id, candidate.staff_id, now).await?;
            return Ok(SlotOutcome::Assigned(lead));
        }
    }

    Err(AppError::NotEligible(format!(
        "no available lead candidate for vehicle {vehicle_id}"
    )))
}

/// Entry point for the scheduler and the HTTP trigger.
pub async fn run(state: &AppState, operator_id: Option<Uuid>) -> Result<ScanReport, AppError> {
    let start = Instant::now();
    let result = scan(state, operator_id, Utc::now()).await;
    state
        .metrics
        .sweep_duration_seconds
        .with_label_values(&[SWEEP])
        .observe(start.elapsed().as_secs_f64());

    match &result {
        Ok(report) => {
            state.metrics.record_sweep_items(SWEEP, "assigned", report.assigned);
            state.metrics.record_sweep_items(SWEEP, "skipped", report.skipped);
            state.metrics.record_sweep_items(SWEEP, "failed", report.failed);
            info!(
                operator_id = ?operator_id,
                scanned = report.scanned,
                assigned = report.assigned,
                skipped = report.skipped,
                failed = report.failed,
                "auto-assign sweep finished"
            );
        }
        Err(err) => warn!(error = %err, "auto-assign sweep aborted"),
    }
    result
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::{ScanReport, scan};
    use crate::engine::assignment::{Actor, confirm_assignment, create_lead};
    use crate::models::assignment::{AssignmentStatus, RoleKind};
    use crate::store::Datastore;
    use crate::test_support::World;

    #[tokio::test]
    async fn assigns_top_priority_captain_on_booked_journey() {
        let world = World::new();
        let vessel = world.vehicle("MV Osprey");
        let ana = world.staff("Ana", "captain");
        let ben = world.staff("Ben", "captain");
        world.prefer(&vessel, &ben, 2);
        world.prefer(&vessel, &ana, 1);
        let journey = world.journey(Duration::hours(48), &[&vessel]);
        world.book(&journey, &vessel, 3);

        let report = scan(&world.state, None, world.now).await.unwrap();
        assert_eq!(
            report,
            ScanReport {
                scanned: 1,
                assigned: 1,
                skipped: 0,
                failed: 0
            }
        );

        let lead = world.store.active_lead(journey.id, vessel.id).await.unwrap().unwrap();
        assert_eq!(lead.staff_id, ana.id);
        assert_eq!(lead.role, RoleKind::Lead);
        assert_eq!(lead.status, AssignmentStatus::Allocated);
        assert_eq!(world.store.unprocessed_queue_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ignores_unbooked_and_out_of_horizon_journeys() {
        let world = World::new();
        let vessel = world.vehicle("MV Osprey");
        let ana = world.staff("Ana", "captain");
        world.prefer(&vessel, &ana, 1);

        let unbooked = world.journey(Duration::hours(48), &[&vessel]);
        let too_soon = world.journey(Duration::hours(24), &[&vessel]);
        let too_far = world.journey(Duration::hours(72), &[&vessel]);
        world.book(&too_soon, &vessel, 2);
        world.book(&too_far, &vessel, 2);

        let report = scan(&world.state, None, world.now).await.unwrap();
        assert_eq!(report, ScanReport::default());
        for journey in [unbooked, too_soon, too_far] {
            assert!(world.store.active_lead(journey.id, vessel.id).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn rerun_is_idempotent_and_counts_pending_leads_as_skipped() {
        let world = World::new();
        let vessel = world.vehicle("MV Osprey");
        let ana = world.staff("Ana", "captain");
        world.prefer(&vessel, &ana, 1);
        let journey = world.journey(Duration::hours(30), &[&vessel]);
        world.book(&journey, &vessel, 1);

        let first = scan(&world.state, None, world.now).await.unwrap();
        assert_eq!(first.assigned, 1);

        let second = scan(&world.state, None, world.now).await.unwrap();
        assert_eq!(second.assigned, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.scanned, 0);

        let lead = world.store.active_lead(journey.id, vessel.id).await.unwrap().unwrap();
        confirm_assignment(&world.state, lead.id, Actor::Staff(ana.id), world.now)
            .await
            .unwrap();
        let third = scan(&world.state, None, world.now).await.unwrap();
        assert_eq!(third, ScanReport::default());
        assert_eq!(world.store.assignments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unavailable_candidates_are_skipped_and_exhaustion_counts_as_failed() {
        let world = World::new();
        let vessel = world.vehicle("MV Osprey");
        let heron = world.vehicle("MV Heron");
        let ana = world.staff("Ana", "captain");
        let ben = world.staff("Ben", "captain");
        world.prefer(&vessel, &ana, 1);
        world.prefer(&vessel, &ben, 2);
        world.prefer(&heron, &ana, 1);

        let busy = world.journey(Duration::hours(45), &[&heron]);
        create_lead(&world.state, busy.id, heron.id, ana.id, world.now)
            .await
            .unwrap();

        let journey = world.journey(Duration::hours(48), &[&vessel, &heron]);
        world.book(&journey, &vessel, 4);

        let report = scan(&world.state, None, world.now).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.assigned, 1);
        assert_eq!(report.failed, 1);

        let lead = world.store.active_lead(journey.id, vessel.id).await.unwrap().unwrap();
        assert_eq!(lead.staff_id, ben.id);
        assert!(world.store.active_lead(journey.id, heron.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn operator_scope_limits_the_scan() {
        let world = World::new();
        let vessel = world.vehicle("MV Osprey");
        let ana = world.staff("Ana", "captain");
        world.prefer(&vessel, &ana, 1);
        let journey = world.journey(Duration::hours(48), &[&vessel]);
        world.book(&journey, &vessel, 1);

        let report = scan(&world.state, Some(Uuid::new_v4()), world.now).await.unwrap();
        assert_eq!(report, ScanReport::default());

        let report = scan(&world.state, Some(world.operator.id), world.now).await.unwrap();
        assert_eq!(report.assigned, 1);
    }
}

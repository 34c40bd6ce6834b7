use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::assignment::release_lead;
use crate::error::AppError;
use crate::mail::templates::{self, AssignmentContext};
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::journey::Journey;
use crate::state::AppState;

const SWEEP: &str = "auto_release";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReapReport {
    /// Stale holds on far-off journeys that were checked for bookings.
    pub scanned: usize,
    pub released: usize,
    pub failed: usize,
}

/// Releases allocated leads older than the grace period on journeys that are
/// still beyond the release horizon and have no seats booked at all.
pub async fn reap(state: &AppState, now: DateTime<Utc>) -> Result<ReapReport, AppError> {
    let policy = &state.policy;
    let leads = state.store.leads_with_status(AssignmentStatus::Allocated).await?;

    let mut journeys: HashMap<Uuid, Option<Journey>> = HashMap::new();
    let mut report = ReapReport::default();

    for lead in leads {
        if now - lead.assigned_at <= policy.release_grace {
            continue;
        }

        let journey = match journeys.get(&lead.journey_id) {
            Some(cached) => cached.clone(),
            None => {
                let loaded = match state.store.journey(lead.journey_id).await {
                    Ok(loaded) => loaded,
                    Err(err) => {
                        warn!(assignment_id = %lead.id, error = %err, "journey lookup failed");
                        report.failed += 1;
                        continue;
                    }
                };
                journeys.insert(lead.journey_id, loaded.clone());
                loaded
            }
        };
        let Some(journey) = journey else {
            warn!(assignment_id = %lead.id, journey_id = %lead.journey_id, "lead references unknown journey");
            continue;
        };

        // Never touch a lead once departure is inside the horizon.
        if journey.departs_at - now <= policy.release_horizon {
            continue;
        }
        report.scanned += 1;

        match reap_one(state, &lead, &journey, now).await {
            Ok(true) => report.released += 1,
            Ok(false) => {}
            Err(err) => {
                report.failed += 1;
                warn!(assignment_id = %lead.id, error = %err, "auto-release failed");
            }
        }
    }

    Ok(report)
}

async fn reap_one(
    state: &AppState,
    lead: &Assignment,
    journey: &Journey,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    if state.store.booked_seats(journey.id).await? > 0 {
        return Ok(false);
    }

    let released = release_lead(state, lead, now).await?;
    info!(
        assignment_id = %released.id,
        journey_id = %journey.id,
        staff_id = %released.staff_id,
        "stale lead hold released"
    );

    if state.policy.notify_operator_on_release {
        notify_operator(state, &released, journey).await;
    }
    Ok(true)
}

/// Best effort; the release stands whether or not the mail goes out.
async fn notify_operator(state: &AppState, released: &Assignment, journey: &Journey) {
    let context = async {
        let operator = state.store.operator(journey.operator_id).await?;
        let vehicle = state.store.vehicle(released.vehicle_id).await?;
        let staff = state.store.staff(released.staff_id).await?;
        Ok::<_, AppError>((operator, vehicle, staff))
    }
    .await;

    let (operator, vehicle, staff) = match context {
        Ok((Some(operator), Some(vehicle), Some(staff))) => (operator, vehicle, staff),
        Ok(_) => {
            warn!(assignment_id = %released.id, "release notice skipped: context incomplete");
            return;
        }
        Err(err) => {
            warn!(assignment_id = %released.id, error = %err, "release notice skipped");
            return;
        }
    };
    let Some(to) = operator.contact_email() else {
        return;
    };

    let message = templates::operator_released(&AssignmentContext {
        journey,
        vehicle: &vehicle,
        staff: &staff,
        operator: &operator,
    });

    let sent = tokio::time::timeout(
        state.policy.mail_timeout,
        state.mailer.send(to, &message.subject, &message.html),
    )
    .await;
    match sent {
        Ok(Ok(())) => state.metrics.deliveries_total.with_label_values(&["ok"]).inc(),
        Ok(Err(err)) => {
            state.metrics.deliveries_total.with_label_values(&["error"]).inc();
            warn!(to, error = %err, "release notice not delivered");
        }
        Err(_) => {
            state.metrics.deliveries_total.with_label_values(&["timeout"]).inc();
            warn!(to, "release notice timed out");
        }
    }
}

/// Entry point for the scheduler and the HTTP trigger.
pub async fn run(state: &AppState) -> Result<ReapReport, AppError> {
    let start = Instant::now();
    let result = reap(state, Utc::now()).await;
    state
        .metrics
        .sweep_duration_seconds
        .with_label_values(&[SWEEP])
        .observe(start.elapsed().as_secs_f64());

    match &result {
        Ok(report) => {
            state.metrics.record_sweep_items(SWEEP, "released", report.released);
            state.metrics.record_sweep_items(SWEEP, "failed", report.failed);
            info!(
                scanned = report.scanned,
                released = report.released,
                failed = report.failed,
                "auto-release sweep finished"
            );
        }
        Err(err) => warn!(error = %err, "auto-release sweep aborted"),
    }
    result
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::reap;
    use crate::config::Policy;
    use crate::engine::assignment::{Actor, confirm_assignment, create_lead};
    use crate::models::assignment::AssignmentStatus;
    use crate::models::journey::JourneyEventKind;
    use crate::store::Datastore;
    use crate::test_support::World;

    async fn stale_lead(world: &World, departs_in: Duration, seats: u32) -> crate::models::assignment::Assignment {
        let vessel = world.vehicle("MV Osprey");
        let captain = world.staff("Ana", "captain");
        let journey = world.journey(departs_in, &[&vessel]);
        if seats > 0 {
            world.book(&journey, &vessel, seats);
        }
        // Allocated seven hours before the sweep runs.
        create_lead(
            &world.state,
            journey.id,
            vessel.id,
            captain.id,
            world.now - Duration::hours(7),
        )
        .await
        .unwrap()
    }

    async fn status_of(world: &World, id: uuid::Uuid) -> AssignmentStatus {
        world.store.assignment(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn releases_stale_hold_on_far_unbooked_journey() {
        let world = World::new();
        let lead = stale_lead(&world, Duration::hours(80), 0).await;

        let report = reap(&world.state, world.now).await.unwrap();
        assert_eq!(report.released, 1);
        assert_eq!(status_of(&world, lead.id).await, AssignmentStatus::Released);

        let events = world.store.journey_events(lead.journey_id).await.unwrap();
        assert_eq!(events.last().map(|e| e.kind), Some(JourneyEventKind::Released));
        // Released, not deleted.
        assert!(world.store.assignment(lead.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn never_releases_inside_the_horizon() {
        let world = World::new();
        let lead = stale_lead(&world, Duration::hours(71), 0).await;

        let report = reap(&world.state, world.now).await.unwrap();
        assert_eq!(report.released, 0);
        assert_eq!(report.scanned, 0);
        assert_eq!(status_of(&world, lead.id).await, AssignmentStatus::Allocated);
    }

    #[tokio::test]
    async fn keeps_holds_on_journeys_with_passengers() {
        let world = World::new();
        let lead = stale_lead(&world, Duration::hours(80), 2).await;

        let report = reap(&world.state, world.now).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.released, 0);
        assert_eq!(status_of(&world, lead.id).await, AssignmentStatus::Allocated);
    }

    #[tokio::test]
    async fn bookings_on_another_vehicle_of_the_journey_count() {
        let world = World::new();
        let vessel = world.vehicle("MV Osprey");
        let tender = world.vehicle("Tender 2");
        let captain = world.staff("Ana", "captain");
        let journey = world.journey(Duration::hours(90), &[&vessel, &tender]);
        world.book(&journey, &tender, 1);
        let lead = create_lead(
            &world.state,
            journey.id,
            vessel.id,
            captain.id,
            world.now - Duration::hours(10),
        )
        .await
        .unwrap();

        reap(&world.state, world.now).await.unwrap();
        assert_eq!(status_of(&world, lead.id).await, AssignmentStatus::Allocated);
    }

    #[tokio::test]
    async fn respects_grace_period_and_confirmed_leads() {
        let world = World::new();
        let vessel = world.vehicle("MV Osprey");
        let ana = world.staff("Ana", "captain");
        let ben = world.staff("Ben", "captain");
        let fresh_journey = world.journey(Duration::hours(100), &[&vessel]);
        let fresh = create_lead(
            &world.state,
            fresh_journey.id,
            vessel.id,
            ana.id,
            world.now - Duration::hours(2),
        )
        .await
        .unwrap();

        let confirmed_journey = world.journey(Duration::hours(120), &[&vessel]);
        let confirmed = create_lead(
            &world.state,
            confirmed_journey.id,
            vessel.id,
            ben.id,
            world.now - Duration::hours(12),
        )
        .await
        .unwrap();
        confirm_assignment(&world.state, confirmed.id, Actor::Staff(ben.id), world.now)
            .await
            .unwrap();

        let report = reap(&world.state, world.now).await.unwrap();
        assert_eq!(report.released, 0);
        assert_eq!(status_of(&world, fresh.id).await, AssignmentStatus::Allocated);
        assert_eq!(status_of(&world, confirmed.id).await, AssignmentStatus::Confirmed);
    }

    #[tokio::test]
    async fn notifies_operator_when_enabled() {
        let world = World::with_policy(Policy {
            notify_operator_on_release: true,
            ..Policy::default()
        });
        stale_lead(&world, Duration::hours(80), 0).await;

        reap(&world.state, world.now).await.unwrap();
        let sent = world.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ops@harbour.test");
        assert!(sent[0].subject.contains("released"));
    }
}

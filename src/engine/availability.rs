use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::store::Datastore;

/// Whether `staff_id` is free to take a journey departing at `departs_at`.
pub async fn is_available(
    store: &dyn Datastore,
    staff_id: Uuid,
    departs_at: DateTime<Utc>,
    window: Duration,
) -> Result<bool, AppError> {
    Ok(find_conflict(store, staff_id, departs_at, window)
        .await?
        .is_none())
}

/// First active assignment of the staff member whose departure lies strictly
/// inside `window` of `departs_at`.
pub async fn find_conflict(
    store: &dyn Datastore,
    staff_id: Uuid,
    departs_at: DateTime<Utc>,
    window: Duration,
) -> Result<Option<Assignment>, AppError> {
    let held = store.active_assignments_for_staff(staff_id).await?;
    let mut departures: HashMap<Uuid, Option<DateTime<Utc>>> = HashMap::new();

    for assignment in held {
        let departure = match departures.get(&assignment.journey_id) {
            Some(known) => *known,
            None => {
                let looked_up = store
                    .journey(assignment.journey_id)
                    .await?
                    .map(|j| j.departs_at);
                departures.insert(assignment.journey_id, looked_up);
                looked_up
            }
        };

        let Some(other) = departure else {
            // Without a departure time the hold cannot be ruled out.
            warn!(
                staff_id = %staff_id,
                assignment_id = %assignment.id,
                journey_id = %assignment.journey_id,
                "active assignment references unknown journey; treating as conflict"
            );
            return Ok(Some(assignment));
        };

        if within_window(other, departs_at, window) {
            return Ok(Some(assignment));
        }
    }

    Ok(None)
}

/// Strict comparison: a gap of exactly `window` does not conflict.
pub fn within_window(a: DateTime<Utc>, b: DateTime<Utc>, window: Duration) -> bool {
    (a - b).abs() < window
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::{is_available, within_window};
    use crate::engine::assignment::create_lead;
    use crate::test_support::World;

    #[test]
    fn boundary_is_not_a_conflict() {
        let t = chrono::Utc::now();
        let window = Duration::hours(6);

        assert!(within_window(t, t, window));
        assert!(within_window(t, t + Duration::hours(6) - Duration::seconds(1), window));
        assert!(within_window(t, t - Duration::hours(5), window));
        assert!(!within_window(t, t + Duration::hours(6), window));
        assert!(!within_window(t, t - Duration::hours(6), window));
        assert!(!within_window(t, t + Duration::hours(7), window));
    }

    #[tokio::test]
    async fn active_assignment_blocks_nearby_departures_only() {
        let world = World::new();
        let vessel = world.vehicle("MV Osprey");
        let captain = world.staff("Ana", "captain");
        let journey = world.journey(Duration::hours(48), &[&vessel]);

        create_lead(&world.state, journey.id, vessel.id, captain.id, world.now)
            .await
            .unwrap();

        let store = world.store.as_ref();
        let window = Duration::hours(6);
        let t = journey.departs_at;

        for offset in [-5, -1, 0, 1, 5] {
            let departure = t + Duration::hours(offset);
            assert!(!is_available(store, captain.id, departure, window).await.unwrap());
        }
        for offset in [-7, -6, 6, 7, 24] {
            let departure = t + Duration::hours(offset);
            assert!(is_available(store, captain.id, departure, window).await.unwrap());
        }
    }

    #[tokio::test]
    async fn released_assignments_do_not_block() {
        let world = World::new();
        let vessel = world.vehicle("MV Osprey");
        let captain = world.staff("Ana", "captain");
        let journey = world.journey(Duration::hours(48), &[&vessel]);

        create_lead(&world.state, journey.id, vessel.id, captain.id, world.now)
            .await
            .unwrap();
        crate::engine::assignment::unassign(
            &world.state,
            crate::models::assignment::RoleKind::Lead,
            journey.id,
            vessel.id,
            captain.id,
            world.now,
        )
        .await
        .unwrap();

        assert!(
            is_available(
                world.store.as_ref(),
                captain.id,
                journey.departs_at,
                Duration::hours(6)
            )
            .await
            .unwrap()
        );
    }
}

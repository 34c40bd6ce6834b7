use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::Policy;
use crate::models::assignment::Assignment;
use crate::models::queue::AssignmentQueueItem;
use crate::models::staff::Staff;
use crate::state::AppState;

/// The outbox row the notification worker will pick up for a new lead. The
/// captain's address is captured now so later profile edits do not redirect
/// the mail. The row is written by the same store call that writes the lead.
pub fn notification_for(
    assignment: &Assignment,
    staff: &Staff,
    now: DateTime<Utc>,
) -> AssignmentQueueItem {
    AssignmentQueueItem {
        id: Uuid::new_v4(),
        journey_id: assignment.journey_id,
        vehicle_id: assignment.vehicle_id,
        staff_id: assignment.staff_id,
        recipient_email: staff.contact_email().map(str::to_string),
        created_at: now,
        claimed_at: None,
        processed_at: None,
        attempts: 0,
        next_attempt_at: None,
    }
}

pub fn record_enqueued(state: &AppState, assignment: &Assignment, item: &AssignmentQueueItem) {
    state.metrics.notifications_pending.inc();
    debug!(
        queue_item_id = %item.id,
        assignment_id = %assignment.id,
        "notification enqueued"
    );
}

/// Backoff before the next round for an item that has failed `attempts`
/// times already: the base delay doubled per failure, capped.
pub fn retry_delay(policy: &Policy, attempts: u32) -> Duration {
    let factor = 1i32.checked_shl(attempts.min(20)).unwrap_or(i32::MAX);
    policy
        .queue_retry_base
        .checked_mul(factor)
        .map_or(policy.queue_retry_max, |delay| delay.min(policy.queue_retry_max))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::retry_delay;
    use crate::config::Policy;

    #[test]
    fn retry_delay_doubles_then_caps() {
        let policy = Policy {
            queue_retry_base: Duration::minutes(1),
            queue_retry_max: Duration::minutes(10),
            ..Policy::default()
        };

        assert_eq!(retry_delay(&policy, 0), Duration::minutes(1));
        assert_eq!(retry_delay(&policy, 1), Duration::minutes(2));
        assert_eq!(retry_delay(&policy, 3), Duration::minutes(8));
        assert_eq!(retry_delay(&policy, 4), Duration::minutes(10));
        assert_eq!(retry_delay(&policy, u32::MAX), Duration::minutes(10));
    }
}

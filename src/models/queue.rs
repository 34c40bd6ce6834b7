use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbox row for a lead assignment that still needs its notifications sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentQueueItem {
    pub id: Uuid,
    pub journey_id: Uuid,
    pub vehicle_id: Uuid,
    pub staff_id: Uuid,
    pub recipient_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Failed delivery rounds so far.
    #[serde(default)]
    pub attempts: u32,
    /// Earliest time the worker may pick the item up again after a failure.
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl AssignmentQueueItem {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Unprocessed, not held by a live claim, and past any retry backoff.
    pub fn is_due(&self, now: DateTime<Utc>, stale_before: DateTime<Utc>) -> bool {
        !self.is_processed()
            && self.claimed_at.is_none_or(|claimed| claimed < stale_before)
            && self.next_attempt_at.is_none_or(|at| at <= now)
    }
}

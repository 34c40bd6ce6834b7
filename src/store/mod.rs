//! Data-access seam for the assignment engine.
//!
//! The engine never assumes the reads it made are still true when it writes.
//! Implementations must enforce the lead and per-staff uniqueness rules
//! themselves and honour the conditional updates below; the engine's own
//! pre-checks only exist to produce friendlier errors.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::journey::{Journey, JourneyEvent};
use crate::models::ledger::FairUseLedgerEntry;
use crate::models::queue::AssignmentQueueItem;
use crate::models::staff::{Operator, Staff};
use crate::models::vehicle::{Vehicle, VehicleStaffPreference};

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A row-level uniqueness constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Datastore: Send + Sync {
    async fn journey(&self, id: Uuid) -> StoreResult<Option<Journey>>;

    /// Active journeys departing in `[from, to]`, optionally for one operator.
    async fn journeys_departing_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        operator_id: Option<Uuid>,
    ) -> StoreResult<Vec<Journey>>;

    async fn vehicle(&self, id: Uuid) -> StoreResult<Option<Vehicle>>;

    async fn staff(&self, id: Uuid) -> StoreResult<Option<Staff>>;

    async fn operator_staff(&self, operator_id: Uuid) -> StoreResult<Vec<Staff>>;

    async fn operator(&self, id: Uuid) -> StoreResult<Option<Operator>>;

    async fn vehicle_preferences(&self, vehicle_id: Uuid)
    -> StoreResult<Vec<VehicleStaffPreference>>;

    /// Seats booked across every vehicle of the journey.
    async fn booked_seats(&self, journey_id: Uuid) -> StoreResult<u32>;

    async fn assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>>;

    async fn assignments(&self) -> StoreResult<Vec<Assignment>>;

    /// The non-released lead for a vehicle on a journey, if any.
    async fn active_lead(&self, journey_id: Uuid, vehicle_id: Uuid)
    -> StoreResult<Option<Assignment>>;

    /// The non-released assignment of any role held by `staff_id` on the pair.
    async fn active_assignment_for(
        &self,
        journey_id: Uuid,
        vehicle_id: Uuid,
        staff_id: Uuid,
    ) -> StoreResult<Option<Assignment>>;

    async fn active_assignments_for_staff(&self, staff_id: Uuid) -> StoreResult<Vec<Assignment>>;

    async fn leads_with_status(&self, status: AssignmentStatus) -> StoreResult<Vec<Assignment>>;

    /// Fails with [`StoreError::UniqueViolation`] when the row would create a
    /// second active lead for the pair or a second active row for the staff.
    async fn insert_assignment(&self, assignment: &Assignment) -> StoreResult<()>;

    /// Replaces the stored row only if it still has `expected_status` and
    /// `expected_staff`. Returns whether the write happened.
    async fn update_assignment_if(
        &self,
        next: &Assignment,
        expected_status: AssignmentStatus,
        expected_staff: Uuid,
    ) -> StoreResult<bool>;

    /// Inserts a lead together with its outbox row. Nothing is written when
    /// the lead breaks a uniqueness rule.
    async fn insert_lead(
        &self,
        lead: &Assignment,
        notification: &AssignmentQueueItem,
    ) -> StoreResult<()>;

    /// [`Datastore::update_assignment_if`] plus the outbox row for the new
    /// holder, written together or not at all.
    async fn reassign_lead_if(
        &self,
        next: &Assignment,
        expected_status: AssignmentStatus,
        expected_staff: Uuid,
        notification: &AssignmentQueueItem,
    ) -> StoreResult<bool>;

    /// Moves an allocated assignment held by `confirmed.staff_id` to
    /// `confirmed`, appends `event` and upserts the ledger `entry` as one
    /// write. Returns false, writing nothing, when the row no longer matches.
    async fn confirm_assignment_if(
        &self,
        confirmed: &Assignment,
        event: &JourneyEvent,
        entry: &FairUseLedgerEntry,
    ) -> StoreResult<bool>;

    async fn delete_assignment(&self, id: Uuid) -> StoreResult<bool>;

    async fn append_journey_event(&self, event: &JourneyEvent) -> StoreResult<()>;

    async fn journey_events(&self, journey_id: Uuid) -> StoreResult<Vec<JourneyEvent>>;

    async fn ledger_entry_for(
        &self,
        journey_id: Uuid,
        vehicle_id: Uuid,
        staff_id: Uuid,
    ) -> StoreResult<Option<FairUseLedgerEntry>>;

    /// One row per `(journey, vehicle, staff)`: an existing row takes the
    /// entry's `confirmed` flag and is returned, otherwise `entry` is inserted.
    async fn upsert_ledger_entry(&self, entry: &FairUseLedgerEntry)
    -> StoreResult<FairUseLedgerEntry>;

    async fn set_ledger_confirmed(&self, id: Uuid, confirmed: bool) -> StoreResult<bool>;

    async fn operator_ledger(&self, operator_id: Uuid) -> StoreResult<Vec<FairUseLedgerEntry>>;

    async fn queue_item(&self, id: Uuid) -> StoreResult<Option<AssignmentQueueItem>>;

    /// Oldest unprocessed items first.
    async fn unprocessed_queue_items(&self, limit: usize) -> StoreResult<Vec<AssignmentQueueItem>>;

    /// Oldest items the worker may pick up at `now`: unprocessed, unclaimed or
    /// claimed before `stale_before`, and past their retry backoff.
    async fn due_queue_items(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<AssignmentQueueItem>>;

    async fn unprocessed_queue_len(&self) -> StoreResult<usize>;

    /// Sets `claimed_at = now` if the item is unprocessed and either unclaimed
    /// or claimed before `stale_before`.
    async fn claim_queue_item(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Clears the claim after a failed round, bumps `attempts` and holds the
    /// item back until `retry_at`.
    async fn defer_queue_item(&self, id: Uuid, retry_at: DateTime<Utc>) -> StoreResult<()>;

    /// Sets `processed_at = now` only if it is still null.
    async fn mark_queue_processed(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;
}

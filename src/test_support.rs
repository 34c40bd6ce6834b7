//! Seeding helpers shared by the engine's unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::Policy;
use crate::mail::{MailError, Mailer};
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::journey::{Booking, Journey, JourneyEvent};
use crate::models::ledger::FairUseLedgerEntry;
use crate::models::queue::AssignmentQueueItem;
use crate::models::staff::{Operator, Staff};
use crate::models::vehicle::{Vehicle, VehicleStaffPreference};
use crate::state::AppState;
use crate::store::{Datastore, MemoryStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
}

/// Records every send; addresses in `failing` are rejected.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    attempts: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingMailer {
    pub fn fail_for(&self, to: &str) {
        self.failing.lock().unwrap().insert(to.to_string());
    }

    pub fn recover(&self, to: &str) {
        self.failing.lock().unwrap().remove(to);
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts_to(&self, to: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|addr| addr.as_str() == to)
            .count()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), MailError> {
        self.attempts.lock().unwrap().push(to.to_string());
        if self.failing.lock().unwrap().contains(to) {
            return Err(MailError::Rejected {
                to: to.to_string(),
                reason: "mailbox unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
        });
        Ok(())
    }
}

pub struct World {
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<RecordingMailer>,
    pub state: Arc<AppState>,
    pub operator: Operator,
    pub now: DateTime<Utc>,
}

impl World {
    pub fn new() -> Self {
        Self::with_policy(Policy::default())
    }

    pub fn with_policy(policy: Policy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let state = Arc::new(AppState::new(store.clone(), mailer.clone(), policy, 64));

        let operator = Operator {
            id: Uuid::new_v4(),
            name: "Harbour Lines".to_string(),
            admin_email: Some("ops@harbour.test".to_string()),
        };
        store.put_operator(operator.clone());

        Self {
            store,
            mailer,
            state,
            operator,
            now: Utc::now(),
        }
    }

    pub fn vehicle(&self, name: &str) -> Vehicle {
        let vehicle = Vehicle {
            id: Uuid::new_v4(),
            operator_id: self.operator.id,
            name: name.to_string(),
            active: true,
        };
        self.store.put_vehicle(vehicle.clone());
        vehicle
    }

    pub fn staff(&self, name: &str, role: &str) -> Staff {
        let staff = Staff {
            id: Uuid::new_v4(),
            operator_id: self.operator.id,
            name: name.to_string(),
            role: role.to_string(),
            active: true,
            email: Some(format!("{}@harbour.test", name.to_lowercase())),
            account_id: None,
        };
        self.store.put_staff(staff.clone());
        staff
    }

    pub fn journey(&self, departs_in: Duration, vehicles: &[&Vehicle]) -> Journey {
        let journey = Journey {
            id: Uuid::new_v4(),
            route_id: Uuid::new_v4(),
            operator_id: self.operator.id,
            departs_at: self.now + departs_in,
            active: true,
            vehicle_ids: vehicles.iter().map(|v| v.id).collect(),
        };
        self.store.put_journey(journey.clone());
        journey
    }

    pub fn prefer(&self, vehicle: &Vehicle, staff: &Staff, priority: u32) {
        self.store.put_preference(VehicleStaffPreference {
            vehicle_id: vehicle.id,
            staff_id: staff.id,
            priority,
            is_lead_eligible: true,
        });
    }

    pub fn book(&self, journey: &Journey, vehicle: &Vehicle, seats: u32) {
        self.store.put_booking(Booking {
            id: Uuid::new_v4(),
            journey_id: journey.id,
            vehicle_id: vehicle.id,
            seats,
        });
    }
}

/// Wraps a [`MemoryStore`] and fails queue writes for chosen items.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing_claims: Mutex<HashSet<Uuid>>,
    failing_marks: Mutex<HashSet<Uuid>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_claims: Mutex::new(HashSet::new()),
            failing_marks: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_claim(&self, id: Uuid) {
        self.failing_claims.lock().unwrap().insert(id);
    }

    pub fn fail_mark(&self, id: Uuid) {
        self.failing_marks.lock().unwrap().insert(id);
    }

    fn outage(what: &str, id: Uuid) -> StoreError {
        StoreError::Backend(format!("{what} {id}: connection reset"))
    }
}

#[async_trait]
impl Datastore for FlakyStore {
    async fn journey(&self, id: Uuid) -> StoreResult<Option<Journey>> {
        self.inner.journey(id).await
    }

    async fn journeys_departing_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        operator_id: Option<Uuid>,
    ) -> StoreResult<Vec<Journey>> {
        self.inner.journeys_departing_between(from, to, operator_id).await
    }

    async fn vehicle(&self, id: Uuid) -> StoreResult<Option<Vehicle>> {
        self.inner.vehicle(id).await
    }

    async fn staff(&self, id: Uuid) -> StoreResult<Option<Staff>> {
        self.inner.staff(id).await
    }

    async fn operator_staff(&self, operator_id: Uuid) -> StoreResult<Vec<Staff>> {
        self.inner.operator_staff(operator_id).await
    }

    async fn operator(&self, id: Uuid) -> StoreResult<Option<Operator>> {
        self.inner.operator(id).await
    }

    async fn vehicle_preferences(
        &self,
        vehicle_id: Uuid,
    ) -> StoreResult<Vec<VehicleStaffPreference>> {
        self.inner.vehicle_preferences(vehicle_id).await
    }

    async fn booked_seats(&self, journey_id: Uuid) -> StoreResult<u32> {
        self.inner.booked_seats(journey_id).await
    }

    async fn assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        self.inner.assignment(id).await
    }

    async fn assignments(&self) -> StoreResult<Vec<Assignment>> {
        self.inner.assignments().await
    }

    async fn active_lead(
        &self,
        journey_id: Uuid,
        vehicle_id: Uuid,
    ) -> StoreResult<Option<Assignment>> {
        self.inner.active_lead(journey_id, vehicle_id).await
    }

    async fn active_assignment_for(
        &self,
        journey_id: Uuid,
        vehicle_id: Uuid,
        staff_id: Uuid,
    ) -> StoreResult<Option<Assignment>> {
        self.inner
            .active_assignment_for(journey_id, vehicle_id, staff_id)
            .await
    }

    async fn active_assignments_for_staff(&self, staff_id: Uuid) -> StoreResult<Vec<Assignment>> {
        self.inner.active_assignments_for_staff(staff_id).await
    }

    async fn leads_with_status(&self, status: AssignmentStatus) -> StoreResult<Vec<Assignment>> {
        self.inner.leads_with_status(status).await
    }

    async fn insert_assignment(&self, assignment: &Assignment) -> StoreResult<()> {
        self.inner.insert_assignment(assignment).await
    }

    async fn update_assignment_if(
        &self,
        next: &Assignment,
        expected_status: AssignmentStatus,
        expected_staff: Uuid,
    ) -> StoreResult<bool> {
        self.inner
            .update_assignment_if(next, expected_status, expected_staff)
            .await
    }

    async fn insert_lead(
        &self,
        lead: &Assignment,
        notification: &AssignmentQueueItem,
    ) -> StoreResult<()> {
        self.inner.insert_lead(lead, notification).await
    }

    async fn reassign_lead_if(
        &self,
        next: &Assignment,
        expected_status: AssignmentStatus,
        expected_staff: Uuid,
        notification: &AssignmentQueueItem,
    ) -> StoreResult<bool> {
        self.inner
            .reassign_lead_if(next, expected_status, expected_staff, notification)
            .await
    }

    async fn confirm_assignment_if(
        &self,
        confirmed: &Assignment,
        event: &JourneyEvent,
        entry: &FairUseLedgerEntry,
    ) -> StoreResult<bool> {
        self.inner.confirm_assignment_if(confirmed, event, entry).await
    }

    async fn delete_assignment(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.delete_assignment(id).await
    }

    async fn append_journey_event(&self, event: &JourneyEvent) -> StoreResult<()> {
        self.inner.append_journey_event(event).await
    }

    async fn journey_events(&self, journey_id: Uuid) -> StoreResult<Vec<JourneyEvent>> {
        self.inner.journey_events(journey_id).await
    }

    async fn ledger_entry_for(
        &self,
        journey_id: Uuid,
        vehicle_id: Uuid,
        staff_id: Uuid,
    ) -> StoreResult<Option<FairUseLedgerEntry>> {
        self.inner.ledger_entry_for(journey_id, vehicle_id, staff_id).await
    }

    async fn upsert_ledger_entry(
        &self,
        entry: &FairUseLedgerEntry,
    ) -> StoreResult<FairUseLedgerEntry> {
        self.inner.upsert_ledger_entry(entry).await
    }

    async fn set_ledger_confirmed(&self, id: Uuid, confirmed: bool) -> StoreResult<bool> {
        self.inner.set_ledger_confirmed(id, confirmed).await
    }

    async fn operator_ledger(&self, operator_id: Uuid) -> StoreResult<Vec<FairUseLedgerEntry>> {
        self.inner.operator_ledger(operator_id).await
    }

    async fn queue_item(&self, id: Uuid) -> StoreResult<Option<AssignmentQueueItem>> {
        self.inner.queue_item(id).await
    }

    async fn unprocessed_queue_items(&self, limit: usize) -> StoreResult<Vec<AssignmentQueueItem>> {
        self.inner.unprocessed_queue_items(limit).await
    }

    async fn due_queue_items(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<AssignmentQueueItem>> {
        self.inner.due_queue_items(limit, now, stale_before).await
    }

    async fn unprocessed_queue_len(&self) -> StoreResult<usize> {
        self.inner.unprocessed_queue_len().await
    }

    async fn claim_queue_item(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        if self.failing_claims.lock().unwrap().contains(&id) {
            return Err(Self::outage("claim", id));
        }
        self.inner.claim_queue_item(id, now, stale_before).await
    }

    async fn defer_queue_item(&self, id: Uuid, retry_at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.defer_queue_item(id, retry_at).await
    }

    async fn mark_queue_processed(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        if self.failing_marks.lock().unwrap().contains(&id) {
            return Err(Self::outage("mark", id));
        }
        self.inner.mark_queue_processed(id, now).await
    }
}

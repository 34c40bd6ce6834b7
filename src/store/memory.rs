use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::models::assignment::{Assignment, AssignmentStatus, RoleKind};
use crate::models::journey::{Booking, Journey, JourneyEvent};
use crate::models::ledger::FairUseLedgerEntry;
use crate::models::queue::AssignmentQueueItem;
use crate::models::staff::{Operator, Staff};
use crate::models::vehicle::{Vehicle, VehicleStaffPreference};
use crate::store::{Datastore, StoreError, StoreResult};

/// Reference data used to seed a [`MemoryStore`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub operators: Vec<Operator>,
    pub vehicles: Vec<Vehicle>,
    pub staff: Vec<Staff>,
    pub journeys: Vec<Journey>,
    pub preferences: Vec<VehicleStaffPreference>,
    pub bookings: Vec<Booking>,
}

/// In-process datastore with the same uniqueness and conditional-update
/// contract an external database provides.
#[derive(Default)]
pub struct MemoryStore {
    operators: DashMap<Uuid, Operator>,
    vehicles: DashMap<Uuid, Vehicle>,
    staff: DashMap<Uuid, Staff>,
    journeys: DashMap<Uuid, Journey>,
    preferences: DashMap<(Uuid, Uuid), VehicleStaffPreference>,
    bookings: DashMap<Uuid, Booking>,
    assignments: DashMap<Uuid, Assignment>,
    journey_events: DashMap<Uuid, JourneyEvent>,
    ledger: DashMap<Uuid, FairUseLedgerEntry>,
    queue: DashMap<Uuid, AssignmentQueueItem>,
    // Serialises writes that check constraints spanning several rows.
    constraint_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let store = Self::new();
        for operator in fixture.operators {
            store.put_operator(operator);
        }
        for vehicle in fixture.vehicles {
            store.put_vehicle(vehicle);
        }
        for staff in fixture.staff {
            store.put_staff(staff);
        }
        for journey in fixture.journeys {
            store.put_journey(journey);
        }
        for preference in fixture.preferences {
            store.put_preference(preference);
        }
        for booking in fixture.bookings {
            store.put_booking(booking);
        }
        store
    }

    pub async fn load_fixture(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| StoreError::Backend(format!("read {}: {err}", path.display())))?;
        let fixture: Fixture = serde_json::from_str(&raw)
            .map_err(|err| StoreError::Backend(format!("parse {}: {err}", path.display())))?;

        info!(
            path = %path.display(),
            journeys = fixture.journeys.len(),
            staff = fixture.staff.len(),
            vehicles = fixture.vehicles.len(),
            "fixture loaded"
        );

        Ok(Self::from_fixture(fixture))
    }

    pub fn put_operator(&self, operator: Operator) {
        self.operators.insert(operator.id, operator);
    }

    pub fn put_vehicle(&self, vehicle: Vehicle) {
        self.vehicles.insert(vehicle.id, vehicle);
    }

    pub fn put_staff(&self, staff: Staff) {
        self.staff.insert(staff.id, staff);
    }

    pub fn put_journey(&self, journey: Journey) {
        self.journeys.insert(journey.id, journey);
    }

    pub fn put_preference(&self, preference: VehicleStaffPreference) {
        self.preferences
            .insert((preference.vehicle_id, preference.staff_id), preference);
    }

    pub fn put_booking(&self, booking: Booking) {
        self.bookings.insert(booking.id, booking);
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.constraint_lock
            .lock()
            .map_err(|_| StoreError::Backend("constraint lock poisoned".to_string()))
    }

    /// Checks the active-row constraints against every row except `skip`.
    fn check_assignment_constraints(&self, candidate: &Assignment, skip: Option<Uuid>) -> StoreResult<()> {
        if !candidate.is_active() {
            return Ok(());
        }

        for entry in self.assignments.iter() {
            let existing = entry.value();
            if Some(existing.id) == skip
                || !existing.is_active()
                || existing.journey_id != candidate.journey_id
                || existing.vehicle_id != candidate.vehicle_id
            {
                continue;
            }

            if existing.role == RoleKind::Lead && candidate.role == RoleKind::Lead {
                return Err(StoreError::UniqueViolation(format!(
                    "journey {} vehicle {} already has lead {}",
                    candidate.journey_id, candidate.vehicle_id, existing.id
                )));
            }

            if existing.staff_id == candidate.staff_id {
                return Err(StoreError::UniqueViolation(format!(
                    "staff {} already assigned to journey {} vehicle {}",
                    candidate.staff_id, candidate.journey_id, candidate.vehicle_id
                )));
            }
        }

        Ok(())
    }

    fn ensure_queue_id_free(&self, item: &AssignmentQueueItem) -> StoreResult<()> {
        if self.queue.contains_key(&item.id) {
            return Err(StoreError::UniqueViolation(format!(
                "queue item {} already exists",
                item.id
            )));
        }
        Ok(())
    }

    /// Whether the stored row still has the expected holder and status.
    fn assignment_matches(&self, id: Uuid, status: AssignmentStatus, staff_id: Uuid) -> bool {
        self.assignments
            .get(&id)
            .is_some_and(|current| current.status == status && current.staff_id == staff_id)
    }

    /// Caller holds the constraint lock.
    fn upsert_ledger_locked(&self, entry: &FairUseLedgerEntry) -> FairUseLedgerEntry {
        let existing = self
            .ledger
            .iter()
            .find(|row| {
                let e = row.value();
                e.journey_id == entry.journey_id
                    && e.vehicle_id == entry.vehicle_id
                    && e.staff_id == entry.staff_id
            })
            .map(|row| *row.key());

        match existing.and_then(|id| self.ledger.get_mut(&id)) {
            Some(mut row) => {
                row.confirmed = entry.confirmed;
                row.clone()
            }
            None => {
                self.ledger.insert(entry.id, entry.clone());
                entry.clone()
            }
        }
    }

    fn collect_assignments<F>(&self, keep: F) -> Vec<Assignment>
    where
        F: Fn(&Assignment) -> bool,
    {
        let mut rows: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|a| (a.assigned_at, a.id));
        rows
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn journey(&self, id: Uuid) -> StoreResult<Option<Journey>> {
        Ok(self.journeys.get(&id).map(|j| j.value().clone()))
    }

    async fn journeys_departing_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        operator_id: Option<Uuid>,
    ) -> StoreResult<Vec<Journey>> {
        let mut journeys: Vec<Journey> = self
            .journeys
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|j| j.active && j.departs_at >= from && j.departs_at <= to)
            .filter(|j| operator_id.is_none_or(|op| j.operator_id == op))
            .collect();
        journeys.sort_by_key(|j| (j.departs_at, j.id));
        Ok(journeys)
    }

    async fn vehicle(&self, id: Uuid) -> StoreResult<Option<Vehicle>> {
        Ok(self.vehicles.get(&id).map(|v| v.value().clone()))
    }

    async fn staff(&self, id: Uuid) -> StoreResult<Option<Staff>> {
        Ok(self.staff.get(&id).map(|s| s.value().clone()))
    }

    async fn operator_staff(&self, operator_id: Uuid) -> StoreResult<Vec<Staff>> {
        Ok(self
            .staff
            .iter()
            .filter(|entry| entry.value().operator_id == operator_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn operator(&self, id: Uuid) -> StoreResult<Option<Operator>> {
        Ok(self.operators.get(&id).map(|o| o.value().clone()))
    }

    async fn vehicle_preferences(
        &self,
        vehicle_id: Uuid,
    ) -> StoreResult<Vec<VehicleStaffPreference>> {
        Ok(self
            .preferences
            .iter()
            .filter(|entry| entry.key().0 == vehicle_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn booked_seats(&self, journey_id: Uuid) -> StoreResult<u32> {
        Ok(self
            .bookings
            .iter()
            .filter(|entry| entry.value().journey_id == journey_id)
            .fold(0u32, |total, entry| total.saturating_add(entry.value().seats)))
    }

    async fn assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        Ok(self.assignments.get(&id).map(|a| a.value().clone()))
    }

    async fn assignments(&self) -> StoreResult<Vec<Assignment>> {
        Ok(self.collect_assignments(|_| true))
    }

    async fn active_lead(
        &self,
        journey_id: Uuid,
        vehicle_id: Uuid,
    ) -> StoreResult<Option<Assignment>> {
        Ok(self
            .collect_assignments(|a| {
                a.role == RoleKind::Lead
                    && a.is_active()
                    && a.journey_id == journey_id
                    && a.vehicle_id == vehicle_id
            })
            .into_iter()
            .next())
    }

    async fn active_assignment_for(
        &self,
        journey_id: Uuid,
        vehicle_id: Uuid,
        staff_id: Uuid,
    ) -> StoreResult<Option<Assignment>> {
        Ok(self
            .collect_assignments(|a| {
                a.is_active()
                    && a.journey_id == journey_id
                    && a.vehicle_id == vehicle_id
                    && a.staff_id == staff_id
            })
            .into_iter()
            .next())
    }

    async fn active_assignments_for_staff(&self, staff_id: Uuid) -> StoreResult<Vec<Assignment>> {
        Ok(self.collect_assignments(|a| a.is_active() && a.staff_id == staff_id))
    }

    async fn leads_with_status(&self, status: AssignmentStatus) -> StoreResult<Vec<Assignment>> {
        Ok(self.collect_assignments(|a| a.role == RoleKind::Lead && a.status == status))
    }

    async fn insert_assignment(&self, assignment: &Assignment) -> StoreResult<()> {
        let _guard = self.lock()?;

        if self.assignments.contains_key(&assignment.id) {
            return Err(StoreError::UniqueViolation(format!(
                "assignment {} already exists",
                assignment.id
            )));
        }
        self.check_assignment_constraints(assignment, None)?;
        self.assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn update_assignment_if(
        &self,
        next: &Assignment,
        expected_status: AssignmentStatus,
        expected_staff: Uuid,
    ) -> StoreResult<bool> {
        let _guard = self.lock()?;

        if !self.assignment_matches(next.id, expected_status, expected_staff) {
            return Ok(false);
        }

        self.check_assignment_constraints(next, Some(next.id))?;
        self.assignments.insert(next.id, next.clone());
        Ok(true)
    }

    async fn insert_lead(
        &self,
        lead: &Assignment,
        notification: &AssignmentQueueItem,
    ) -> StoreResult<()> {
        let _guard = self.lock()?;

        if self.assignments.contains_key(&lead.id) {
            return Err(StoreError::UniqueViolation(format!(
                "assignment {} already exists",
                lead.id
            )));
        }
        self.check_assignment_constraints(lead, None)?;
        self.ensure_queue_id_free(notification)?;

        self.assignments.insert(lead.id, lead.clone());
        self.queue.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn reassign_lead_if(
        &self,
        next: &Assignment,
        expected_status: AssignmentStatus,
        expected_staff: Uuid,
        notification: &AssignmentQueueItem,
    ) -> StoreResult<bool> {
        let _guard = self.lock()?;

        if !self.assignment_matches(next.id, expected_status, expected_staff) {
            return Ok(false);
        }
        self.check_assignment_constraints(next, Some(next.id))?;
        self.ensure_queue_id_free(notification)?;

        self.assignments.insert(next.id, next.clone());
        self.queue.insert(notification.id, notification.clone());
        Ok(true)
    }

    async fn confirm_assignment_if(
        &self,
        confirmed: &Assignment,
        event: &JourneyEvent,
        entry: &FairUseLedgerEntry,
    ) -> StoreResult<bool> {
        let _guard = self.lock()?;

        if !self.assignment_matches(confirmed.id, AssignmentStatus::Allocated, confirmed.staff_id) {
            return Ok(false);
        }

        self.assignments.insert(confirmed.id, confirmed.clone());
        self.journey_events.insert(event.id, event.clone());
        self.upsert_ledger_locked(entry);
        Ok(true)
    }

    async fn delete_assignment(&self, id: Uuid) -> StoreResult<bool> {
        let _guard = self.lock()?;
        Ok(self.assignments.remove(&id).is_some())
    }

    async fn append_journey_event(&self, event: &JourneyEvent) -> StoreResult<()> {
        self.journey_events.insert(event.id, event.clone());
        Ok(())
    }

    async fn journey_events(&self, journey_id: Uuid) -> StoreResult<Vec<JourneyEvent>> {
        let mut events: Vec<JourneyEvent> = self
            .journey_events
            .iter()
            .filter(|entry| entry.value().journey_id == journey_id)
            .map(|entry| entry.value().clone())
            .collect();
        events.sort_by_key(|e| (e.occurred_at, e.id));
        Ok(events)
    }

    async fn ledger_entry_for(
        &self,
        journey_id: Uuid,
        vehicle_id: Uuid,
        staff_id: Uuid,
    ) -> StoreResult<Option<FairUseLedgerEntry>> {
        Ok(self
            .ledger
            .iter()
            .find(|entry| {
                let e = entry.value();
                e.journey_id == journey_id && e.vehicle_id == vehicle_id && e.staff_id == staff_id
            })
            .map(|entry| entry.value().clone()))
    }

    async fn upsert_ledger_entry(
        &self,
        entry: &FairUseLedgerEntry,
    ) -> StoreResult<FairUseLedgerEntry> {
        let _guard = self.lock()?;
        Ok(self.upsert_ledger_locked(entry))
    }

    async fn set_ledger_confirmed(&self, id: Uuid, confirmed: bool) -> StoreResult<bool> {
        match self.ledger.get_mut(&id) {
            Some(mut entry) => {
                entry.confirmed = confirmed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn operator_ledger(&self, operator_id: Uuid) -> StoreResult<Vec<FairUseLedgerEntry>> {
        let mut entries: Vec<FairUseLedgerEntry> = self
            .ledger
            .iter()
            .filter(|entry| entry.value().operator_id == operator_id)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|e| (e.recorded_at, e.id));
        Ok(entries)
    }

    async fn queue_item(&self, id: Uuid) -> StoreResult<Option<AssignmentQueueItem>> {
        Ok(self.queue.get(&id).map(|item| item.value().clone()))
    }

    async fn unprocessed_queue_items(&self, limit: usize) -> StoreResult<Vec<AssignmentQueueItem>> {
        let mut items: Vec<AssignmentQueueItem> = self
            .queue
            .iter()
            .filter(|entry| !entry.value().is_processed())
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by_key(|item| (item.created_at, item.id));
        items.truncate(limit);
        Ok(items)
    }

    async fn due_queue_items(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<AssignmentQueueItem>> {
        let mut items: Vec<AssignmentQueueItem> = self
            .queue
            .iter()
            .filter(|entry| entry.value().is_due(now, stale_before))
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by_key(|item| (item.created_at, item.id));
        items.truncate(limit);
        Ok(items)
    }

    async fn unprocessed_queue_len(&self) -> StoreResult<usize> {
        Ok(self
            .queue
            .iter()
            .filter(|entry| !entry.value().is_processed())
            .count())
    }

    async fn claim_queue_item(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let Some(mut item) = self.queue.get_mut(&id) else {
            return Ok(false);
        };

        let claimable = item.is_due(now, stale_before);
        if claimable {
            item.claimed_at = Some(now);
        }
        Ok(claimable)
    }

    async fn defer_queue_item(&self, id: Uuid, retry_at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(mut item) = self.queue.get_mut(&id) {
            item.claimed_at = None;
            item.attempts = item.attempts.saturating_add(1);
            item.next_attempt_at = Some(retry_at);
        }
        Ok(())
    }

    async fn mark_queue_processed(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let Some(mut item) = self.queue.get_mut(&id) else {
            return Ok(false);
        };

        if item.is_processed() {
            return Ok(false);
        }
        item.processed_at = Some(now);
        Ok(true)
    }
}

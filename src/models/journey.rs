use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scheduled departure. Produced by schedule generation; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journey {
    pub id: Uuid,
    pub route_id: Uuid,
    pub operator_id: Uuid,
    pub departs_at: DateTime<Utc>,
    pub active: bool,
    #[serde(default)]
    pub vehicle_ids: Vec<Uuid>,
}

impl Journey {
    pub fn schedules_vehicle(&self, vehicle_id: Uuid) -> bool {
        self.vehicle_ids.contains(&vehicle_id)
    }
}

/// Seats booked on one vehicle of a journey by the checkout flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub journey_id: Uuid,
    pub vehicle_id: Uuid,
    pub seats: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JourneyEventKind {
    Accepted,
    Released,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyEvent {
    pub id: Uuid,
    pub journey_id: Uuid,
    pub vehicle_id: Uuid,
    pub staff_id: Uuid,
    pub kind: JourneyEventKind,
    pub occurred_at: DateTime<Utc>,
}

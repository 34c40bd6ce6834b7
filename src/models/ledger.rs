use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairUseLedgerEntry {
    pub id: Uuid,
    pub operator_id: Uuid,
    pub staff_id: Uuid,
    pub vehicle_id: Uuid,
    pub journey_id: Uuid,
    pub confirmed: bool,
    pub recorded_at: DateTime<Utc>,
}

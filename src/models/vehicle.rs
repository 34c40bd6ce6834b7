use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub operator_id: Uuid,
    pub name: String,
    pub active: bool,
}

/// A staff member the operator prefers on a vehicle. Lower priority ranks first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleStaffPreference {
    pub vehicle_id: Uuid,
    pub staff_id: Uuid,
    pub priority: u32,
    pub is_lead_eligible: bool,
}

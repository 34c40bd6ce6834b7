use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Lead,
    Crew,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Allocated,
    Confirmed,
    Released,
}

impl AssignmentStatus {
    /// Allocated and confirmed assignments hold the staff member's time.
    pub fn is_active(self) -> bool {
        !matches!(self, AssignmentStatus::Released)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub journey_id: Uuid,
    pub vehicle_id: Uuid,
    pub staff_id: Uuid,
    pub role: RoleKind,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn allocate(
        journey_id: Uuid,
        vehicle_id: Uuid,
        staff_id: Uuid,
        role: RoleKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            journey_id,
            vehicle_id,
            staff_id,
            role,
            status: AssignmentStatus::Allocated,
            assigned_at: now,
            confirmed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentChange {
    Created,
    Reassigned,
    Confirmed,
    Released,
    Removed,
}

/// Broadcast to live subscribers whenever an assignment changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub change: AssignmentChange,
    pub assignment: Assignment,
    pub at: DateTime<Utc>,
}

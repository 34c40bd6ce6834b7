use serde::{Deserialize, Serialize};
use uuid::Uuid;

const CAPTAIN_LIKE_ROLES: [&str; 4] = ["captain", "skipper", "master", "lead"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staff {
    pub id: Uuid,
    pub operator_id: Uuid,
    pub name: String,
    pub role: String,
    pub active: bool,
    pub email: Option<String>,
    pub account_id: Option<Uuid>,
}

impl Staff {
    /// Whether the job role reads like one that can command a vehicle.
    pub fn is_captain_like(&self) -> bool {
        let role = self.role.to_lowercase();
        CAPTAIN_LIKE_ROLES.iter().any(|needle| role.contains(needle))
    }

    pub fn contact_email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: Uuid,
    pub name: String,
    pub admin_email: Option<String>,
}

impl Operator {
    pub fn contact_email(&self) -> Option<&str> {
        self.admin_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::Staff;

    fn with_role(role: &str) -> Staff {
        Staff {
            id: Uuid::new_v4(),
            operator_id: Uuid::new_v4(),
            name: "Sam".to_string(),
            role: role.to_string(),
            active: true,
            email: None,
            account_id: None,
        }
    }

    #[test]
    fn captain_like_roles_match_case_insensitively() {
        assert!(with_role("Captain").is_captain_like());
        assert!(with_role("Relief SKIPPER").is_captain_like());
        assert!(with_role("harbour master").is_captain_like());
        assert!(!with_role("deckhand").is_captain_like());
        assert!(!with_role("steward").is_captain_like());
    }

    #[test]
    fn blank_email_is_not_a_contact() {
        let mut staff = with_role("captain");
        staff.email = Some("   ".to_string());
        assert_eq!(staff.contact_email(), None);

        staff.email = Some(" sam@example.com ".to_string());
        assert_eq!(staff.contact_email(), Some("sam@example.com"));
    }
}

//! Principal Entity
//!
//! A dashboard user: unique username and email, an Argon2id credential hash
//! and exactly one role.

use chrono::{DateTime, Utc};

use crate::role::entity::{Role, RoleHolder};
use crate::TsidGenerator;

#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    /// TSID
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    /// Argon2id PHC string; never leaves the platform
    pub password_hash: String,
    pub role: Role,
    /// Inactive principals cannot log in or refresh
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl Principal {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
        role: Role,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TsidGenerator::generate(),
            username: username.into(),
            email: email.into().to_lowercase(),
            full_name: None,
            password_hash: password_hash.into(),
            role,
            active: true,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    pub fn with_full_name(mut self, full_name: Option<String>) -> Self {
        self.full_name = full_name.filter(|n| !n.trim().is_empty());
        self
    }

    /// Assign a new role. Returns the previous one.
    pub fn change_role(&mut self, role: Role) -> Role {
        let previous = self.role;
        self.role = role;
        self.updated_at = Utc::now();
        previous
    }

    pub fn activate(&mut self) {
        self.active = true;
        self.updated_at = Utc::now();
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.updated_at = Utc::now();
    }

    pub fn record_login(&mut self) {
        self.last_login_at = Some(Utc::now());
    }

    /// Case-insensitive match on username or email
    pub fn matches_login(&self, login: &str) -> bool {
        self.username.eq_ignore_ascii_case(login) || self.email.eq_ignore_ascii_case(login)
    }
}

impl RoleHolder for Principal {
    fn role(&self) -> Role {
        self.role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_principal_defaults() {
        let p = Principal::new("dana", "Dana@Example.com", "$argon2id$hash", Role::Viewer);
        assert_eq!(p.id.len(), 13);
        assert_eq!(p.email, "dana@example.com");
        assert!(p.active);
        assert!(p.last_login_at.is_none());
    }

    #[test]
    fn test_change_role_returns_previous() {
        let mut p = Principal::new("dana", "dana@example.com", "h", Role::Viewer);
        let previous = p.change_role(Role::Manager);
        assert_eq!(previous, Role::Viewer);
        assert_eq!(p.role, Role::Manager);
    }

    #[test]
    fn test_matches_login() {
        let p = Principal::new("Dana", "dana@example.com", "h", Role::Viewer);
        assert!(p.matches_login("dana"));
        assert!(p.matches_login("DANA@example.com"));
        assert!(!p.matches_login("dan"));
    }

    #[test]
    fn test_blank_full_name_is_dropped() {
        let p = Principal::new("dana", "dana@example.com", "h", Role::Viewer)
            .with_full_name(Some("  ".to_string()));
        assert!(p.full_name.is_none());
    }
}

//! Audit Log Entity
//!
//! Records security-relevant actions: sign-ins, token lifecycle events and
//! administrative changes to principals.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::PlatformError;
use crate::TsidGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Login,
    LoginFailed,
    TokenIssued,
    TokenRefreshed,
    TokenRevoked,
    /// A rotated refresh token was presented again
    TokenReuseDetected,
    LogoutAll,
    PrincipalCreated,
    RoleChanged,
    PrincipalActivated,
    PrincipalDeactivated,
    PrincipalDeleted,
    /// Runtime settings changed through the admin API
    SettingsUpdated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Login => "LOGIN",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::TokenIssued => "TOKEN_ISSUED",
            AuditAction::TokenRefreshed => "TOKEN_REFRESHED",
            AuditAction::TokenRevoked => "TOKEN_REVOKED",
            AuditAction::TokenReuseDetected => "TOKEN_REUSE_DETECTED",
            AuditAction::LogoutAll => "LOGOUT_ALL",
            AuditAction::PrincipalCreated => "PRINCIPAL_CREATED",
            AuditAction::RoleChanged => "ROLE_CHANGED",
            AuditAction::PrincipalActivated => "PRINCIPAL_ACTIVATED",
            AuditAction::PrincipalDeactivated => "PRINCIPAL_DEACTIVATED",
            AuditAction::PrincipalDeleted => "PRINCIPAL_DELETED",
            AuditAction::SettingsUpdated => "SETTINGS_UPDATED",
        }
    }

    pub const ALL: [AuditAction; 13] = [
        AuditAction::Login,
        AuditAction::LoginFailed,
        AuditAction::TokenIssued,
        AuditAction::TokenRefreshed,
        AuditAction::TokenRevoked,
        AuditAction::TokenReuseDetected,
        AuditAction::LogoutAll,
        AuditAction::PrincipalCreated,
        AuditAction::RoleChanged,
        AuditAction::PrincipalActivated,
        AuditAction::PrincipalDeactivated,
        AuditAction::PrincipalDeleted,
        AuditAction::SettingsUpdated,
    ];
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PlatformError::validation(format!("Unknown audit action: {}", s)))
    }
}

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    /// TSID
    pub id: String,
    pub action: AuditAction,
    /// Affected entity type, e.g. "Principal" or "RefreshToken"
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Who performed the action, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(action: AuditAction, entity_type: impl Into<String>, entity_id: Option<String>) -> Self {
        Self {
            id: TsidGenerator::generate(),
            action,
            entity_type: entity_type.into(),
            entity_id,
            principal_id: None,
            details: None,
            ip_address: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        for action in AuditAction::ALL {
            let json = serde_json::to_value(action).unwrap();
            assert_eq!(json, action.as_str());
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
        }
        assert!("SOMETHING_ELSE".parse::<AuditAction>().is_err());
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let log = AuditLog::new(AuditAction::Login, "Principal", Some("P1".into())).with_principal("P1");
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["action"], "LOGIN");
        assert_eq!(json["entityType"], "Principal");
        assert_eq!(json["principalId"], "P1");
        assert!(json.get("details").is_none());
        assert!(json.get("ipAddress").is_none());
    }
}

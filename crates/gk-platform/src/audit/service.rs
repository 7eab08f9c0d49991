//! Audit Service
//!
//! Central place for recording audit entries. A failed or timed-out insert
//! is logged and dropped: the audited operation has already happened.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};

use crate::audit::entity::{AuditAction, AuditLog};
use crate::audit::repository::{AuditLogFilter, AuditLogRepository, InMemoryAuditLogRepository};
use crate::role::entity::Role;
use crate::shared::error::{PlatformError, Result};

/// Default bound on one audit insert or listing
pub const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AuditService {
    repo: Arc<dyn AuditLogRepository>,
    timeout: Duration,
}

impl AuditService {
    pub fn new(repo: Arc<dyn AuditLogRepository>) -> Self {
        Self {
            repo,
            timeout: DEFAULT_AUDIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Service backed by a fresh in-memory repository
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAuditLogRepository::new()))
    }

    /// Fails with `Unavailable` when the repository does not answer in time
    pub async fn list(&self, filter: &AuditLogFilter) -> Result<(Vec<AuditLog>, u64)> {
        match tokio::time::timeout(self.timeout, self.repo.list(filter)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Audit log listing timed out");
                Err(PlatformError::unavailable("audit log listing timed out"))
            }
        }
    }

    pub async fn log_login(&self, principal_id: &str, ip: Option<String>) {
        let log = AuditLog::new(AuditAction::Login, "Principal", Some(principal_id.to_string()))
            .with_principal(principal_id)
            .with_ip(ip);
        self.record(log).await;
    }

    /// The attempted login name is kept in the details; the password never is
    pub async fn log_login_failed(&self, login: &str, ip: Option<String>) {
        let log = AuditLog::new(AuditAction::LoginFailed, "Principal", None)
            .with_details(json!({ "login": login }))
            .with_ip(ip);
        self.record(log).await;
    }

    pub async fn log_token_issued(&self, principal_id: &str, family_id: &str, ip: Option<String>) {
        let log = AuditLog::new(AuditAction::TokenIssued, "RefreshToken", Some(family_id.to_string()))
            .with_principal(principal_id)
            .with_ip(ip);
        self.record(log).await;
    }

    pub async fn log_token_refreshed(&self, principal_id: &str, family_id: &str, ip: Option<String>) {
        let log = AuditLog::new(AuditAction::TokenRefreshed, "RefreshToken", Some(family_id.to_string()))
            .with_principal(principal_id)
            .with_ip(ip);
        self.record(log).await;
    }

    pub async fn log_token_revoked(&self, principal_id: &str, family_id: &str) {
        let log = AuditLog::new(AuditAction::TokenRevoked, "RefreshToken", Some(family_id.to_string()))
            .with_principal(principal_id);
        self.record(log).await;
    }

    pub async fn log_reuse_detected(
        &self,
        principal_id: &str,
        family_id: &str,
        revoked: u64,
        ip: Option<String>,
    ) {
        let log = AuditLog::new(
            AuditAction::TokenReuseDetected,
            "RefreshToken",
            Some(family_id.to_string()),
        )
        .with_principal(principal_id)
        .with_details(json!({ "revokedTokens": revoked }))
        .with_ip(ip);
        self.record(log).await;
    }

    /// `actor_id` is who asked; `principal_id` is whose tokens were revoked
    pub async fn log_logout_all(&self, actor_id: &str, principal_id: &str, revoked: u64) {
        let log = AuditLog::new(AuditAction::LogoutAll, "Principal", Some(principal_id.to_string()))
            .with_principal(actor_id)
            .with_details(json!({ "revokedTokens": revoked }));
        self.record(log).await;
    }

    /// `actor_id` is `None` for self-registration and bootstrap seeding
    pub async fn log_principal_created(&self, actor_id: Option<&str>, principal_id: &str, role: Role) {
        let mut log = AuditLog::new(AuditAction::PrincipalCreated, "Principal", Some(principal_id.to_string()))
            .with_details(json!({ "role": role }));
        if let Some(actor) = actor_id {
            log = log.with_principal(actor);
        }
        self.record(log).await;
    }

    pub async fn log_role_changed(&self, actor_id: &str, principal_id: &str, from: Role, to: Role) {
        let log = AuditLog::new(AuditAction::RoleChanged, "Principal", Some(principal_id.to_string()))
            .with_principal(actor_id)
            .with_details(json!({ "from": from, "to": to }));
        self.record(log).await;
    }

    pub async fn log_active_changed(&self, actor_id: &str, principal_id: &str, active: bool) {
        let action = if active {
            AuditAction::PrincipalActivated
        } else {
            AuditAction::PrincipalDeactivated
        };
        let log = AuditLog::new(action, "Principal", Some(principal_id.to_string())).with_principal(actor_id);
        self.record(log).await;
    }

    pub async fn log_principal_deleted(&self, actor_id: &str, principal_id: &str) {
        let log = AuditLog::new(AuditAction::PrincipalDeleted, "Principal", Some(principal_id.to_string()))
            .with_principal(actor_id);
        self.record(log).await;
    }

    /// `changes` holds only the fields that actually changed
    pub async fn log_settings_updated(&self, actor_id: &str, changes: serde_json::Value) {
        let log = AuditLog::new(AuditAction::SettingsUpdated, "Settings", None)
            .with_principal(actor_id)
            .with_details(changes);
        self.record(log).await;
    }

    pub async fn record(&self, log: AuditLog) {
        info!(
            action = %log.action,
            entity_type = %log.entity_type,
            entity_id = ?log.entity_id,
            principal_id = ?log.principal_id,
            "Audit log recorded"
        );

        match tokio::time::timeout(self.timeout, self.repo.insert(&log)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, action = %log.action, "Failed to insert audit log"),
            Err(_) => {
                metrics::counter!("gatekeeper.audit.dropped_total").increment(1);
                warn!(action = %log.action, "Audit log insert timed out, entry dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FailingRepo;

    #[async_trait]
    impl AuditLogRepository for FailingRepo {
        async fn insert(&self, _log: &AuditLog) -> Result<()> {
            Err(PlatformError::internal("disk full"))
        }

        async fn list(&self, _filter: &AuditLogFilter) -> Result<(Vec<AuditLog>, u64)> {
            Ok((Vec::new(), 0))
        }
    }

    #[tokio::test]
    async fn test_role_change_details() {
        let audit = AuditService::in_memory();
        audit.log_role_changed("ADMIN", "P1", Role::Viewer, Role::Manager).await;

        let (logs, _) = audit
            .list(&AuditLogFilter { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(logs[0].action, AuditAction::RoleChanged);
        assert_eq!(logs[0].principal_id.as_deref(), Some("ADMIN"));
        assert_eq!(logs[0].details, Some(json!({"from": "viewer", "to": "manager"})));
    }

    struct StalledRepo;

    #[async_trait]
    impl AuditLogRepository for StalledRepo {
        async fn insert(&self, _log: &AuditLog) -> Result<()> {
            std::future::pending().await
        }

        async fn list(&self, _filter: &AuditLogFilter) -> Result<(Vec<AuditLog>, u64)> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_insert_failure_is_swallowed() {
        let audit = AuditService::new(Arc::new(FailingRepo));
        audit.log_login("P1", None).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_insert_is_dropped() {
        let audit = AuditService::new(Arc::new(StalledRepo)).with_timeout(Duration::from_millis(50));
        let finished = tokio::time::timeout(Duration::from_secs(1), audit.log_login("P1", None)).await;
        assert!(finished.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_listing_is_unavailable() {
        let audit = AuditService::new(Arc::new(StalledRepo)).with_timeout(Duration::from_millis(50));
        let err = audit
            .list(&AuditLogFilter { limit: 10, ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Unavailable { .. }));
    }
}

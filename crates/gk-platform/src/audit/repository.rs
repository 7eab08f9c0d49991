//! Audit Log Repository

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::audit::entity::{AuditAction, AuditLog};
use crate::shared::error::Result;

/// Listing filter for the audit trail
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub action: Option<AuditAction>,
    pub entity_id: Option<String>,
    pub principal_id: Option<String>,
    pub offset: u64,
    pub limit: u64,
}

impl AuditLogFilter {
    pub fn matches(&self, log: &AuditLog) -> bool {
        self.action.map(|a| a == log.action).unwrap_or(true)
            && self
                .entity_id
                .as_deref()
                .map(|id| log.entity_id.as_deref() == Some(id))
                .unwrap_or(true)
            && self
                .principal_id
                .as_deref()
                .map(|id| log.principal_id.as_deref() == Some(id))
                .unwrap_or(true)
    }
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn insert(&self, log: &AuditLog) -> Result<()>;

    /// Newest first, plus the total match count
    async fn list(&self, filter: &AuditLogFilter) -> Result<(Vec<AuditLog>, u64)>;
}

#[derive(Default)]
pub struct InMemoryAuditLogRepository {
    logs: RwLock<Vec<AuditLog>>,
}

impl InMemoryAuditLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn insert(&self, log: &AuditLog) -> Result<()> {
        self.logs.write().push(log.clone());
        Ok(())
    }

    async fn list(&self, filter: &AuditLogFilter) -> Result<(Vec<AuditLog>, u64)> {
        let logs = self.logs.read();
        let matching: Vec<&AuditLog> = logs.iter().rev().filter(|l| filter.matches(l)).collect();
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }
}

//! Principal Repository
//!
//! Storage seam for principals plus the in-memory implementation used in
//! development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::principal::entity::Principal;
use crate::role::entity::Role;
use crate::shared::error::{PlatformError, Result};

/// Listing filter for the admin API
#[derive(Debug, Clone, Default)]
pub struct PrincipalFilter {
    /// Substring match on username, email or full name (case-insensitive)
    pub search: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
    pub offset: u64,
    pub limit: u64,
}

impl PrincipalFilter {
    pub fn matches(&self, principal: &Principal) -> bool {
        if let Some(role) = self.role {
            if principal.role != role {
                return false;
            }
        }
        if let Some(active) = self.active {
            if principal.active != active {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => true,
            Some(term) => {
                let term = term.to_lowercase();
                principal.username.to_lowercase().contains(&term)
                    || principal.email.to_lowercase().contains(&term)
                    || principal
                        .full_name
                        .as_deref()
                        .map(|n| n.to_lowercase().contains(&term))
                        .unwrap_or(false)
            }
        }
    }
}

/// Headcounts behind the dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrincipalStats {
    pub total: u64,
    pub active: u64,
    /// Created at or after the requested instant
    pub created_since: u64,
    pub admins: u64,
}

impl PrincipalStats {
    fn tally<'a>(principals: impl Iterator<Item = &'a Principal>, since: DateTime<Utc>) -> Self {
        principals.fold(Self::default(), |mut stats, p| {
            stats.total += 1;
            stats.active += p.active as u64;
            stats.created_since += (p.created_at >= since) as u64;
            stats.admins += (p.role == Role::Admin) as u64;
            stats
        })
    }
}

#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    /// Insert a new principal. Fails with `Duplicate` on a username or email clash.
    async fn insert(&self, principal: &Principal) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Principal>>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>>;

    /// Resolve a login name, which may be either a username or an email
    async fn find_by_login(&self, login: &str) -> Result<Option<Principal>> {
        if login.contains('@') {
            if let Some(principal) = self.find_by_email(login).await? {
                return Ok(Some(principal));
            }
        }
        self.find_by_username(login).await
    }

    /// Replace a stored principal. Fails with `NotFound` if it does not exist.
    async fn update(&self, principal: &Principal) -> Result<()>;

    /// Returns whether a principal was deleted
    async fn delete(&self, id: &str) -> Result<bool>;

    /// One page of principals ordered by creation time, plus the total match count
    async fn list(&self, filter: &PrincipalFilter) -> Result<(Vec<Principal>, u64)>;

    async fn count(&self) -> Result<u64>;

    async fn stats(&self, since: DateTime<Utc>) -> Result<PrincipalStats>;

    /// Backend reachability, for the system status view
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Process-local principal store
#[derive(Default)]
pub struct InMemoryPrincipalRepository {
    principals: RwLock<HashMap<String, Principal>>,
}

impl InMemoryPrincipalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_unique(map: &HashMap<String, Principal>, principal: &Principal) -> Result<()> {
        for existing in map.values().filter(|p| p.id != principal.id) {
            if existing.username.eq_ignore_ascii_case(&principal.username) {
                return Err(PlatformError::duplicate("Principal", "username", &principal.username));
            }
            if existing.email.eq_ignore_ascii_case(&principal.email) {
                return Err(PlatformError::duplicate("Principal", "email", &principal.email));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PrincipalRepository for InMemoryPrincipalRepository {
    async fn insert(&self, principal: &Principal) -> Result<()> {
        let mut map = self.principals.write();
        if map.contains_key(&principal.id) {
            return Err(PlatformError::duplicate("Principal", "id", &principal.id));
        }
        Self::check_unique(&map, principal)?;
        map.insert(principal.id.clone(), principal.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Principal>> {
        Ok(self.principals.read().get(id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        Ok(self
            .principals
            .read()
            .values()
            .find(|p| p.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        Ok(self
            .principals
            .read()
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update(&self, principal: &Principal) -> Result<()> {
        let mut map = self.principals.write();
        if !map.contains_key(&principal.id) {
            return Err(PlatformError::not_found("Principal", &principal.id));
        }
        Self::check_unique(&map, principal)?;
        map.insert(principal.id.clone(), principal.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.principals.write().remove(id).is_some())
    }

    async fn list(&self, filter: &PrincipalFilter) -> Result<(Vec<Principal>, u64)> {
        let map = self.principals.read();
        let mut matching: Vec<&Principal> = map.values().filter(|p| filter.matches(p)).collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.principals.read().len() as u64)
    }

    async fn stats(&self, since: DateTime<Utc>) -> Result<PrincipalStats> {
        Ok(PrincipalStats::tally(self.principals.read().values(), since))
    }
}

//! In-Memory Refresh Token Registry
//!
//! Backed by a `DashMap`. Rotation holds the shard lock of the current entry
//! while checking and updating its state, which makes the compare-and-swap
//! atomic across tasks.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use crate::auth::refresh_token::{RefreshToken, RefreshTokenState};
use crate::auth::refresh_token_store::{RefreshTokenStore, RotateOutcome};
use crate::shared::error::Result;

#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    tokens: DashMap<String, RefreshToken>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn revoke_where<F>(&self, predicate: F) -> u64
    where
        F: Fn(&RefreshToken) -> bool,
    {
        let now = Utc::now();
        let mut revoked = 0;
        for mut entry in self.tokens.iter_mut() {
            if predicate(entry.value()) && entry.value_mut().revoke(now) {
                revoked += 1;
            }
        }
        revoked
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn insert(&self, token: &RefreshToken) -> Result<()> {
        self.tokens.insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        Ok(self.tokens.get(token_hash).map(|entry| entry.value().clone()))
    }

    async fn rotate(&self, current_hash: &str, replacement: &RefreshToken) -> Result<RotateOutcome> {
        let now = Utc::now();

        // The entry guard must be released before inserting the replacement,
        // which may live in the same shard.
        let outcome = match self.tokens.get_mut(current_hash) {
            None => RotateOutcome::NotFound,
            Some(mut entry) => {
                let token = entry.value_mut();
                match token.state {
                    RefreshTokenState::Revoked => RotateOutcome::Revoked,
                    RefreshTokenState::Rotated => RotateOutcome::AlreadyRotated,
                    RefreshTokenState::Active if token.is_expired_at(now) => RotateOutcome::Expired,
                    RefreshTokenState::Active => {
                        token.mark_rotated(&replacement.token_hash, now);
                        RotateOutcome::Rotated
                    }
                }
            }
        };

        if outcome == RotateOutcome::Rotated {
            self.tokens.insert(replacement.token_hash.clone(), replacement.clone());
        }
        Ok(outcome)
    }

    async fn revoke(&self, token_hash: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .tokens
            .get_mut(token_hash)
            .map(|mut entry| entry.value_mut().revoke(now))
            .unwrap_or(false))
    }

    async fn revoke_all_for_principal(&self, principal_id: &str) -> Result<u64> {
        Ok(self.revoke_where(|t| t.principal_id == principal_id))
    }

    async fn revoke_family(&self, family_id: &str) -> Result<u64> {
        Ok(self.revoke_where(|t| t.family_id == family_id))
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, token| !token.is_expired_at(now));
        let removed = before.saturating_sub(self.tokens.len()) as u64;
        debug!(removed, "Purged expired refresh tokens");
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn token(principal: &str, family: Option<String>) -> RefreshToken {
        RefreshToken::generate(principal, family, Duration::days(7)).1
    }

    #[tokio::test]
    async fn test_rotate_once() {
        let store = InMemoryRefreshTokenStore::new();
        let current = token("P1", None);
        store.insert(&current).await.unwrap();

        let next = token("P1", Some(current.family_id.clone()));
        assert_eq!(store.rotate(&current.token_hash, &next).await.unwrap(), RotateOutcome::Rotated);

        let stored = store.find_by_hash(&current.token_hash).await.unwrap().unwrap();
        assert_eq!(stored.state, RefreshTokenState::Rotated);
        assert_eq!(stored.replaced_by.as_deref(), Some(next.token_hash.as_str()));
        assert!(store.find_by_hash(&next.token_hash).await.unwrap().unwrap().is_usable());

        let again = token("P1", Some(current.family_id.clone()));
        assert_eq!(
            store.rotate(&current.token_hash, &again).await.unwrap(),
            RotateOutcome::AlreadyRotated
        );
        assert!(store.find_by_hash(&again.token_hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_rejects_revoked_expired_and_unknown() {
        let store = InMemoryRefreshTokenStore::new();

        let revoked = token("P1", None);
        store.insert(&revoked).await.unwrap();
        assert!(store.revoke(&revoked.token_hash).await.unwrap());
        assert_eq!(
            store.rotate(&revoked.token_hash, &token("P1", None)).await.unwrap(),
            RotateOutcome::Revoked
        );

        let (_, expired) = RefreshToken::generate("P1", None, Duration::seconds(-5));
        store.insert(&expired).await.unwrap();
        assert_eq!(
            store.rotate(&expired.token_hash, &token("P1", None)).await.unwrap(),
            RotateOutcome::Expired
        );

        assert_eq!(
            store.rotate("unknown", &token("P1", None)).await.unwrap(),
            RotateOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let store = InMemoryRefreshTokenStore::new();
        let t = token("P1", None);
        store.insert(&t).await.unwrap();

        assert!(store.revoke(&t.token_hash).await.unwrap());
        assert!(!store.revoke(&t.token_hash).await.unwrap());
        assert!(!store.revoke("never-issued").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_family_leaves_rotated_members() {
        let store = InMemoryRefreshTokenStore::new();
        let first = token("P1", None);
        store.insert(&first).await.unwrap();
        let second = token("P1", Some(first.family_id.clone()));
        store.rotate(&first.token_hash, &second).await.unwrap();
        let unrelated = token("P1", None);
        store.insert(&unrelated).await.unwrap();

        assert_eq!(store.revoke_family(&first.family_id).await.unwrap(), 1);

        let first = store.find_by_hash(&first.token_hash).await.unwrap().unwrap();
        let second = store.find_by_hash(&second.token_hash).await.unwrap().unwrap();
        assert_eq!(first.state, RefreshTokenState::Rotated);
        assert_eq!(second.state, RefreshTokenState::Revoked);
        assert!(store.find_by_hash(&unrelated.token_hash).await.unwrap().unwrap().is_usable());
    }

    #[tokio::test]
    async fn test_revoke_all_for_principal() {
        let store = InMemoryRefreshTokenStore::new();
        for _ in 0..3 {
            store.insert(&token("P1", None)).await.unwrap();
        }
        store.insert(&token("P2", None)).await.unwrap();

        assert_eq!(store.revoke_all_for_principal("P1").await.unwrap(), 3);
        assert_eq!(store.revoke_all_for_principal("P1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let store = InMemoryRefreshTokenStore::new();
        store.insert(&token("P1", None)).await.unwrap();
        let (_, expired) = RefreshToken::generate("P1", None, Duration::seconds(-1));
        store.insert(&expired).await.unwrap();

        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rotation_has_one_winner() {
        let store = Arc::new(InMemoryRefreshTokenStore::new());
        let current = token("P1", None);
        store.insert(&current).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let hash = current.token_hash.clone();
            let family = current.family_id.clone();
            handles.push(tokio::spawn(async move {
                let next = token("P1", Some(family));
                store.rotate(&hash, &next).await.unwrap()
            }));
        }

        let mut rotated = 0;
        for handle in handles {
            if handle.await.unwrap() == RotateOutcome::Rotated {
                rotated += 1;
            }
        }
        assert_eq!(rotated, 1);
        assert_eq!(store.len(), 2);
    }
}

//! Token Authority Integration Tests
//!
//! Issue, validate, refresh, authorize and revoke against in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use chrono::{DateTime, Utc};
use gk_platform::{
    AuditAction, AuditLog, AuditLogFilter, AuditLogRepository, AuditService, ClientInfo, InMemoryPrincipalRepository,
    InMemoryRefreshTokenStore, NewPrincipal, PasswordService, Permission, PlatformError, Principal, PrincipalFilter,
    PrincipalRepository, PrincipalStats, RefreshToken, RefreshTokenStore, Role, RotateOutcome, TokenAuthority,
    TokenConfig, TokenService,
};

const SECRET: &str = "integration-secret-0123456789abcdefghijkl";
const PASSWORD: &str = "correct horse battery";

fn authority_with(config: TokenConfig) -> TokenAuthority {
    let tokens = TokenService::with_secret(config, SECRET).unwrap();
    TokenAuthority::new(
        Arc::new(tokens),
        Arc::new(InMemoryRefreshTokenStore::new()),
        Arc::new(InMemoryPrincipalRepository::new()),
        Arc::new(PasswordService::for_testing().unwrap()),
        AuditService::in_memory(),
    )
}

fn authority() -> TokenAuthority {
    authority_with(TokenConfig::default())
}

fn client() -> ClientInfo {
    ClientInfo {
        ip: Some("198.51.100.4".to_string()),
        user_agent: Some("tests".to_string()),
    }
}

async fn create(authority: &TokenAuthority, username: &str, role: Role) -> Principal {
    authority
        .create_principal(
            NewPrincipal {
                username: username.to_string(),
                email: format!("{}@example.com", username),
                password: PASSWORD.to_string(),
                full_name: None,
                role,
            },
            None,
        )
        .await
        .unwrap()
}

mod validate_tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_before_expiry() {
        let authority = authority();
        let principal = create(&authority, "dana", Role::Manager).await;

        let pair = authority.issue(&principal, &client()).await.unwrap();
        let ctx = authority.validate(&pair.access_token).unwrap();

        assert_eq!(ctx.principal_id, principal.id);
        assert_eq!(ctx.username, "dana");
        assert_eq!(ctx.role, Role::Manager);
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, TokenConfig::default().access_token_expiry_secs);
    }

    #[tokio::test]
    async fn test_validate_after_expiry_fails() {
        // Expired two minutes ago, well past the skew leeway
        let authority = authority_with(TokenConfig {
            access_token_expiry_secs: -120,
            ..TokenConfig::default()
        });
        let principal = create(&authority, "dana", Role::Viewer).await;

        let pair = authority.issue(&principal, &client()).await.unwrap();
        assert!(matches!(
            authority.validate(&pair.access_token),
            Err(PlatformError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_expiry_within_leeway_is_accepted() {
        let authority = authority_with(TokenConfig {
            access_token_expiry_secs: -5,
            ..TokenConfig::default()
        });
        let principal = create(&authority, "dana", Role::Viewer).await;

        let pair = authority.issue(&principal, &client()).await.unwrap();
        assert!(authority.validate(&pair.access_token).is_ok());
    }

    #[tokio::test]
    async fn test_forged_and_expired_fail_identically() {
        let authority = authority();
        let principal = create(&authority, "dana", Role::Viewer).await;
        let pair = authority.issue(&principal, &client()).await.unwrap();

        // Payload rewritten to claim admin, original signature kept
        let parts: Vec<&str> = pair.access_token.split('.').collect();
        let mut claims: serde_json::Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        claims["role"] = serde_json::json!("admin");
        let tampered = format!(
            "{}.{}.{}",
            parts[0],
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap()),
            parts[2]
        );

        let other_key = TokenService::with_secret(TokenConfig::default(), "some-other-secret-0123456789abcdefgh").unwrap();
        let (wrong_key, _) = other_key.mint_access_token(&principal).unwrap();

        let expired_service = TokenService::with_secret(
            TokenConfig {
                access_token_expiry_secs: -3600,
                ..TokenConfig::default()
            },
            SECRET,
        )
        .unwrap();
        let (expired, _) = expired_service.mint_access_token(&principal).unwrap();

        let errors: Vec<String> = [tampered.as_str(), wrong_key.as_str(), expired.as_str(), "not-a-jwt", ""]
            .iter()
            .map(|token| {
                let err = authority.validate(token).unwrap_err();
                assert!(matches!(err, PlatformError::Unauthorized));
                err.to_string()
            })
            .collect();

        assert!(errors.windows(2).all(|w| w[0] == w[1]));
    }
}

mod refresh_tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_rotates_and_second_use_conflicts() {
        let authority = authority();
        let principal = create(&authority, "dana", Role::Viewer).await;
        let first = authority.issue(&principal, &client()).await.unwrap();

        let second = authority.refresh(&first.refresh_token, &client()).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert!(authority.validate(&second.access_token).is_ok());

        let err = authority.refresh(&first.refresh_token, &client()).await.unwrap_err();
        assert!(matches!(err, PlatformError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_reuse_revokes_successor() {
        let authority = authority();
        let principal = create(&authority, "dana", Role::Viewer).await;
        let first = authority.issue(&principal, &client()).await.unwrap();
        let second = authority.refresh(&first.refresh_token, &client()).await.unwrap();

        // Replay of the rotated token takes the whole family down
        assert!(matches!(
            authority.refresh(&first.refresh_token, &client()).await,
            Err(PlatformError::Conflict { .. })
        ));
        assert!(matches!(
            authority.refresh(&second.refresh_token, &client()).await,
            Err(PlatformError::Unauthorized)
        ));

        let stored = authority
            .store()
            .find_by_hash(&RefreshToken::hash_token(&second.refresh_token))
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.is_usable());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_one_winner() {
        let authority = Arc::new(authority());
        let principal = create(&authority, "dana", Role::Viewer).await;
        let pair = authority.issue(&principal, &client()).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let authority = authority.clone();
                let token = pair.refresh_token.clone();
                tokio::spawn(async move { authority.refresh(&token, &ClientInfo::default()).await })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let mut successes = 0;
        for result in results {
            match result.unwrap() {
                Ok(_) => successes += 1,
                Err(PlatformError::Conflict { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_unknown_refresh_token() {
        let authority = authority();
        assert!(matches!(
            authority.refresh("never-issued", &client()).await,
            Err(PlatformError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_refresh_for_deactivated_principal() {
        let authority = authority();
        let principal = create(&authority, "dana", Role::Viewer).await;
        let pair = authority.issue(&principal, &client()).await.unwrap();

        let mut stored = authority.principals().find_by_id(&principal.id).await.unwrap().unwrap();
        stored.deactivate();
        authority.principals().update(&stored).await.unwrap();

        assert!(matches!(
            authority.refresh(&pair.refresh_token, &client()).await,
            Err(PlatformError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_refresh_picks_up_current_role() {
        let authority = authority();
        let principal = create(&authority, "dana", Role::Viewer).await;
        let pair = authority.issue(&principal, &client()).await.unwrap();

        // Role edited in the store without going through change_role
        let mut stored = authority.principals().find_by_id(&principal.id).await.unwrap().unwrap();
        stored.change_role(Role::Manager);
        authority.principals().update(&stored).await.unwrap();

        let next = authority.refresh(&pair.refresh_token, &client()).await.unwrap();
        assert_eq!(authority.validate(&next.access_token).unwrap().role, Role::Manager);
    }
}

mod revoke_tests {
    use super::*;

    #[tokio::test]
    async fn test_revoked_token_cannot_refresh() {
        let authority = authority();
        let principal = create(&authority, "dana", Role::Viewer).await;
        let pair = authority.issue(&principal, &client()).await.unwrap();

        authority.revoke(&pair.refresh_token).await.unwrap();
        assert!(matches!(
            authority.refresh(&pair.refresh_token, &client()).await,
            Err(PlatformError::Unauthorized)
        ));

        // Idempotent, including for tokens that never existed
        authority.revoke(&pair.refresh_token).await.unwrap();
        authority.revoke("never-issued").await.unwrap();
    }

    #[tokio::test]
    async fn test_revoke_leaves_access_token_valid() {
        let authority = authority();
        let principal = create(&authority, "dana", Role::Viewer).await;
        let pair = authority.issue(&principal, &client()).await.unwrap();

        authority.revoke(&pair.refresh_token).await.unwrap();
        assert!(authority.validate(&pair.access_token).is_ok());
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let authority = authority();
        let principal = create(&authority, "dana", Role::Viewer).await;
        let a = authority.issue(&principal, &client()).await.unwrap();
        let b = authority.issue(&principal, &client()).await.unwrap();

        assert_eq!(authority.revoke_all(&principal.id, &principal.id).await.unwrap(), 2);
        for pair in [a, b] {
            assert!(authority.refresh(&pair.refresh_token, &client()).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_role_change_revokes_and_next_pair_carries_new_role() {
        let authority = authority();
        let admin = create(&authority, "root", Role::Admin).await;
        let principal = create(&authority, "dana", Role::Viewer).await;
        let (_, pair) = authority.login("dana", PASSWORD, &client()).await.unwrap();

        authority.change_role(&principal.id, Role::Manager, &admin.id).await.unwrap();

        assert!(matches!(
            authority.refresh(&pair.refresh_token, &client()).await,
            Err(PlatformError::Unauthorized)
        ));

        let (_, next) = authority.login("dana", PASSWORD, &client()).await.unwrap();
        let ctx = authority.validate(&next.access_token).unwrap();
        assert_eq!(ctx.role, Role::Manager);
        assert!(authority.authorize(&ctx, "export_data"));
    }
}

mod authorize_tests {
    use super::*;

    #[tokio::test]
    async fn test_authorize_matches_role_table() {
        let authority = authority();

        for role in Role::ALL {
            let principal = create(&authority, &format!("user-{}", role), role).await;
            let pair = authority.issue(&principal, &client()).await.unwrap();
            let ctx = authority.validate(&pair.access_token).unwrap();

            for permission in Permission::ALL {
                let expected = role.permissions().contains(&permission);
                assert_eq!(authority.authorize(&ctx, permission.as_str()), expected, "{role} / {permission}");
                assert_eq!(authority.authorize(&principal, permission.as_str()), expected);
            }
        }
    }

    #[tokio::test]
    async fn test_viewer_example() {
        let authority = authority();
        let viewer = create(&authority, "vera", Role::Viewer).await;
        let pair = authority.issue(&viewer, &client()).await.unwrap();
        let ctx = authority.validate(&pair.access_token).unwrap();

        assert!(!authority.authorize(&ctx, "delete_user"));
        assert!(authority.authorize(&ctx, "view_report"));
    }

    #[test]
    fn test_unknown_action_is_denied() {
        let authority = authority();
        let admin = Principal::new("root", "root@example.com", "hash", Role::Admin);
        assert!(!authority.authorize(&admin, "format_disk"));
        assert!(!authority.authorize(&admin, ""));
    }
}

mod audit_tests {
    use super::*;
    use gk_platform::audit::AuditLogFilter;

    #[tokio::test]
    async fn test_reuse_is_audited() {
        let authority = authority();
        let principal = create(&authority, "dana", Role::Viewer).await;
        let first = authority.issue(&principal, &client()).await.unwrap();
        authority.refresh(&first.refresh_token, &client()).await.unwrap();
        let _ = authority.refresh(&first.refresh_token, &client()).await;

        let filter = AuditLogFilter {
            action: Some(AuditAction::TokenReuseDetected),
            limit: 10,
            ..AuditLogFilter::default()
        };
        let (logs, total) = authority.audit().list(&filter).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(logs[0].principal_id.as_deref(), Some(principal.id.as_str()));
        assert_eq!(logs[0].ip_address.as_deref(), Some("198.51.100.4"));
    }
}

/// Registry whose every call outlives any sensible timeout
struct StalledStore;

#[async_trait]
impl RefreshTokenStore for StalledStore {
    async fn insert(&self, _token: &RefreshToken) -> gk_platform::Result<()> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }

    async fn find_by_hash(&self, _token_hash: &str) -> gk_platform::Result<Option<RefreshToken>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(None)
    }

    async fn rotate(&self, _current_hash: &str, _replacement: &RefreshToken) -> gk_platform::Result<RotateOutcome> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke(&self, _token_hash: &str) -> gk_platform::Result<bool> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(true)
    }

    async fn revoke_all_for_principal(&self, _principal_id: &str) -> gk_platform::Result<u64> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(0)
    }

    async fn revoke_family(&self, _family_id: &str) -> gk_platform::Result<u64> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(0)
    }

    async fn delete_expired(&self) -> gk_platform::Result<u64> {
        Ok(0)
    }

    async fn ping(&self) -> gk_platform::Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "stalled"
    }
}

/// Audit backend that never answers
struct StalledAudit;

#[async_trait]
impl AuditLogRepository for StalledAudit {
    async fn insert(&self, _log: &AuditLog) -> gk_platform::Result<()> {
        std::future::pending().await
    }

    async fn list(&self, _filter: &AuditLogFilter) -> gk_platform::Result<(Vec<AuditLog>, u64)> {
        std::future::pending().await
    }
}

/// Principal store that never answers
struct StalledPrincipals;

#[async_trait]
impl PrincipalRepository for StalledPrincipals {
    async fn insert(&self, _principal: &Principal) -> gk_platform::Result<()> {
        std::future::pending().await
    }

    async fn find_by_id(&self, _id: &str) -> gk_platform::Result<Option<Principal>> {
        std::future::pending().await
    }

    async fn find_by_username(&self, _username: &str) -> gk_platform::Result<Option<Principal>> {
        std::future::pending().await
    }

    async fn find_by_email(&self, _email: &str) -> gk_platform::Result<Option<Principal>> {
        std::future::pending().await
    }

    async fn update(&self, _principal: &Principal) -> gk_platform::Result<()> {
        std::future::pending().await
    }

    async fn delete(&self, _id: &str) -> gk_platform::Result<bool> {
        std::future::pending().await
    }

    async fn list(&self, _filter: &PrincipalFilter) -> gk_platform::Result<(Vec<Principal>, u64)> {
        std::future::pending().await
    }

    async fn count(&self) -> gk_platform::Result<u64> {
        std::future::pending().await
    }

    async fn stats(&self, _since: DateTime<Utc>) -> gk_platform::Result<PrincipalStats> {
        std::future::pending().await
    }

    async fn ping(&self) -> gk_platform::Result<()> {
        std::future::pending().await
    }
}

mod timeout_tests {
    use super::*;

    fn stalled_authority() -> TokenAuthority {
        let tokens = TokenService::with_secret(TokenConfig::default(), SECRET).unwrap();
        TokenAuthority::new(
            Arc::new(tokens),
            Arc::new(StalledStore),
            Arc::new(InMemoryPrincipalRepository::new()),
            Arc::new(PasswordService::for_testing().unwrap()),
            AuditService::in_memory(),
        )
        .with_store_timeout(Duration::from_millis(50))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_registry_fails_closed() {
        let authority = stalled_authority();
        let principal = Principal::new("dana", "dana@example.com", "hash", Role::Viewer);
        authority.principals().insert(&principal).await.unwrap();

        assert!(matches!(
            authority.issue(&principal, &client()).await,
            Err(PlatformError::Unavailable { .. })
        ));
        assert!(matches!(
            authority.refresh("any-token", &client()).await,
            Err(PlatformError::Unavailable { .. })
        ));
        assert!(matches!(
            authority.revoke("any-token").await,
            Err(PlatformError::Unavailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_does_not_touch_registry() {
        let authority = stalled_authority();
        let principal = Principal::new("dana", "dana@example.com", "hash", Role::Viewer);
        let (token, _) = authority.tokens().mint_access_token(&principal).unwrap();

        assert!(authority.validate(&token).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_audit_does_not_block_token_operations() {
        let tokens = TokenService::with_secret(TokenConfig::default(), SECRET).unwrap();
        let authority = TokenAuthority::new(
            Arc::new(tokens),
            Arc::new(InMemoryRefreshTokenStore::new()),
            Arc::new(InMemoryPrincipalRepository::new()),
            Arc::new(PasswordService::for_testing().unwrap()),
            AuditService::new(Arc::new(StalledAudit)),
        )
        .with_store_timeout(Duration::from_millis(50));

        let principal = Principal::new("dana", "dana@example.com", "hash", Role::Viewer);
        authority.principals().insert(&principal).await.unwrap();

        let within = Duration::from_secs(3600);
        let pair = tokio::time::timeout(within, authority.issue(&principal, &client()))
            .await
            .expect("issue waited on the audit backend")
            .unwrap();
        let rotated = tokio::time::timeout(within, authority.refresh(&pair.refresh_token, &client()))
            .await
            .expect("refresh waited on the audit backend")
            .unwrap();
        tokio::time::timeout(within, authority.revoke(&rotated.refresh_token))
            .await
            .expect("revoke waited on the audit backend")
            .unwrap();

        let listing = authority
            .audit()
            .list(&AuditLogFilter { limit: 10, ..Default::default() })
            .await;
        assert!(matches!(listing, Err(PlatformError::Unavailable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_principal_store_fails_closed() {
        let tokens = TokenService::with_secret(TokenConfig::default(), SECRET).unwrap();
        let authority = TokenAuthority::new(
            Arc::new(tokens),
            Arc::new(InMemoryRefreshTokenStore::new()),
            Arc::new(StalledPrincipals),
            Arc::new(PasswordService::for_testing().unwrap()),
            AuditService::in_memory(),
        )
        .with_store_timeout(Duration::from_millis(50));

        let filter = PrincipalFilter { limit: 10, ..Default::default() };
        assert!(matches!(
            authority.list_principals(&filter).await,
            Err(PlatformError::Unavailable { .. })
        ));
        assert!(matches!(
            authority.principal_stats(Utc::now()).await,
            Err(PlatformError::Unavailable { .. })
        ));

        let (database, registry) = authority.ping_backends().await;
        assert!(matches!(database, Err(PlatformError::Unavailable { .. })));
        assert!(registry.is_ok());
    }
}

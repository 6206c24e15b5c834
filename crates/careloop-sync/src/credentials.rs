//! # Credential Manager
//!
//! Loads stored calendar credentials and keeps their access tokens
//! fresh.
//!
//! ## Token Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Access Token Lifecycle                             │
//! │                                                                         │
//! │  load credential ──► flagged for reauth? ──yes──► NeedsReauthorization  │
//! │        │ no                                                             │
//! │        ▼                                                                │
//! │  expires within skew window? ──no──► use stored token                   │
//! │        │ yes                                                            │
//! │        ▼                                                                │
//! │  refresh grant ──► success: persist token + expiry, use it              │
//! │        │                                                                │
//! │        ├──► invalid_grant / 401: flag credential, surface               │
//! │        │    NeedsReauthorization (terminal until user reconnects)       │
//! │        │                                                                │
//! │        └──► transport / 5xx: surface as-is (retryable, the              │
//! │             scheduler backs off and tries again)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The skew window refreshes tokens slightly before their stated
//! expiry so a token never dies mid-run.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use careloop_core::{Credential, UserId};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::CalendarApi;
use crate::store::CareStore;

// =============================================================================
// Credential Manager
// =============================================================================

/// Hands out credentials with a guaranteed-fresh access token.
pub struct CredentialManager {
    store: Arc<dyn CareStore>,
    api: Arc<dyn CalendarApi>,
    refresh_skew: Duration,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn CareStore>, api: Arc<dyn CalendarApi>, config: &SyncConfig) -> Self {
        CredentialManager {
            store,
            api,
            refresh_skew: Duration::seconds(config.token_refresh_skew_secs as i64),
        }
    }

    /// Loads the user's credential with a usable access token,
    /// refreshing it first when it is inside the skew window.
    pub async fn authorized(&self, user_id: UserId) -> SyncResult<Credential> {
        let mut credential = self
            .store
            .credential(user_id)
            .await?
            .ok_or(SyncError::NotConnected(user_id))?;

        if credential.needs_reauthorization {
            return Err(SyncError::NeedsReauthorization(user_id));
        }

        self.ensure_fresh_token(&mut credential).await?;
        Ok(credential)
    }

    /// Like [`authorized`](Self::authorized), but also requires that a
    /// calendar has been selected for sync.
    pub async fn authorized_calendar(&self, user_id: UserId) -> SyncResult<(Credential, String)> {
        let credential = self.authorized(user_id).await?;
        let calendar_id = credential
            .calendar_id
            .clone()
            .ok_or(SyncError::NoCalendarSelected(user_id))?;
        Ok((credential, calendar_id))
    }

    /// Refreshes the access token in place when it expires within the
    /// skew window. New tokens are persisted before use so a crash
    /// after refresh cannot strand an unstored token.
    async fn ensure_fresh_token(&self, credential: &mut Credential) -> SyncResult<()> {
        let now = Utc::now();
        if credential.expires_at - self.refresh_skew > now {
            return Ok(());
        }

        debug!(
            user_id = credential.user_id,
            expires_at = %credential.expires_at,
            "Access token inside refresh window; refreshing"
        );

        match self.api.refresh_access_token(&credential.refresh_token).await {
            Ok(token) => {
                let expires_at = now + Duration::seconds(token.expires_in);
                self.store
                    .update_credential_tokens(credential.user_id, &token.access_token, expires_at)
                    .await?;
                credential.access_token = token.access_token;
                credential.expires_at = expires_at;
                Ok(())
            }
            Err(err) if is_grant_revoked(&err) => {
                warn!(
                    user_id = credential.user_id,
                    error = %err,
                    "Refresh grant revoked; flagging credential for reauthorization"
                );
                self.store
                    .set_needs_reauthorization(credential.user_id)
                    .await?;
                Err(SyncError::NeedsReauthorization(credential.user_id))
            }
            Err(err) => Err(err),
        }
    }
}

/// True when a refresh failure means the grant itself is gone, as
/// opposed to a transient provider problem.
fn is_grant_revoked(err: &SyncError) -> bool {
    match err {
        SyncError::Provider { status, code, .. } => {
            code.as_deref() == Some("invalid_grant") || *status == 401
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeCalendarApi, InMemoryStore};

    fn manager(
        store: Arc<InMemoryStore>,
        api: Arc<FakeCalendarApi>,
    ) -> CredentialManager {
        CredentialManager::new(store, api, &SyncConfig::default())
    }

    fn fresh_credential(user_id: UserId) -> Credential {
        Credential {
            user_id,
            access_token: "stored-token".into(),
            refresh_token: "refresh-token".into(),
            expires_at: Utc::now() + Duration::hours(1),
            scopes: vec!["https://www.googleapis.com/auth/calendar".into()],
            calendar_id: Some("primary".into()),
            sync_token: None,
            last_pulled_at: None,
            needs_reauthorization: false,
        }
    }

    #[tokio::test]
    async fn test_fresh_token_used_without_refresh() {
        let store = Arc::new(InMemoryStore::new());
        let api = Arc::new(FakeCalendarApi::new());
        store.seed_credential(fresh_credential(1));

        let credential = manager(store, api.clone()).authorized(1).await.unwrap();
        assert_eq!(credential.access_token, "stored-token");
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_expiring_token_refreshed_and_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let api = Arc::new(FakeCalendarApi::new());
        let mut credential = fresh_credential(1);
        // Inside the 60s skew window.
        credential.expires_at = Utc::now() + Duration::seconds(10);
        store.seed_credential(credential);

        let refreshed = manager(store.clone(), api.clone())
            .authorized(1)
            .await
            .unwrap();
        assert_eq!(api.refresh_calls(), 1);
        assert_eq!(refreshed.access_token, "fresh-token-1");

        // The new token survived into the store.
        let stored = store.credential(1).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "fresh-token-1");
        assert!(stored.expires_at > Utc::now() + Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_invalid_grant_flags_reauthorization() {
        let store = Arc::new(InMemoryStore::new());
        let api = Arc::new(FakeCalendarApi::new());
        let mut credential = fresh_credential(1);
        credential.expires_at = Utc::now() - Duration::minutes(5);
        store.seed_credential(credential);
        api.fail_refresh(400, Some("invalid_grant"));

        let err = manager(store.clone(), api).authorized(1).await.unwrap_err();
        assert!(matches!(err, SyncError::NeedsReauthorization(1)));
        assert!(store.credential(1).await.unwrap().unwrap().needs_reauthorization);
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_is_retryable() {
        let store = Arc::new(InMemoryStore::new());
        let api = Arc::new(FakeCalendarApi::new());
        let mut credential = fresh_credential(1);
        credential.expires_at = Utc::now();
        store.seed_credential(credential);
        api.fail_refresh(503, None);

        let err = manager(store.clone(), api).authorized(1).await.unwrap_err();
        assert!(err.is_retryable());
        // Transient trouble must not burn the grant.
        assert!(!store.credential(1).await.unwrap().unwrap().needs_reauthorization);
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let store = Arc::new(InMemoryStore::new());
        let api = Arc::new(FakeCalendarApi::new());
        let err = manager(store, api).authorized(42).await.unwrap_err();
        assert!(matches!(err, SyncError::NotConnected(42)));
    }

    #[tokio::test]
    async fn test_flagged_credential_short_circuits() {
        let store = Arc::new(InMemoryStore::new());
        let api = Arc::new(FakeCalendarApi::new());
        let mut credential = fresh_credential(1);
        credential.needs_reauthorization = true;
        // Expired too, but no refresh may be attempted.
        credential.expires_at = Utc::now() - Duration::hours(1);
        store.seed_credential(credential);

        let err = manager(store, api.clone()).authorized(1).await.unwrap_err();
        assert!(matches!(err, SyncError::NeedsReauthorization(1)));
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_calendar_selected() {
        let store = Arc::new(InMemoryStore::new());
        let api = Arc::new(FakeCalendarApi::new());
        let mut credential = fresh_credential(1);
        credential.calendar_id = None;
        store.seed_credential(credential);

        let err = manager(store, api)
            .authorized_calendar(1)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoCalendarSelected(1)));
    }
}

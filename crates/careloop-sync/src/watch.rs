//! # Watch-Channel Manager
//!
//! Lifecycle of push-notification subscriptions ("watch channels"),
//! one per (user, calendar).
//!
//! ## Channel Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Watch Channel Lifecycle                            │
//! │                                                                         │
//! │  ensure_watch ──► existing channel with > threshold remaining?          │
//! │                       │ yes: reuse unchanged                            │
//! │                       │ no:  stop old (best-effort) ► delete record     │
//! │                       ▼      ► register fresh id+token ► persist        │
//! │                                                                         │
//! │  poll loop ──► refresh_expiring: channels inside the lookahead          │
//! │                window, deduplicated by user, renewed one by one;        │
//! │                per-user failures logged, never block the rest           │
//! │                                                                         │
//! │  webhook ──► resolve_notification: token ► channel id ► resource id     │
//! │              lookup priority; STOP deletes the record, anything         │
//! │              else asks the scheduler for an immediate sync              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use careloop_core::{UserId, WatchChannel};

use crate::config::SyncConfig;
use crate::credentials::CredentialManager;
use crate::error::SyncResult;
use crate::gateway::CalendarApi;
use crate::provider::{StopChannelRequest, WatchNotificationHeaders, WatchParams, WatchRequest};
use crate::store::CareStore;

// =============================================================================
// Notification Outcome
// =============================================================================

/// What an inbound webhook notification resolved to. The scheduler
/// decides what happens next; this manager only maps and mutates
/// channel records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Malformed or unrecognized notification; logged and dropped.
    Ignored,
    /// The provider stopped the channel; its record was deleted.
    ChannelStopped(UserId),
    /// A change notification (or the initial handshake) for this user.
    TriggerSync(UserId),
}

// =============================================================================
// Watch-Channel Manager
// =============================================================================

pub struct WatchChannelManager {
    store: Arc<dyn CareStore>,
    api: Arc<dyn CalendarApi>,
    credentials: Arc<CredentialManager>,
    webhook_address: String,
    channel_ttl_secs: u64,
    renewal_threshold: Duration,
    renewal_lookahead: Duration,
}

impl WatchChannelManager {
    pub fn new(
        store: Arc<dyn CareStore>,
        api: Arc<dyn CalendarApi>,
        credentials: Arc<CredentialManager>,
        config: &SyncConfig,
    ) -> Self {
        WatchChannelManager {
            store,
            api,
            credentials,
            webhook_address: config.webhook_address(),
            channel_ttl_secs: config.channel_ttl_secs,
            renewal_threshold: Duration::seconds(config.renewal_threshold_secs as i64),
            renewal_lookahead: Duration::seconds(config.renewal_lookahead_secs as i64),
        }
    }

    /// Guarantees a live watch channel for (user, calendar). An
    /// existing channel with more than the renewal threshold remaining
    /// is returned unchanged; anything closer to expiry is rotated.
    pub async fn ensure_watch(
        &self,
        user_id: UserId,
        access_token: &str,
        calendar_id: &str,
    ) -> SyncResult<WatchChannel> {
        let now = Utc::now();
        if let Some(existing) = self
            .store
            .watch_channel_for_calendar(user_id, calendar_id)
            .await?
        {
            if existing.remaining(now) > self.renewal_threshold {
                debug!(
                    user_id,
                    channel_id = %existing.id,
                    expires_at = %existing.expires_at,
                    "Watch channel still fresh"
                );
                return Ok(existing);
            }
            self.retire_channel(access_token, &existing).await?;
        }

        self.register_channel(user_id, access_token, calendar_id).await
    }

    /// Stops and deletes the channel for (user, calendar), e.g. when
    /// the user disconnects their calendar.
    pub async fn drop_watch(
        &self,
        user_id: UserId,
        access_token: &str,
        calendar_id: &str,
    ) -> SyncResult<()> {
        if let Some(channel) = self
            .store
            .watch_channel_for_calendar(user_id, calendar_id)
            .await?
        {
            self.retire_channel(access_token, &channel).await?;
        }
        Ok(())
    }

    /// Renews every channel expiring inside the lookahead window,
    /// deduplicated by user. Called by the scheduler's poll loop.
    pub async fn refresh_expiring(&self) -> SyncResult<()> {
        let cutoff = Utc::now() + self.renewal_lookahead;
        let expiring = self.store.watch_channels_expiring_before(cutoff).await?;
        if expiring.is_empty() {
            return Ok(());
        }

        let mut by_user: HashMap<UserId, WatchChannel> = HashMap::new();
        for channel in expiring {
            by_user.entry(channel.user_id).or_insert(channel);
        }
        info!(users = by_user.len(), "Renewing expiring watch channels");

        for (user_id, channel) in by_user {
            if let Err(err) = self.renew_for_user(user_id, &channel.calendar_id).await {
                warn!(user_id, error = %err, "Watch renewal failed for user");
            }
        }
        Ok(())
    }

    async fn renew_for_user(&self, user_id: UserId, calendar_id: &str) -> SyncResult<()> {
        let credential = self.credentials.authorized(user_id).await?;
        self.ensure_watch(user_id, &credential.access_token, calendar_id)
            .await?;
        Ok(())
    }

    /// Maps inbound webhook headers to a stored channel and the action
    /// to take. Lookup priority: verification token, then channel id,
    /// then resource id; the token is an opaque secret minted by this
    /// system and therefore the most trustworthy key.
    pub async fn resolve_notification(
        &self,
        headers: &WatchNotificationHeaders,
    ) -> SyncResult<NotificationOutcome> {
        if headers.channel_id.is_none() || headers.resource_id.is_none() {
            warn!(?headers, "Webhook notification missing channel or resource id");
            return Ok(NotificationOutcome::Ignored);
        }

        let channel = self.lookup_channel(headers).await?;
        let Some(channel) = channel else {
            warn!(
                channel_id = headers.channel_id.as_deref().unwrap_or("-"),
                "Webhook notification for unknown channel"
            );
            return Ok(NotificationOutcome::Ignored);
        };

        if headers.is_stop() {
            info!(
                user_id = channel.user_id,
                channel_id = %channel.id,
                "Provider stopped watch channel"
            );
            self.store.delete_watch_channel(&channel.id).await?;
            return Ok(NotificationOutcome::ChannelStopped(channel.user_id));
        }

        debug!(
            user_id = channel.user_id,
            state = headers.effective_message_type().unwrap_or("-"),
            "Watch notification resolved"
        );
        Ok(NotificationOutcome::TriggerSync(channel.user_id))
    }

    async fn lookup_channel(
        &self,
        headers: &WatchNotificationHeaders,
    ) -> SyncResult<Option<WatchChannel>> {
        if let Some(token) = headers.channel_token.as_deref() {
            if let Some(channel) = self.store.watch_channel_by_token(token).await? {
                return Ok(Some(channel));
            }
        }
        if let Some(id) = headers.channel_id.as_deref() {
            if let Some(channel) = self.store.watch_channel_by_id(id).await? {
                return Ok(Some(channel));
            }
        }
        if let Some(resource_id) = headers.resource_id.as_deref() {
            if let Some(channel) = self.store.watch_channel_by_resource_id(resource_id).await? {
                return Ok(Some(channel));
            }
        }
        Ok(None)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Stops a channel on the provider (best-effort) and removes its
    /// local record. Provider-side stop failures are logged only: the
    /// channel will lapse on its own at expiry.
    async fn retire_channel(&self, access_token: &str, channel: &WatchChannel) -> SyncResult<()> {
        let request = StopChannelRequest {
            id: channel.id.clone(),
            resource_id: channel.resource_id.clone(),
        };
        if let Err(err) = self.api.stop_channel(access_token, &request).await {
            warn!(
                channel_id = %channel.id,
                error = %err,
                "Failed to stop watch channel on provider; continuing"
            );
        }
        self.store.delete_watch_channel(&channel.id).await
    }

    async fn register_channel(
        &self,
        user_id: UserId,
        access_token: &str,
        calendar_id: &str,
    ) -> SyncResult<WatchChannel> {
        let id = Uuid::new_v4().to_string();
        let token = Uuid::new_v4().to_string();
        let request = WatchRequest {
            id: id.clone(),
            channel_type: "web_hook".to_string(),
            address: self.webhook_address.clone(),
            token: token.clone(),
            params: WatchParams {
                ttl: self.channel_ttl_secs.to_string(),
            },
        };

        let response = self
            .api
            .watch_events(access_token, calendar_id, &request)
            .await?;
        let expires_at = response
            .expiration_time()
            .unwrap_or_else(|| Utc::now() + Duration::seconds(self.channel_ttl_secs as i64));

        let channel = WatchChannel {
            id: response.id,
            user_id,
            calendar_id: calendar_id.to_string(),
            resource_id: response.resource_id,
            resource_uri: response.resource_uri,
            expires_at,
            token,
        };
        self.store.insert_watch_channel(&channel).await?;
        info!(
            user_id,
            channel_id = %channel.id,
            expires_at = %channel.expires_at,
            "Watch channel registered"
        );
        Ok(channel)
    }
}

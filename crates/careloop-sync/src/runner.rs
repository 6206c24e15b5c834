//! # Sync Runner
//!
//! The push/pull algorithm for one user. One invocation = one run.
//!
//! ## Run Structure
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Run (one user)                             │
//! │                                                                         │
//! │  1. resolve credential + calendar (token refreshed if near expiry)      │
//! │                                                                         │
//! │  2. PUSH PHASE                                                          │
//! │     pending local items ──► hash ──► unchanged? skip                    │
//! │                                 └──► changed: PATCH (or POST when       │
//! │                                      unlinked / remote gone), then      │
//! │                                      persist link {push, idle, hash}    │
//! │                                                                         │
//! │  3. PULL PHASE (incremental, by sync token)                             │
//! │     remote events ──► cancelled? delete link                            │
//! │                   └─► conflict decision ──► remote wins: apply fields,  │
//! │                       persist link {pull, idle, remote stamp}           │
//! │     advance sync token, stamp last-pulled-at                            │
//! │                                                                         │
//! │  Per-item failures land in summary.errors and never abort the run;     │
//! │  run-level failures (credential, list call) surface as Err for the     │
//! │  scheduler's backoff.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use careloop_core::{ItemId, ItemKind, LinkStatus, SyncDirection, SyncLink, UserId};

use crate::config::SyncConfig;
use crate::conflict::{self, ConflictDecision};
use crate::credentials::CredentialManager;
use crate::error::{SyncError, SyncResult};
use crate::gateway::CalendarApi;
use crate::mapper;
use crate::provider::{EventListResponse, EventResource};
use crate::store::{CareStore, SyncItem};

// =============================================================================
// Run Summary
// =============================================================================

/// Per-item failure recorded during a run.
#[derive(Debug, Clone)]
pub struct SyncItemError {
    /// The affected item, when one could be identified.
    pub item: Option<(ItemKind, ItemId)>,
    pub message: String,
}

/// Outcome of one sync run. Counts plus a structured error list; item
/// failures are reported here rather than raised.
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub pushed: u32,
    pub pulled: u32,
    pub deleted: u32,
    pub errors: Vec<SyncItemError>,
}

impl SyncSummary {
    fn record_error(&mut self, item: Option<(ItemKind, ItemId)>, message: impl Into<String>) {
        self.errors.push(SyncItemError {
            item,
            message: message.into(),
        });
    }
}

/// Options for one run.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// When false, only the push phase runs (used by callers reacting
    /// to a purely local mutation that cannot have remote fallout).
    pub pull_remote: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions { pull_remote: true }
    }
}

// =============================================================================
// Sync Runner
// =============================================================================

pub struct SyncRunner {
    store: Arc<dyn CareStore>,
    api: Arc<dyn CalendarApi>,
    credentials: Arc<CredentialManager>,
    default_zone: Tz,
}

impl SyncRunner {
    pub fn new(
        store: Arc<dyn CareStore>,
        api: Arc<dyn CalendarApi>,
        credentials: Arc<CredentialManager>,
        config: &SyncConfig,
    ) -> SyncResult<Self> {
        Ok(SyncRunner {
            store,
            api,
            credentials,
            default_zone: config.default_zone()?,
        })
    }

    /// Runs one full sync for a user.
    ///
    /// Authorization problems (not connected, grant revoked, no
    /// calendar selected) come back as a summary carrying one error and
    /// no mutations: they are terminal for this user and must not feed
    /// the retry loop. Transient run-level failures surface as `Err`.
    pub async fn run_sync(&self, user_id: UserId, options: SyncOptions) -> SyncResult<SyncSummary> {
        let mut summary = SyncSummary::default();

        let (credential, calendar_id) = match self.credentials.authorized_calendar(user_id).await {
            Ok(pair) => pair,
            Err(err)
                if err.is_authorization_failure()
                    || matches!(err, SyncError::NoCalendarSelected(_)) =>
            {
                warn!(user_id, error = %err, "Sync skipped: user not authorized");
                summary.record_error(None, err.to_string());
                return Ok(summary);
            }
            Err(err) => return Err(err),
        };

        self.push_phase(user_id, &credential.access_token, &calendar_id, &mut summary)
            .await?;

        if options.pull_remote {
            self.pull_phase(
                user_id,
                &credential.access_token,
                &calendar_id,
                credential.sync_token.as_deref(),
                &mut summary,
            )
            .await?;
        }

        info!(
            user_id,
            pushed = summary.pushed,
            pulled = summary.pulled,
            deleted = summary.deleted,
            errors = summary.errors.len(),
            "Sync run complete"
        );
        Ok(summary)
    }

    // -------------------------------------------------------------------------
    // Push Phase
    // -------------------------------------------------------------------------

    async fn push_phase(
        &self,
        user_id: UserId,
        access_token: &str,
        calendar_id: &str,
        summary: &mut SyncSummary,
    ) -> SyncResult<()> {
        let items = self.store.pending_items(user_id).await?;
        debug!(user_id, count = items.len(), "Push phase starting");

        for item in items {
            let key = (item.kind(), item.id());
            match self.push_item(access_token, calendar_id, &item).await {
                Ok(true) => summary.pushed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        user_id,
                        kind = %key.0,
                        item_id = key.1,
                        error = %err,
                        "Item push failed"
                    );
                    summary.record_error(Some(key), err.to_string());
                    if let Err(store_err) = self
                        .store
                        .record_link_error(key.0, key.1, &err.to_string())
                        .await
                    {
                        warn!(item_id = key.1, error = %store_err, "Could not record link error");
                    }
                }
            }
        }
        Ok(())
    }

    /// Pushes one item. Returns false when the push was suppressed
    /// because the content hash is unchanged since the last sync.
    async fn push_item(
        &self,
        access_token: &str,
        calendar_id: &str,
        item: &SyncItem,
    ) -> SyncResult<bool> {
        let hash = content_hash(item);
        let payload = self.build_payload(item);

        let written = match item.sync_link() {
            Some(link) if link.content_hash == hash => {
                debug!(item_id = item.id(), "Push suppressed: content unchanged");
                if link.status != LinkStatus::Idle {
                    // A pending flag with no material change (edit
                    // reverted); settle the link without a provider call.
                    let mut settled = link.clone();
                    settled.status = LinkStatus::Idle;
                    settled.last_error = None;
                    settled.synced_at = Utc::now();
                    self.store.upsert_sync_link(&settled).await?;
                }
                return Ok(false);
            }
            Some(link) => {
                match self
                    .api
                    .patch_event(access_token, calendar_id, &link.event_id, &payload)
                    .await
                {
                    Ok(event) => event,
                    Err(err) if err.is_stale_reference() => {
                        // The remote event is gone; recreate instead of
                        // failing the item forever.
                        debug!(
                            item_id = item.id(),
                            event_id = %link.event_id,
                            "Remote event gone; recreating"
                        );
                        self.api
                            .insert_event(access_token, calendar_id, &payload)
                            .await?
                    }
                    Err(err) => return Err(err),
                }
            }
            None => {
                self.api
                    .insert_event(access_token, calendar_id, &payload)
                    .await?
            }
        };

        let event_id = written
            .id
            .clone()
            .ok_or_else(|| SyncError::InvalidEvent("provider returned event without id".into()))?;

        let link = SyncLink {
            item_id: item.id(),
            item_kind: item.kind(),
            calendar_id: calendar_id.to_string(),
            event_id,
            etag: written.etag.clone(),
            synced_at: Utc::now(),
            direction: SyncDirection::Push,
            content_hash: hash,
            remote_updated_at: written.updated,
            status: LinkStatus::Idle,
            last_error: None,
        };
        self.store.upsert_sync_link(&link).await?;
        Ok(true)
    }

    fn build_payload(&self, item: &SyncItem) -> EventResource {
        match item {
            SyncItem::Appointment(a) => mapper::build_appointment_event(a, self.default_zone),
            SyncItem::Bill(b) => mapper::build_bill_event(b),
        }
    }

    // -------------------------------------------------------------------------
    // Pull Phase
    // -------------------------------------------------------------------------

    async fn pull_phase(
        &self,
        user_id: UserId,
        access_token: &str,
        calendar_id: &str,
        sync_token: Option<&str>,
        summary: &mut SyncSummary,
    ) -> SyncResult<()> {
        let list = self
            .list_remote(user_id, access_token, calendar_id, sync_token)
            .await?;
        debug!(user_id, count = list.items.len(), "Pull phase starting");

        for event in &list.items {
            let key = mapper::embedded_item_ref(event);
            if let Err(err) = self
                .apply_remote_event(user_id, calendar_id, event, summary)
                .await
            {
                warn!(user_id, error = %err, "Remote event could not be applied");
                summary.record_error(key, err.to_string());
            }
        }

        if let Some(token) = list.next_sync_token.as_deref() {
            self.store.update_sync_token(user_id, Some(token)).await?;
        }
        self.store.mark_pulled(user_id, Utc::now()).await?;
        Ok(())
    }

    /// Lists remote changes, transparently restarting as a full resync
    /// when the provider reports the stored sync token expired (410).
    async fn list_remote(
        &self,
        user_id: UserId,
        access_token: &str,
        calendar_id: &str,
        sync_token: Option<&str>,
    ) -> SyncResult<EventListResponse> {
        match self.api.list_events(access_token, calendar_id, sync_token).await {
            Ok(list) => Ok(list),
            Err(SyncError::Provider { status: 410, .. }) if sync_token.is_some() => {
                info!(user_id, "Sync token expired; falling back to full resync");
                self.store.update_sync_token(user_id, None).await?;
                self.api.list_events(access_token, calendar_id, None).await
            }
            Err(err) => Err(err),
        }
    }

    async fn apply_remote_event(
        &self,
        user_id: UserId,
        calendar_id: &str,
        event: &EventResource,
        summary: &mut SyncSummary,
    ) -> SyncResult<()> {
        let Some(event_id) = event.id.as_deref() else {
            return Err(SyncError::InvalidEvent("remote event has no id".into()));
        };

        // Resolve the owning local item: embedded metadata first, the
        // sync-link index second. Events created outside this system
        // have neither and are not ours to touch.
        let item = match mapper::embedded_item_ref(event) {
            Some((kind, item_id)) => self.store.item(kind, item_id).await?,
            None => None,
        };
        let item = match item {
            Some(item) => Some(item),
            None => self.store.item_by_event_id(user_id, event_id).await?,
        };
        let Some(item) = item else {
            debug!(user_id, event_id, "Remote event has no local counterpart; ignoring");
            return Ok(());
        };

        if event.is_cancelled() {
            if item.sync_link().is_some() {
                self.store.delete_sync_link(item.kind(), item.id()).await?;
                summary.deleted += 1;
                debug!(item_id = item.id(), event_id, "Remote cancellation; link deleted");
            }
            return Ok(());
        }

        let last_observed = item.sync_link().and_then(|l| l.remote_updated_at);
        match conflict::resolve(last_observed, event.updated) {
            ConflictDecision::IgnoreStale => {
                debug!(item_id = item.id(), event_id, "Remote revision already seen");
                Ok(())
            }
            ConflictDecision::ApplyRemote => {
                let patch = mapper::map_remote_event(event, self.default_zone)?;
                let updated = self
                    .store
                    .apply_remote_fields(item.kind(), item.id(), &patch)
                    .await?;

                // Remote won: any pending local push is superseded by
                // settling the link idle with the fresh hash.
                let link = SyncLink {
                    item_id: item.id(),
                    item_kind: item.kind(),
                    calendar_id: calendar_id.to_string(),
                    event_id: event_id.to_string(),
                    etag: event.etag.clone(),
                    synced_at: Utc::now(),
                    direction: SyncDirection::Pull,
                    content_hash: content_hash(&updated),
                    remote_updated_at: event.updated,
                    status: LinkStatus::Idle,
                    last_error: None,
                };
                self.store.upsert_sync_link(&link).await?;
                summary.pulled += 1;
                Ok(())
            }
        }
    }
}

fn content_hash(item: &SyncItem) -> String {
    match item {
        SyncItem::Appointment(a) => mapper::appointment_content_hash(a),
        SyncItem::Bill(b) => mapper::bill_content_hash(b),
    }
}

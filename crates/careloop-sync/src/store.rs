//! # Persistence Collaborator
//!
//! The sync engine does not own any tables. Everything it reads or
//! writes goes through the [`CareStore`] trait, implemented by the
//! application's persistence layer (outside this workspace).
//!
//! ## Contract Highlights
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CareStore Contract                               │
//! │                                                                         │
//! │  • Every call is independently committed: a failure mid-run leaves     │
//! │    previously persisted per-item results in place.                     │
//! │                                                                         │
//! │  • apply_remote_fields is a SYNC-ORIGINATED write: implementations     │
//! │    must NOT mark the item's sync link pending (that would re-queue     │
//! │    the remote change as an outbound push and loop forever).            │
//! │                                                                         │
//! │  • record_link_error is best-effort: a no-op when the item has no      │
//! │    sync link yet.                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use careloop_core::{
    Appointment, Bill, Credential, ItemId, ItemKind, SyncLink, UserId, WatchChannel,
};

use crate::error::SyncResult;

// =============================================================================
// Sync Item
// =============================================================================

/// A synchronizable local item: either kind, with its optional link.
#[derive(Debug, Clone)]
pub enum SyncItem {
    Appointment(Appointment),
    Bill(Bill),
}

impl SyncItem {
    pub fn id(&self) -> ItemId {
        match self {
            SyncItem::Appointment(a) => a.id,
            SyncItem::Bill(b) => b.id,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            SyncItem::Appointment(_) => ItemKind::Appointment,
            SyncItem::Bill(_) => ItemKind::Bill,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            SyncItem::Appointment(a) => a.user_id,
            SyncItem::Bill(b) => b.user_id,
        }
    }

    pub fn sync_link(&self) -> Option<&SyncLink> {
        match self {
            SyncItem::Appointment(a) => a.sync_link.as_ref(),
            SyncItem::Bill(b) => b.sync_link.as_ref(),
        }
    }
}

// =============================================================================
// Remote Item Patch
// =============================================================================

/// Local fields recovered from a remote event, ready to be written
/// back through [`CareStore::apply_remote_fields`]. Fields that do not
/// apply to the item kind (e.g. `due_date` for appointments) are
/// ignored by implementations.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteItemPatch {
    /// Event summary (appointment title / bill payee).
    pub title: String,

    /// Event description.
    pub notes: Option<String>,

    pub location: Option<String>,

    /// Start instant for timed events.
    pub starts_at: Option<DateTime<Utc>>,

    /// End instant for timed events.
    pub ends_at: Option<DateTime<Utc>>,

    /// IANA zone the instants were expressed in (explicit or inferred).
    pub time_zone: Option<String>,

    /// Due date for all-day events.
    pub due_date: Option<NaiveDate>,
}

// =============================================================================
// Store Trait
// =============================================================================

/// Typed persistence functions consumed by the sync engine.
#[async_trait]
pub trait CareStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Credentials
    // -------------------------------------------------------------------------

    /// Loads the stored calendar credential for a user, tokens already
    /// decrypted.
    async fn credential(&self, user_id: UserId) -> SyncResult<Option<Credential>>;

    /// Persists a refreshed access token and its expiry.
    async fn update_credential_tokens(
        &self,
        user_id: UserId,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<()>;

    /// Flags the credential as needing reauthorization. Sync for this
    /// user stops until the user reconnects.
    async fn set_needs_reauthorization(&self, user_id: UserId) -> SyncResult<()>;

    /// Persists (or clears, with `None`) the provider sync token.
    async fn update_sync_token(&self, user_id: UserId, sync_token: Option<&str>)
        -> SyncResult<()>;

    /// Records the completion time of a successful pull phase.
    async fn mark_pulled(&self, user_id: UserId, at: DateTime<Utc>) -> SyncResult<()>;

    /// Users with a connected, non-flagged calendar credential. Drives
    /// the polling-fallback sweep.
    async fn connected_user_ids(&self) -> SyncResult<Vec<UserId>>;

    // -------------------------------------------------------------------------
    // Items
    // -------------------------------------------------------------------------

    /// Items for a user whose link is pending, plus provider-eligible
    /// items that have no link yet.
    async fn pending_items(&self, user_id: UserId) -> SyncResult<Vec<SyncItem>>;

    /// Loads one item with its link.
    async fn item(&self, kind: ItemKind, item_id: ItemId) -> SyncResult<Option<SyncItem>>;

    /// Resolves the local item a provider event belongs to via the
    /// sync-link index on the provider event id.
    async fn item_by_event_id(
        &self,
        user_id: UserId,
        event_id: &str,
    ) -> SyncResult<Option<SyncItem>>;

    /// Writes remote-won fields back to the local item. This is a
    /// sync-originated mutation: implementations must not re-queue the
    /// item as a pending push. Returns the updated item.
    async fn apply_remote_fields(
        &self,
        kind: ItemKind,
        item_id: ItemId,
        patch: &RemoteItemPatch,
    ) -> SyncResult<SyncItem>;

    // -------------------------------------------------------------------------
    // Sync Links
    // -------------------------------------------------------------------------

    /// Creates or replaces the link for (kind, item_id).
    async fn upsert_sync_link(&self, link: &SyncLink) -> SyncResult<()>;

    /// Deletes the link for an item, if one exists.
    async fn delete_sync_link(&self, kind: ItemKind, item_id: ItemId) -> SyncResult<()>;

    /// Marks an existing link errored with the given message. No-op
    /// when the item has no link.
    async fn record_link_error(
        &self,
        kind: ItemKind,
        item_id: ItemId,
        message: &str,
    ) -> SyncResult<()>;

    // -------------------------------------------------------------------------
    // Watch Channels
    // -------------------------------------------------------------------------

    /// The channel registered for (user, calendar), if any.
    async fn watch_channel_for_calendar(
        &self,
        user_id: UserId,
        calendar_id: &str,
    ) -> SyncResult<Option<WatchChannel>>;

    /// Lookup by verification token (most trustworthy key).
    async fn watch_channel_by_token(&self, token: &str) -> SyncResult<Option<WatchChannel>>;

    /// Lookup by channel id.
    async fn watch_channel_by_id(&self, channel_id: &str) -> SyncResult<Option<WatchChannel>>;

    /// Lookup by provider resource id.
    async fn watch_channel_by_resource_id(
        &self,
        resource_id: &str,
    ) -> SyncResult<Option<WatchChannel>>;

    async fn insert_watch_channel(&self, channel: &WatchChannel) -> SyncResult<()>;

    async fn delete_watch_channel(&self, channel_id: &str) -> SyncResult<()>;

    /// Channels expiring strictly before `cutoff`.
    async fn watch_channels_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> SyncResult<Vec<WatchChannel>>;
}

//! # Domain Types
//!
//! Core domain records used by the CareLoop application and the calendar
//! sync engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  Appointment    │   │      Bill       │   │   Credential    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │   │  id             │   │  user_id        │       │
//! │  │  starts_at      │   │  due_date       │   │  tokens/expiry  │       │
//! │  │  ends_at        │   │  amount_cents   │   │  calendar_id    │       │
//! │  │  time_zone      │   │  payee          │   │  sync_token     │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    SyncLink     │   │  WatchChannel   │   │   LinkStatus    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  event_id/etag  │   │  channel id     │   │  Idle           │       │
//! │  │  content_hash   │   │  resource id    │   │  Pending        │       │
//! │  │  direction      │   │  expiration     │   │  Error          │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Invariant: at most one `SyncLink` exists per local item at a time. A
//! `LinkStatus::Pending` link represents an unconfirmed local mutation
//! awaiting push.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// =============================================================================
// Identifiers
// =============================================================================

/// Database identifier of a CareLoop user.
pub type UserId = i64;

/// Database identifier of a synchronizable item (appointment or bill).
pub type ItemId = i64;

// =============================================================================
// Item Kind
// =============================================================================

/// The kind of local item a sync link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A scheduled care appointment (timed event).
    Appointment,
    /// A bill with a due date (all-day event).
    Bill,
}

impl ItemKind {
    /// Stable wire/storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Appointment => "appointment",
            ItemKind::Bill => "bill",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "appointment" => Ok(ItemKind::Appointment),
            "bill" => Ok(ItemKind::Bill),
            other => Err(CoreError::InvalidItemKind(other.to_string())),
        }
    }
}

// =============================================================================
// Appointment
// =============================================================================

/// A care appointment owned by the CRUD layer.
///
/// The sync engine reads appointments and, when a remote change wins
/// conflict resolution, writes selected fields back through the
/// persistence collaborator with an explicit sync-originated flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    /// Unique identifier.
    pub id: ItemId,

    /// Owning user.
    pub user_id: UserId,

    /// Short title shown as the calendar event summary.
    pub title: String,

    /// Optional longer notes (event description).
    pub notes: Option<String>,

    /// Optional location string.
    pub location: Option<String>,

    /// Name of the care-team member the appointment is assigned to.
    pub assigned_to: Option<String>,

    /// Start instant (UTC).
    pub starts_at: DateTime<Utc>,

    /// End instant (UTC).
    pub ends_at: DateTime<Utc>,

    /// IANA zone the appointment was entered in, if known.
    pub time_zone: Option<String>,

    /// Last local mutation time.
    pub updated_at: DateTime<Utc>,

    /// Sync state, when the item has been pushed or pulled at least once.
    pub sync_link: Option<SyncLink>,
}

// =============================================================================
// Bill
// =============================================================================

/// A bill tracked for a care recipient.
///
/// Bills synchronize as all-day events on their due date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    /// Unique identifier.
    pub id: ItemId,

    /// Owning user.
    pub user_id: UserId,

    /// Who the bill is payable to.
    pub payee: String,

    /// Amount in cents (smallest currency unit, never floats).
    pub amount_cents: i64,

    /// Due date (calendar date, no time component).
    pub due_date: NaiveDate,

    /// Optional notes.
    pub notes: Option<String>,

    /// Last local mutation time.
    pub updated_at: DateTime<Utc>,

    /// Sync state, when the item has been pushed or pulled at least once.
    pub sync_link: Option<SyncLink>,
}

// =============================================================================
// Credential
// =============================================================================

/// Per-user calendar provider credential.
///
/// Owned exclusively by the credential manager; mutated on token refresh
/// or reauthorization. Token values arrive decrypted from the
/// persistence layer (encryption at rest is its concern, not ours).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Owning user.
    pub user_id: UserId,

    /// Current OAuth access token.
    pub access_token: String,

    /// OAuth refresh token.
    pub refresh_token: String,

    /// Access token expiry instant.
    pub expires_at: DateTime<Utc>,

    /// OAuth scopes granted at connect time.
    pub scopes: Vec<String>,

    /// Provider calendar selected for sync, if the user connected one.
    pub calendar_id: Option<String>,

    /// Opaque incremental-pull cursor issued by the provider.
    pub sync_token: Option<String>,

    /// Completion time of the last successful pull phase.
    pub last_pulled_at: Option<DateTime<Utc>>,

    /// Set when a token refresh was rejected with invalid_grant; the
    /// user must reconnect before sync resumes.
    pub needs_reauthorization: bool,
}

// =============================================================================
// Sync Link
// =============================================================================

/// Direction of the most recent sync for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Local change was written to the provider.
    Push,
    /// Remote change was applied locally.
    Pull,
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncDirection::Push => write!(f, "push"),
            SyncDirection::Pull => write!(f, "pull"),
        }
    }
}

impl std::str::FromStr for SyncDirection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(SyncDirection::Push),
            "pull" => Ok(SyncDirection::Pull),
            other => Err(CoreError::InvalidSyncDirection(other.to_string())),
        }
    }
}

/// Lifecycle status of a sync link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Local and remote are believed consistent.
    Idle,
    /// A local mutation is awaiting push.
    Pending,
    /// The last sync attempt for this item failed.
    Error,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Idle => write!(f, "idle"),
            LinkStatus::Pending => write!(f, "pending"),
            LinkStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LinkStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(LinkStatus::Idle),
            "pending" => Ok(LinkStatus::Pending),
            "error" => Ok(LinkStatus::Error),
            other => Err(CoreError::InvalidLinkStatus(other.to_string())),
        }
    }
}

/// Persisted association between a local item and a remote calendar
/// event, carrying the state needed for idempotent bidirectional sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLink {
    /// Local item this link belongs to.
    pub item_id: ItemId,

    /// Kind of the local item.
    pub item_kind: ItemKind,

    /// Provider calendar the event lives in.
    pub calendar_id: String,

    /// Provider event identifier.
    pub event_id: String,

    /// Provider etag as last observed, if any.
    pub etag: Option<String>,

    /// When this item was last synced in either direction.
    pub synced_at: DateTime<Utc>,

    /// Direction of the last sync.
    pub direction: SyncDirection,

    /// Content hash of the local representation at last sync. A push is
    /// skipped when the current hash equals this value.
    pub content_hash: String,

    /// The provider's `updated` timestamp as last observed. Drives
    /// last-writer-wins conflict resolution.
    pub remote_updated_at: Option<DateTime<Utc>>,

    /// Current status.
    pub status: LinkStatus,

    /// Error text from the last failed attempt, if any.
    pub last_error: Option<String>,
}

// =============================================================================
// Watch Channel
// =============================================================================

/// A push-notification subscription registered with the provider for
/// one (user, calendar) pair. Time-limited; renewed before expiration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchChannel {
    /// Channel id minted by this system (UUID v4).
    pub id: String,

    /// Owning user.
    pub user_id: UserId,

    /// Calendar being watched.
    pub calendar_id: String,

    /// Opaque resource id assigned by the provider.
    pub resource_id: String,

    /// Resource URI reported by the provider.
    pub resource_uri: String,

    /// When the subscription expires on the provider side.
    pub expires_at: DateTime<Utc>,

    /// Opaque verification token minted by this system. Echoed back in
    /// webhook notifications; the most trustworthy lookup key.
    pub token: String,
}

impl WatchChannel {
    /// Remaining lifetime of the subscription relative to `now`.
    /// Negative durations clamp to zero.
    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.expires_at - now).max(chrono::Duration::zero())
    }
}

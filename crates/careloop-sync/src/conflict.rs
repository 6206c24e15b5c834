//! # Conflict Resolution
//!
//! Last-writer-wins, whole-record, no field-level merge.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Last-Writer-Wins Decision                            │
//! │                                                                         │
//! │  remote.updated  vs  link.remote_updated_at (last observed)             │
//! │                                                                         │
//! │    newer ───────► ApplyRemote: overwrite local fields; any pending      │
//! │                   local push is superseded and cleared                  │
//! │                                                                         │
//! │    equal/older ─► IgnoreStale: no-op, the pending local push (if        │
//! │                   any) survives for the next push phase                 │
//! │                                                                         │
//! │    never observed (no last-observed value) ──► ApplyRemote              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An equal timestamp means we already observed exactly this remote
//! revision, so it is treated as seen. Where remote beats a pending
//! local edit on recency, remote wins unconditionally: it is the side
//! with the authoritative external clock.

use chrono::{DateTime, Utc};

/// Outcome of comparing an inbound remote event against what was last
/// observed for the linked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// The remote revision is new: apply it locally, superseding any
    /// pending local push.
    ApplyRemote,
    /// The remote revision was already observed (or cannot be shown to
    /// be newer): ignore it and keep local state as-is.
    IgnoreStale,
}

/// Decides whether an inbound remote revision should be applied.
///
/// `last_observed` is `SyncLink.remote_updated_at`; `remote_updated`
/// is the provider's `updated` stamp on the inbound event. A missing
/// remote stamp against an existing observation is treated as stale:
/// without a comparable clock we must not clobber local state.
pub fn resolve(
    last_observed: Option<DateTime<Utc>>,
    remote_updated: Option<DateTime<Utc>>,
) -> ConflictDecision {
    match (last_observed, remote_updated) {
        (None, _) => ConflictDecision::ApplyRemote,
        (Some(observed), Some(remote)) if remote > observed => ConflictDecision::ApplyRemote,
        _ => ConflictDecision::IgnoreStale,
    }
}

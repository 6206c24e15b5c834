//! # Sync Error Types
//!
//! Error types for calendar sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Authorization  │  │   Transport     │  │     Provider            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  NotConnected   │  │  Transport      │  │  Provider{status,code}  │ │
//! │  │  NeedsReauth    │  │  Timeout        │  │  InvalidEvent           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Persistence   │  │  Configuration  │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Store          │  │  InvalidConfig  │  │  Serialization          │ │
//! │  │  Lock           │  │                 │  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The taxonomy matters for control flow: authorization failures are
//! terminal per user (never retried automatically), transport failures
//! feed the scheduler's exponential backoff, and per-item mapping
//! failures are recorded in a run summary without aborting the run.

use careloop_core::UserId;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Authorization Errors
    // =========================================================================
    /// No calendar credential is stored for the user.
    #[error("User {0} has no connected calendar")]
    NotConnected(UserId),

    /// The stored refresh token was rejected by the provider. Terminal
    /// until the user reconnects; never retried automatically.
    #[error("User {0} needs to reauthorize calendar access")]
    NeedsReauthorization(UserId),

    /// The credential has no calendar selected for sync.
    #[error("User {0} has no calendar selected for sync")]
    NoCalendarSelected(UserId),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Network-level failure talking to the provider.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// A provider call exceeded its timeout.
    #[error("Provider request timed out after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// Non-2xx response from the provider, with whatever structure the
    /// error body carried.
    #[error("Provider error {status} ({}): {context}", .code.as_deref().unwrap_or("no code"))]
    Provider {
        /// HTTP status.
        status: u16,
        /// Provider error code (e.g. "invalid_grant"), when present.
        code: Option<String>,
        /// What we were doing when it failed.
        context: String,
    },

    /// A remote event could not be mapped to local fields (e.g. missing
    /// start/end). Recorded per item; never aborts a run.
    #[error("Invalid remote event: {0}")]
    InvalidEvent(String),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// The persistence collaborator failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Advisory-lock machinery failed (not contention; contention is a
    /// normal outcome, not an error).
    #[error("Lock error: {0}")]
    Lock(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// JSON (de)serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Internal sync engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured timeout; callers
            // that know it produce Timeout directly.
            SyncError::Timeout(0)
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Lock(err.to_string())
    }
}

impl From<careloop_core::CoreError> for SyncError {
    fn from(err: careloop_core::CoreError) -> Self {
        SyncError::Store(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if this error is recoverable and the run can be
    /// retried with backoff by the scheduler.
    ///
    /// ## Retryable Errors
    /// - Transport failures and timeouts
    /// - Provider 5xx and 429 responses
    /// - Store failures (transient DB trouble)
    ///
    /// ## Non-Retryable Errors
    /// - Authorization failures (flagged on the credential instead)
    /// - Configuration errors
    /// - Per-item validation failures (isolated, not run-level)
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) | SyncError::Timeout(_) | SyncError::Store(_) => true,
            SyncError::Provider { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if this error means the user's grant is gone and
    /// the credential must be flagged for reauthorization.
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            SyncError::NeedsReauthorization(_) | SyncError::NotConnected(_)
        )
    }

    /// Returns true for a provider response indicating the referenced
    /// remote resource no longer exists (deleted/expired server side).
    pub fn is_stale_reference(&self) -> bool {
        matches!(self, SyncError::Provider { status, .. } if *status == 404 || *status == 410)
    }
}

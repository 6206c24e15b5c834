//! # careloop-sync: Calendar Sync Engine for CareLoop
//!
//! This crate keeps CareLoop's locally owned appointments and bills
//! consistent with a user's Google calendar, in both directions, under
//! concurrent local edits, concurrent remote edits, webhook pushes,
//! polling fallback, token expiry, and partial failure.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Calendar Sync Architecture                          │
//! │                                                                         │
//! │  CRUD mutation ─────┐                   ┌───── provider webhook         │
//! │                     ▼                   ▼                               │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   SyncScheduler (Coordinator)                    │  │
//! │  │                                                                  │  │
//! │  │  Debounce per user • single-flight + follow-up • advisory lock   │  │
//! │  │  exponential-backoff retry • poll loop (watch renewal + sweep)   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ at most one run per user               │
//! │                               ▼                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  SyncRunner    │  │ WatchChannel   │  │  CredentialManager     │    │
//! │  │                │  │ Manager        │  │                        │    │
//! │  │ Push pending   │  │ Register/renew │  │ Load credential        │    │
//! │  │ items, pull    │  │ /stop webhook  │  │ Refresh access token   │    │
//! │  │ incremental    │  │ subscriptions  │  │ Flag revoked grants    │    │
//! │  │ changes, LWW   │  │ Resolve pings  │  │                        │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          │                   │                       │                  │
//! │          ▼                   ▼                       ▼                  │
//! │  ┌────────────────┐  ┌──────────────────────────────────────────────┐  │
//! │  │  Event Mapper  │  │     GoogleCalendarGateway (CalendarApi)      │  │
//! │  │  + conflict    │  │                                              │  │
//! │  │  resolution    │  │  Bearer-auth JSON, typed wire shapes,        │  │
//! │  │  (pure)        │  │  secret-scrubbed logging, typed errors       │  │
//! │  └────────────────┘  └──────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  Persistence is an external collaborator behind the CareStore trait:   │
//! │  credentials, sync links, watch channels, and the items themselves.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Engine configuration (debounce, retry, zones, flags)
//! - [`error`] - Error taxonomy and retryability classification
//! - [`provider`] - Typed wire shapes for every provider call
//! - [`gateway`] - `CalendarApi` trait and the reqwest implementation
//! - [`credentials`] - Credential loading and token refresh
//! - [`mapper`] - Local ⇄ event translation, zone inference, hashing
//! - [`conflict`] - Last-writer-wins decision
//! - [`store`] - `CareStore`, the persistence seam
//! - [`runner`] - The per-user push/pull algorithm
//! - [`lock`] - Per-user advisory locks with a no-op fallback
//! - [`watch`] - Watch-channel lifecycle and webhook resolution
//! - [`scheduler`] - Debounce, single-flight, retry, polling
//!
//! ## Usage
//!
//! ```rust,ignore
//! use careloop_sync::{
//!     CredentialManager, GoogleCalendarGateway, SyncConfig, SyncRunner,
//!     SyncScheduler, WatchChannelManager, select_lock_provider,
//! };
//!
//! let config = SyncConfig::from_env()?;
//! let api = Arc::new(GoogleCalendarGateway::new(&config, client_id, client_secret)?);
//! let credentials = Arc::new(CredentialManager::new(store.clone(), api.clone(), &config));
//! let runner = Arc::new(SyncRunner::new(store.clone(), api.clone(), credentials.clone(), &config)?);
//! let watches = Arc::new(WatchChannelManager::new(store.clone(), api, credentials, &config));
//! let locks = select_lock_provider(Some(pool)).await;
//!
//! let scheduler = SyncScheduler::new(store, runner, watches, locks, config)?;
//! let poll_loop = scheduler.start_poll_loop();
//!
//! // From a CRUD handler:
//! scheduler.schedule_sync_debounced(user_id);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod conflict;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod lock;
pub mod mapper;
pub mod provider;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod watch;

#[cfg(test)]
pub(crate) mod testutil;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::SyncConfig;
pub use conflict::ConflictDecision;
pub use credentials::CredentialManager;
pub use error::{SyncError, SyncResult};
pub use gateway::{CalendarApi, GoogleCalendarGateway};
pub use lock::{select_lock_provider, LockGuard, LockProvider, NoopLockProvider, PgAdvisoryLockProvider};
pub use provider::{EventResource, WatchNotificationHeaders};
pub use runner::{SyncOptions, SyncRunner, SyncSummary};
pub use scheduler::SyncScheduler;
pub use store::{CareStore, RemoteItemPatch, SyncItem};
pub use watch::{NotificationOutcome, WatchChannelManager};

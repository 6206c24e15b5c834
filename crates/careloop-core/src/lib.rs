//! # careloop-core: Pure Domain Types for CareLoop
//!
//! This crate contains the domain records shared by the CareLoop CRUD
//! application, the persistence layer, and the calendar sync engine.
//! It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CareLoop Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          CRUD / REST Application (outside this workspace)       │   │
//! │  │    appointments ──► bills ──► invitations ──► documents         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ careloop-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────────┐  ┌────────────┐  ┌────────────────────────┐  │   │
//! │  │   │ Appointment │  │ Credential │  │ SyncLink, WatchChannel │  │   │
//! │  │   │    Bill     │  │   tokens   │  │ sync state per item    │  │   │
//! │  │   └─────────────┘  └────────────┘  └────────────────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE TYPES               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                careloop-sync (sync engine crate)                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain records (Appointment, Bill, Credential, SyncLink, WatchChannel)
//! - [`error`] - Domain error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::CoreError;
pub use types::*;

//! # Error Types
//!
//! Domain-specific error types for careloop-core.
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (item id, kind, etc.)
//! 3. Errors are enum variants, never String

use thiserror::Error;

/// Core domain errors.
///
/// These represent violations of domain-level rules and invalid
/// stored representations. I/O failures live in the consuming crates.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stored item-kind string is not a known kind.
    #[error("Invalid item kind: {0}")]
    InvalidItemKind(String),

    /// A stored sync direction string is not a known direction.
    #[error("Invalid sync direction: {0}")]
    InvalidSyncDirection(String),

    /// A stored link status string is not a known status.
    #[error("Invalid link status: {0}")]
    InvalidLinkStatus(String),
}

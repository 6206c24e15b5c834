//! # Per-User Lock Provider
//!
//! Cross-process mutual exclusion for sync runs, one lock per user.
//!
//! ## Lock Selection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Lock Provider Selection                           │
//! │                                                                         │
//! │  startup ──► capability probe (acquire + release a probe key)           │
//! │                  │                                                      │
//! │        ┌─────────┴──────────┐                                           │
//! │        ▼                    ▼                                           │
//! │  probe succeeds        probe fails / no database                        │
//! │  PgAdvisoryLock        NoopLock (one-time warning; single-instance      │
//! │  (advisory lock on     deployments still serialize through the          │
//! │   a held connection)    scheduler's in-process running set)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Contention is a normal outcome (`Ok(None)`), never an error; the
//! scheduler reschedules and moves on.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::{debug, warn};

use careloop_core::UserId;

use crate::error::SyncResult;

/// High 32 bits of every advisory-lock key, namespacing our locks away
/// from other applications sharing the database.
const LOCK_NAMESPACE: i64 = 0x4361_7265; // "Care"

/// Folds the namespace and user id into one advisory-lock bigint.
fn lock_key(user_id: UserId) -> i64 {
    (LOCK_NAMESPACE << 32) | (user_id & 0xFFFF_FFFF)
}

// =============================================================================
// Traits
// =============================================================================

/// A held per-user lock. Released explicitly; the scheduler guarantees
/// release on every exit path of a run.
#[async_trait]
pub trait LockGuard: Send {
    async fn release(self: Box<Self>) -> SyncResult<()>;
}

/// Non-blocking per-user lock acquisition.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Attempts the lock for a user. `Ok(None)` means it is held
    /// elsewhere (contention, not an error).
    async fn try_acquire(&self, user_id: UserId) -> SyncResult<Option<Box<dyn LockGuard>>>;
}

// =============================================================================
// Postgres Advisory Lock
// =============================================================================

/// Advisory-lock provider. Each held lock pins one pool connection:
/// session-scoped advisory locks belong to the connection that took
/// them, so the guard keeps it until release.
pub struct PgAdvisoryLockProvider {
    pool: PgPool,
}

impl PgAdvisoryLockProvider {
    /// Probes the database for advisory-lock support by taking and
    /// releasing a throwaway key.
    pub async fn probe(pool: PgPool) -> SyncResult<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(lock_key(0))
            .fetch_one(&mut *conn)
            .await?;
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(lock_key(0))
            .execute(&mut *conn)
            .await?;
        Ok(PgAdvisoryLockProvider { pool })
    }
}

#[async_trait]
impl LockProvider for PgAdvisoryLockProvider {
    async fn try_acquire(&self, user_id: UserId) -> SyncResult<Option<Box<dyn LockGuard>>> {
        let key = lock_key(user_id);
        let mut conn = self.pool.acquire().await?;
        let locked = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;

        if locked {
            debug!(user_id, "Advisory lock acquired");
            Ok(Some(Box::new(PgLockGuard { conn, key, user_id })))
        } else {
            debug!(user_id, "Advisory lock held elsewhere");
            Ok(None)
        }
    }
}

struct PgLockGuard {
    conn: PoolConnection<Postgres>,
    key: i64,
    user_id: UserId,
}

#[async_trait]
impl LockGuard for PgLockGuard {
    async fn release(mut self: Box<Self>) -> SyncResult<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut *self.conn)
            .await?;
        debug!(user_id = self.user_id, "Advisory lock released");
        Ok(())
    }
}

// =============================================================================
// No-op Lock
// =============================================================================

/// Lock provider used when advisory locks are unavailable. Always
/// acquires; cross-process exclusion is not enforced.
pub struct NoopLockProvider;

struct NoopLockGuard;

#[async_trait]
impl LockGuard for NoopLockGuard {
    async fn release(self: Box<Self>) -> SyncResult<()> {
        Ok(())
    }
}

#[async_trait]
impl LockProvider for NoopLockProvider {
    async fn try_acquire(&self, _user_id: UserId) -> SyncResult<Option<Box<dyn LockGuard>>> {
        Ok(Some(Box::new(NoopLockGuard)))
    }
}

// =============================================================================
// Startup Selection
// =============================================================================

/// Selects the lock provider once at startup. A failed probe (or no
/// database at all) permanently downgrades to the no-op provider with
/// a single warning.
pub async fn select_lock_provider(pool: Option<PgPool>) -> std::sync::Arc<dyn LockProvider> {
    match pool {
        Some(pool) => match PgAdvisoryLockProvider::probe(pool).await {
            Ok(provider) => std::sync::Arc::new(provider),
            Err(err) => {
                warn!(
                    error = %err,
                    "Advisory locks unsupported; downgrading to in-process locking only"
                );
                std::sync::Arc::new(NoopLockProvider)
            }
        },
        None => std::sync::Arc::new(NoopLockProvider),
    }
}

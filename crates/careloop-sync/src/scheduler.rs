//! # Sync Scheduler
//!
//! Owns every decision about WHEN a sync runs. The runner owns what a
//! run does; this module owns debouncing, single-flight, cross-process
//! locking, retry backoff, and the polling fallback.
//!
//! ## Per-User State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Per-User Sync Lifecycle                             │
//! │                                                                         │
//! │   trigger ──► debouncing ──► lock try ──► running ──► idle              │
//! │      ▲            │              │           │                          │
//! │      │       new trigger      held by     failure                       │
//! │      │       restarts the     another     ▼                             │
//! │      │       quiet period     process   retrying (min(base·2^(n-1),     │
//! │      │                           │               max) one-shot timer)   │
//! │      │                           ▼                                      │
//! │      └──────────────── rescheduled after debounce                       │
//! │                                                                         │
//! │   trigger while running ──► follow-up flag ──► one more run after       │
//! │                             the in-flight run completes                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All per-user state lives in one map inside the scheduler instance;
//! tests construct a scheduler per run and nothing leaks across them.
//! Timer tasks are plain tokio tasks carrying a generation number:
//! re-arming bumps the generation, and a timer that wakes with a stale
//! generation stands down. No task is ever aborted, so a run that has
//! set the running flag always reaches its completion bookkeeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use careloop_core::UserId;

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::lock::LockProvider;
use crate::provider::WatchNotificationHeaders;
use crate::runner::{SyncOptions, SyncRunner};
use crate::store::CareStore;
use crate::watch::{NotificationOutcome, WatchChannelManager};

// =============================================================================
// Per-User State
// =============================================================================

#[derive(Default)]
struct UserState {
    /// Generation of the most recently armed debounce or retry timer.
    /// A timer task re-checks this after sleeping; on mismatch it was
    /// superseded and stands down.
    timer_gen: u64,
    /// A sync run is currently in flight for this user.
    running: bool,
    /// A trigger arrived while running; run once more on completion.
    follow_up: bool,
    /// Consecutive failed runs; resets to zero on success.
    attempts: u32,
}

/// How a run (or run attempt) ended, for state bookkeeping.
enum RunEnd {
    Success,
    Failed,
    /// The per-user lock was unavailable; not a failure.
    LockUnavailable,
}

// =============================================================================
// Sync Scheduler
// =============================================================================

/// Cheaply cloneable handle; all clones share one state map.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Arc<dyn CareStore>,
    runner: Arc<SyncRunner>,
    watches: Arc<WatchChannelManager>,
    locks: Arc<dyn LockProvider>,
    config: SyncConfig,
    users: Mutex<HashMap<UserId, UserState>>,
}

impl SyncScheduler {
    pub fn new(
        store: Arc<dyn CareStore>,
        runner: Arc<SyncRunner>,
        watches: Arc<WatchChannelManager>,
        locks: Arc<dyn LockProvider>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(SyncScheduler {
            inner: Arc::new(SchedulerInner {
                store,
                runner,
                watches,
                locks,
                config,
                users: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Schedules a sync for a user after a quiet period. A new trigger
    /// restarts the quiet period and supersedes any pending retry
    /// timer, so bursts of triggers coalesce into one run. A zero
    /// debounce runs as soon as the scheduler gets the chance.
    pub fn schedule_sync(&self, user_id: UserId, debounce: Duration) {
        if !self.inner.config.sync_enabled {
            debug!(user_id, "Sync disabled; trigger dropped");
            return;
        }
        SchedulerInner::arm_timer(&self.inner, user_id, debounce);
    }

    /// Schedules with the configured debounce window. The entry point
    /// for CRUD-originated triggers.
    pub fn schedule_sync_debounced(&self, user_id: UserId) {
        self.schedule_sync(user_id, self.inner.config.debounce());
    }

    /// Resolves an inbound webhook notification and, for change
    /// notifications, schedules an immediate sync (zero debounce):
    /// provider-initiated changes should land as fast as possible.
    pub async fn handle_watch_notification(
        &self,
        headers: &WatchNotificationHeaders,
    ) -> SyncResult<NotificationOutcome> {
        let outcome = self.inner.watches.resolve_notification(headers).await?;
        if let NotificationOutcome::TriggerSync(user_id) = outcome {
            self.schedule_sync(user_id, Duration::ZERO);
        }
        Ok(outcome)
    }

    /// Spawns the fixed-interval poll loop: renews expiring watch
    /// channels and, when the polling fallback is enabled, schedules a
    /// sweep sync for every connected user. Returns the task handle so
    /// the embedder can abort it on shutdown.
    pub fn start_poll_loop(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.inner.config.poll_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                scheduler.poll_once().await;
            }
        })
    }

    /// One iteration of the poll loop.
    async fn poll_once(&self) {
        if let Err(err) = self.inner.watches.refresh_expiring().await {
            warn!(error = %err, "Watch renewal sweep failed");
        }

        if self.inner.config.polling_fallback {
            match self.inner.store.connected_user_ids().await {
                Ok(user_ids) => {
                    debug!(users = user_ids.len(), "Polling fallback sweep");
                    for user_id in user_ids {
                        self.schedule_sync(user_id, self.inner.config.debounce());
                    }
                }
                Err(err) => warn!(error = %err, "Could not enumerate connected users"),
            }
        }
    }

    /// Consecutive failed runs for a user (observability / tests).
    pub fn retry_attempts(&self, user_id: UserId) -> u32 {
        self.inner
            .users
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|s| s.attempts)
            .unwrap_or(0)
    }
}

impl SchedulerInner {
    /// Arms (or re-arms) the timer for a user. Bumping the generation
    /// supersedes any pending debounce or retry timer; the superseded
    /// task notices after waking and stands down. Superseding never
    /// aborts a task, so a timer that already started a run cannot be
    /// killed between setting the running flag and clearing it.
    fn arm_timer(inner: &Arc<Self>, user_id: UserId, delay: Duration) {
        let generation = {
            let mut users = inner.users.lock().unwrap();
            let state = users.entry(user_id).or_default();
            state.timer_gen += 1;
            state.timer_gen
        };

        let task_inner = inner.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            SchedulerInner::timer_fired(task_inner, user_id, generation).await;
        });
    }

    /// A debounce or retry timer elapsed: either start a run or, when
    /// one is already in flight, record a follow-up. A timer superseded
    /// while it slept does nothing.
    async fn timer_fired(inner: Arc<Self>, user_id: UserId, generation: u64) {
        {
            let mut users = inner.users.lock().unwrap();
            let state = users.entry(user_id).or_default();
            if state.timer_gen != generation {
                debug!(user_id, "Timer superseded by a newer trigger");
                return;
            }
            if state.running {
                debug!(user_id, "Sync already in flight; follow-up recorded");
                state.follow_up = true;
                return;
            }
            state.running = true;
        }
        inner.run_locked(user_id).await;
    }

    /// Takes the per-user lock and runs one sync. The lock is released
    /// on every exit path before the outcome is processed.
    async fn run_locked(self: Arc<Self>, user_id: UserId) {
        let guard = match self.locks.try_acquire(user_id).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                debug!(user_id, "Per-user lock held elsewhere; rescheduling");
                self.finish(user_id, RunEnd::LockUnavailable);
                return;
            }
            Err(err) => {
                warn!(user_id, error = %err, "Lock acquisition failed; rescheduling");
                self.finish(user_id, RunEnd::LockUnavailable);
                return;
            }
        };

        let result = self
            .runner
            .run_sync(user_id, SyncOptions::default())
            .await;
        if let Err(err) = guard.release().await {
            warn!(user_id, error = %err, "Per-user lock release failed");
        }

        match result {
            Ok(summary) => {
                if !summary.errors.is_empty() {
                    warn!(
                        user_id,
                        errors = summary.errors.len(),
                        "Sync run completed with item errors"
                    );
                }
                self.finish(user_id, RunEnd::Success);
            }
            Err(err) => {
                warn!(user_id, error = %err, "Sync run failed");
                self.finish(user_id, RunEnd::Failed);
            }
        }
    }

    /// Post-run bookkeeping: clears the running flag and decides what,
    /// if anything, to schedule next.
    fn finish(self: &Arc<Self>, user_id: UserId, end: RunEnd) {
        let mut users = self.inner_lock();
        let state = users.entry(user_id).or_default();
        state.running = false;

        match end {
            RunEnd::Success => {
                state.attempts = 0;
                let follow_up = std::mem::take(&mut state.follow_up);
                drop(users);
                if follow_up {
                    debug!(user_id, "Serving follow-up sync request");
                    SchedulerInner::arm_timer(self, user_id, Duration::ZERO);
                }
            }
            RunEnd::Failed => {
                state.attempts += 1;
                let attempt = state.attempts;
                if std::mem::take(&mut state.follow_up) {
                    // A fresh trigger arrived mid-run; it should not
                    // inherit this run's backoff delay. The attempt
                    // count stays, so another failure still backs off
                    // further.
                    let delay = self.config.debounce();
                    drop(users);
                    debug!(user_id, attempt, "Follow-up after failed run; using debounce");
                    SchedulerInner::arm_timer(self, user_id, delay);
                    return;
                }
                state.timer_gen += 1;
                let generation = state.timer_gen;
                let delay = backoff_delay(&self.config, attempt);
                info!(
                    user_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling sync retry"
                );
                let task_inner = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    SchedulerInner::timer_fired(task_inner, user_id, generation).await;
                });
            }
            RunEnd::LockUnavailable => {
                // Contention is not a failure: try again after one
                // debounce interval without touching the attempt count.
                let delay = self.config.debounce();
                drop(users);
                SchedulerInner::arm_timer(self, user_id, delay);
            }
        }
    }

    fn inner_lock(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, UserState>> {
        self.users.lock().unwrap()
    }
}

/// Exponential retry delay: `min(base * 2^(attempt-1), max)`.
fn backoff_delay(config: &SyncConfig, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(20);
    let ms = config
        .retry_base_ms
        .saturating_mul(1u64 << shift)
        .min(config.retry_max_ms);
    Duration::from_millis(ms)
}

//! Background routine watcher.
//!
//! Every poll interval the watcher lists all stored routines, runs each one
//! through [`evaluate`], writes back any transition and hands the intent to
//! the notifier on a detached task.
//!
//! Guarantees:
//! - Single flight: a sweep finishes before the next one starts.
//! - Each transition is committed with [`RoutineStore::compare_and_update`],
//!   so a row that changed since it was listed (say, completed by the user)
//!   is left alone and its intent is dropped.
//! - A bad row, a failing store call or a slow notifier never stops the
//!   loop; the next interval is the retry.
//! - A write that outlives `store_timeout` is not forgotten: when it lands
//!   its intent is still delivered.
//! - At most `notify_concurrency` notifications run at once, so a hung
//!   notifier cannot starve store calls of blocking threads.
//!
//! ## Usage
//!
//! ```ignore
//! let cancel = CancellationToken::new();
//! let handle = Watcher::new(store, notifier, WatcherConfig::default()).spawn(cancel.clone());
//! // ...
//! cancel.cancel();
//! handle.await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{DatabaseError, NotifyError};
use crate::intent::Intent;
use crate::notifier::Notifier;
use crate::routine::{evaluate, Routine, RoutineId};
use crate::storage::{RoutineStore, WatcherSettings};

/// Immutable watcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    pub store_timeout: Duration,
    pub notify_timeout: Duration,
    pub notify_concurrency: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::from(&WatcherSettings::default())
    }
}

impl From<&WatcherSettings> for WatcherConfig {
    fn from(settings: &WatcherSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            store_timeout: settings.store_timeout(),
            notify_timeout: settings.notify_timeout(),
            notify_concurrency: settings.notify_concurrency(),
        }
    }
}

/// What happened to one routine when a transition was committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    /// Evaluation produced no transition.
    Unchanged,
    /// Transition written; the intent should be delivered.
    Applied { routine: Routine, intent: Intent },
    /// The row changed since it was read; nothing written.
    Conflict,
}

/// Evaluate `routine` at `now` and persist the transition, if any.
///
/// The write only lands if the stored progress fields still match `routine`.
pub fn commit(
    store: &dyn RoutineStore,
    routine: &Routine,
    now: NaiveDateTime,
) -> Result<Commit, DatabaseError> {
    let evaluation = evaluate(routine, now);
    let Some(intent) = evaluation.intent else {
        return Ok(Commit::Unchanged);
    };
    if store.compare_and_update(routine, &evaluation.routine)? {
        Ok(Commit::Applied {
            routine: evaluation.routine,
            intent,
        })
    } else {
        Ok(Commit::Conflict)
    }
}

async fn deliver(
    notifier: Arc<dyn Notifier>,
    permits: Arc<Semaphore>,
    intent: Intent,
) -> Result<(), NotifyError> {
    let permit = permits
        .acquire_owned()
        .await
        .map_err(|e| NotifyError::Delivery(e.to_string()))?;
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        notifier.notify(&intent)
    })
    .await
    .map_err(|e| NotifyError::Delivery(format!("notifier task failed: {e}")))?
}

/// Per-cycle counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Routines that were read and evaluated.
    pub evaluated: usize,
    pub reminders: usize,
    pub missed: usize,
    /// Records that could not be read.
    pub skipped: usize,
    /// Transitions abandoned because the row changed concurrently.
    pub conflicts: usize,
    /// Transitions whose write failed.
    pub failed: usize,
    /// Writes still running when the store timeout hit; their intents are
    /// delivered once they land.
    pub late: usize,
}

impl CycleReport {
    pub fn transitions(&self) -> usize {
        self.reminders + self.missed
    }

    pub fn has_activity(&self) -> bool {
        self.transitions() + self.skipped + self.conflicts + self.failed + self.late > 0
    }
}

/// Drives the evaluator over the store on a fixed cadence.
pub struct Watcher {
    store: Arc<dyn RoutineStore>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    config: WatcherConfig,
}

/// Delivers intents on detached tasks, a bounded number at a time.
#[derive(Clone)]
struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl Dispatcher {
    fn new(notifier: Arc<dyn Notifier>, config: &WatcherConfig) -> Self {
        Self {
            notifier,
            permits: Arc::new(Semaphore::new(config.notify_concurrency.max(1))),
            timeout: config.notify_timeout,
        }
    }

    /// Deliver an intent without waiting for it.
    ///
    /// The timeout covers waiting for a permit as well as the call itself.
    /// The permit travels into the blocking call and is only released when
    /// the notifier actually returns.
    fn dispatch(&self, intent: Intent) {
        let notifier = Arc::clone(&self.notifier);
        let permits = Arc::clone(&self.permits);
        let timeout = self.timeout;
        tokio::spawn(async move {
            let routine_id = intent.routine_id();
            let delivery = deliver(notifier, permits, intent);
            match tokio::time::timeout(timeout, delivery).await {
                Ok(Ok(())) => debug!(routine_id, "notification delivered"),
                Ok(Err(e)) => warn!(routine_id, error = %e, "notification failed"),
                Err(_) => {
                    let e = NotifyError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    };
                    warn!(routine_id, error = %e, "notification abandoned");
                }
            }
        });
    }
}

impl Watcher {
    pub fn new(
        store: Arc<dyn RoutineStore>,
        notifier: Arc<dyn Notifier>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            store,
            dispatcher: Dispatcher::new(notifier, &config),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the wall clock (tests, replays).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Run one sweep at the clock's current time.
    pub async fn run_cycle(&self) -> Result<CycleReport, DatabaseError> {
        self.run_cycle_at(self.clock.now()).await
    }

    /// Run one sweep as if the time were `now`.
    ///
    /// # Errors
    /// Only when the routine list itself cannot be read; per-routine
    /// failures are counted in the report.
    pub async fn run_cycle_at(&self, now: NaiveDateTime) -> Result<CycleReport, DatabaseError> {
        let records = self.blocking(|store| store.list_all()).await?;
        let mut report = CycleReport::default();

        for record in records {
            let routine = match record {
                Ok(routine) => routine,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable routine record");
                    report.skipped += 1;
                    continue;
                }
            };
            report.evaluated += 1;

            // Cheap pure check first so idle routines never hit the store.
            if !evaluate(&routine, now).changed() {
                continue;
            }

            let routine_id = routine.id;
            let store = Arc::clone(&self.store);
            let mut write =
                tokio::task::spawn_blocking(move || commit(store.as_ref(), &routine, now));
            let outcome = match tokio::time::timeout(self.config.store_timeout, &mut write).await {
                Ok(joined) => joined
                    .map_err(|e| DatabaseError::TaskFailed(e.to_string()))
                    .and_then(|result| result),
                Err(_) => {
                    report.late += 1;
                    warn!(
                        routine_id,
                        timeout_ms = self.config.store_timeout.as_millis() as u64,
                        "routine write still running; delivering when it lands"
                    );
                    self.finish_late_write(routine_id, write);
                    continue;
                }
            };

            match outcome {
                Ok(Commit::Applied { routine, intent }) => {
                    match intent {
                        Intent::ReminderFire { .. } => {
                            report.reminders += 1;
                            info!(routine_id, title = %routine.title, "reminder fired");
                        }
                        Intent::Missed { .. } => {
                            report.missed += 1;
                            info!(
                                routine_id,
                                title = %routine.title,
                                failures = routine.failures,
                                "routine missed"
                            );
                        }
                    }
                    self.dispatcher.dispatch(intent);
                }
                Ok(Commit::Conflict) => {
                    report.conflicts += 1;
                    debug!(routine_id, "routine changed concurrently; transition dropped");
                }
                Ok(Commit::Unchanged) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(routine_id, error = %e, "failed to persist routine transition");
                }
            }
        }

        Ok(report)
    }

    /// Loop until `cancel` fires. Never returns early on errors.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "routine watcher started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("routine watcher stopped");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_cycle().await {
                        Ok(report) if report.has_activity() => {
                            info!(
                                evaluated = report.evaluated,
                                reminders = report.reminders,
                                missed = report.missed,
                                skipped = report.skipped,
                                conflicts = report.conflicts,
                                failed = report.failed,
                                late = report.late,
                                "watcher cycle complete"
                            );
                        }
                        Ok(report) => debug!(evaluated = report.evaluated, "watcher cycle idle"),
                        Err(e) => warn!(
                            error = %e,
                            transient = e.is_transient(),
                            "watcher cycle failed; retrying next interval"
                        ),
                    }
                }
            }
        }
    }

    /// Start [`Watcher::run`] on the current tokio runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Wait for a write that outlived the store timeout and deliver its
    /// intent if it committed.
    fn finish_late_write(
        &self,
        routine_id: RoutineId,
        write: JoinHandle<Result<Commit, DatabaseError>>,
    ) {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            match write.await {
                Ok(Ok(Commit::Applied { intent, .. })) => {
                    info!(routine_id, kind = intent.kind(), "late routine write committed");
                    dispatcher.dispatch(intent);
                }
                Ok(Ok(_)) => debug!(routine_id, "late routine write made no change"),
                Ok(Err(e)) => warn!(routine_id, error = %e, "late routine write failed"),
                Err(e) => warn!(routine_id, error = %e, "late routine write task failed"),
            }
        });
    }

    /// Run a store call on the blocking pool with the configured timeout.
    async fn blocking<T, F>(&self, op: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RoutineStore) -> Result<T, DatabaseError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || op(store.as_ref()));
        match tokio::time::timeout(self.config.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(DatabaseError::TaskFailed(e.to_string())),
            Err(_) => Err(DatabaseError::Timeout {
                timeout_ms: self.config.store_timeout.as_millis() as u64,
            }),
        }
    }
}

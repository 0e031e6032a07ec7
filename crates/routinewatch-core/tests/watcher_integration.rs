//! Integration tests for the routine watcher.
//!
//! Drives full sweeps against a real SQLite store with a manual clock and a
//! channel notifier, plus store and notifier doubles that misbehave.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use routinewatch_core::error::NotifyError;
use routinewatch_core::storage::RecordResult;
use routinewatch_core::{
    ChannelNotifier, Database, DatabaseError, Intent, ManualClock, NewRoutine, Notifier, Routine,
    RoutineId, RoutineService, RoutineStatus, RoutineStore, Watcher, WatcherConfig,
};
use tokio_util::sync::CancellationToken;

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn workout() -> NewRoutine {
    NewRoutine::new(
        "Workout",
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
    )
}

fn fast_config() -> WatcherConfig {
    WatcherConfig {
        poll_interval: Duration::from_millis(10),
        store_timeout: Duration::from_millis(200),
        notify_timeout: Duration::from_millis(50),
        notify_concurrency: 4,
    }
}

#[tokio::test]
async fn test_workout_day() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let (notifier, mut rx) = ChannelNotifier::new();
    let watcher = Watcher::new(db.clone(), Arc::new(notifier), fast_config());
    let id = db.insert(&workout()).unwrap();

    // Nothing before the reminder window opens.
    let report = watcher.run_cycle_at(at(14, 19)).await.unwrap();
    assert_eq!(report.evaluated, 1);
    assert!(!report.has_activity());

    let report = watcher.run_cycle_at(at(14, 21)).await.unwrap();
    assert_eq!(report.reminders, 1);
    let intent = rx.recv().await.unwrap();
    assert_eq!(
        intent,
        Intent::ReminderFire {
            routine_id: id,
            title: "Workout".into(),
            personality: "hood".into(),
        }
    );

    // Still in the window, already reminded.
    watcher.run_cycle_at(at(14, 25)).await.unwrap();
    // Past the time but within grace.
    watcher.run_cycle_at(at(14, 34)).await.unwrap();
    assert!(rx.try_recv().is_err());

    let report = watcher.run_cycle_at(at(14, 36)).await.unwrap();
    assert_eq!(report.missed, 1);
    assert_eq!(
        rx.recv().await.unwrap(),
        Intent::Missed {
            routine_id: id,
            title: "Workout".into(),
        }
    );

    let stored = db.get(id).unwrap();
    assert_eq!(stored.status, RoutineStatus::Missed);
    assert_eq!(stored.failures, 1);
    assert_eq!(stored.streak, 0);
    assert!(stored.reminder_sent);

    let report = watcher.run_cycle_at(at(15, 0)).await.unwrap();
    assert_eq!(report.transitions(), 0);
}

#[tokio::test]
async fn test_completion_before_deadline_is_final() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let (notifier, mut rx) = ChannelNotifier::new();
    let watcher = Watcher::new(db.clone(), Arc::new(notifier), fast_config());
    let service = RoutineService::new(db.clone());
    let id = service.create(&[workout()]).unwrap()[0];

    watcher.run_cycle_at(at(14, 22)).await.unwrap();
    assert!(matches!(rx.recv().await, Some(Intent::ReminderFire { .. })));

    let done = service.complete(id).unwrap();
    assert_eq!(done.streak, 1);

    let report = watcher.run_cycle_at(at(14, 36)).await.unwrap();
    assert_eq!(report.transitions(), 0);
    let stored = db.get(id).unwrap();
    assert_eq!(stored.status, RoutineStatus::Done);
    assert_eq!(stored.failures, 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_downtime_goes_straight_to_missed() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let (notifier, mut rx) = ChannelNotifier::new();
    let watcher = Watcher::new(db.clone(), Arc::new(notifier), fast_config());
    let id = db.insert(&workout()).unwrap();

    let report = watcher.run_cycle_at(at(16, 0)).await.unwrap();
    assert_eq!(report.reminders, 0);
    assert_eq!(report.missed, 1);
    assert!(matches!(rx.recv().await, Some(Intent::Missed { routine_id, .. }) if routine_id == id));
    assert!(!db.get(id).unwrap().reminder_sent);
}

#[tokio::test]
async fn test_loop_follows_manual_clock() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let (notifier, mut rx) = ChannelNotifier::new();
    let clock = Arc::new(ManualClock::new(at(14, 0)));
    let id = db.insert(&workout()).unwrap();

    let cancel = CancellationToken::new();
    let handle = Watcher::new(db.clone(), Arc::new(notifier), fast_config())
        .with_clock(clock.clone())
        .spawn(cancel.clone());

    clock.set(at(14, 21));
    assert!(matches!(rx.recv().await, Some(Intent::ReminderFire { .. })));
    clock.set(at(14, 36));
    assert!(matches!(rx.recv().await, Some(Intent::Missed { .. })));

    cancel.cancel();
    handle.await.unwrap();
    assert!(rx.try_recv().is_err());
    assert_eq!(db.get(id).unwrap().status, RoutineStatus::Missed);
}

/// Wraps a real store and fails selected calls on demand.
struct FlakyStore {
    inner: Database,
    fail_list: AtomicBool,
    fail_writes: AtomicBool,
    slow_list: AtomicBool,
    slow_writes: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: Database::open_in_memory().unwrap(),
            fail_list: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            slow_list: AtomicBool::new(false),
            slow_writes: AtomicBool::new(false),
        }
    }
}

impl RoutineStore for FlakyStore {
    fn list_all(&self) -> Result<Vec<RecordResult>, DatabaseError> {
        if self.slow_list.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(500));
        }
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(DatabaseError::Locked);
        }
        self.inner.list_all()
    }

    fn list_by_owner(&self, owner: &str) -> Result<Vec<RecordResult>, DatabaseError> {
        self.inner.list_by_owner(owner)
    }

    fn get(&self, id: RoutineId) -> Result<Routine, DatabaseError> {
        self.inner.get(id)
    }

    fn insert(&self, routine: &NewRoutine) -> Result<RoutineId, DatabaseError> {
        self.inner.insert(routine)
    }

    fn update(&self, routine: &Routine) -> Result<(), DatabaseError> {
        self.inner.update(routine)
    }

    fn compare_and_update(&self, current: &Routine, next: &Routine) -> Result<bool, DatabaseError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::QueryFailed("disk I/O error".into()));
        }
        if self.slow_writes.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(400));
        }
        self.inner.compare_and_update(current, next)
    }

    fn delete(&self, id: RoutineId) -> Result<(), DatabaseError> {
        self.inner.delete(id)
    }
}

#[tokio::test]
async fn test_failed_list_is_reported_and_retried() {
    let store = Arc::new(FlakyStore::new());
    let (notifier, mut rx) = ChannelNotifier::new();
    let watcher = Watcher::new(store.clone(), Arc::new(notifier), fast_config());
    store.insert(&workout()).unwrap();

    store.fail_list.store(true, Ordering::SeqCst);
    let err = watcher.run_cycle_at(at(14, 21)).await.unwrap_err();
    assert!(err.is_transient());

    store.fail_list.store(false, Ordering::SeqCst);
    let report = watcher.run_cycle_at(at(14, 22)).await.unwrap();
    assert_eq!(report.reminders, 1);
    assert!(matches!(rx.recv().await, Some(Intent::ReminderFire { .. })));
}

#[tokio::test]
async fn test_failed_write_emits_nothing() {
    let store = Arc::new(FlakyStore::new());
    let (notifier, mut rx) = ChannelNotifier::new();
    let watcher = Watcher::new(store.clone(), Arc::new(notifier), fast_config());
    let id = store.insert(&workout()).unwrap();

    store.fail_writes.store(true, Ordering::SeqCst);
    let report = watcher.run_cycle_at(at(14, 40)).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.missed, 0);
    assert!(rx.try_recv().is_err());
    assert_eq!(store.get(id).unwrap().status, RoutineStatus::Pending);

    // The next sweep is the retry.
    store.fail_writes.store(false, Ordering::SeqCst);
    let report = watcher.run_cycle_at(at(14, 41)).await.unwrap();
    assert_eq!(report.missed, 1);
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let store = Arc::new(FlakyStore::new());
    let (notifier, _rx) = ChannelNotifier::new();
    let watcher = Watcher::new(store.clone(), Arc::new(notifier), fast_config());

    store.slow_list.store(true, Ordering::SeqCst);
    let err = watcher.run_cycle_at(at(14, 0)).await.unwrap_err();
    assert!(matches!(err, DatabaseError::Timeout { timeout_ms: 200 }));
}

#[tokio::test]
async fn test_late_write_still_delivers_intent() {
    let store = Arc::new(FlakyStore::new());
    let (notifier, mut rx) = ChannelNotifier::new();
    let watcher = Watcher::new(store.clone(), Arc::new(notifier), fast_config());
    let id = store.insert(&workout()).unwrap();

    store.slow_writes.store(true, Ordering::SeqCst);
    let report = watcher.run_cycle_at(at(14, 21)).await.unwrap();
    assert_eq!(report.late, 1);
    assert_eq!(report.reminders, 0);
    assert_eq!(report.failed, 0);

    let intent = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(intent, Intent::ReminderFire { routine_id, .. } if routine_id == id));
    assert!(store.get(id).unwrap().reminder_sent);

    store.slow_writes.store(false, Ordering::SeqCst);
    let report = watcher.run_cycle_at(at(14, 22)).await.unwrap();
    assert_eq!(report.transitions(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_loop_survives_store_outage() {
    let store = Arc::new(FlakyStore::new());
    let (notifier, mut rx) = ChannelNotifier::new();
    let clock = Arc::new(ManualClock::new(at(14, 40)));
    store.insert(&workout()).unwrap();
    store.fail_list.store(true, Ordering::SeqCst);

    let cancel = CancellationToken::new();
    let handle = Watcher::new(store.clone(), Arc::new(notifier), fast_config())
        .with_clock(clock)
        .spawn(cancel.clone());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    store.fail_list.store(false, Ordering::SeqCst);
    assert!(matches!(rx.recv().await, Some(Intent::Missed { .. })));

    cancel.cancel();
    handle.await.unwrap();
}

struct SlowNotifier;

impl Notifier for SlowNotifier {
    fn notify(&self, _intent: &Intent) -> Result<(), NotifyError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(())
    }
}

struct BrokenNotifier;

impl Notifier for BrokenNotifier {
    fn notify(&self, _intent: &Intent) -> Result<(), NotifyError> {
        Err(NotifyError::Delivery("speaker unplugged".into()))
    }
}

/// Blocks every call until the test lets go.
struct StuckNotifier {
    gate: Mutex<mpsc::Receiver<()>>,
    calls: AtomicUsize,
}

impl Notifier for StuckNotifier {
    fn notify(&self, _intent: &Intent) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.gate.lock().unwrap().recv();
        Ok(())
    }
}

#[test]
fn test_stuck_notifier_does_not_stall_miss_detection() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .max_blocking_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let (release, gate) = mpsc::channel::<()>();
    let notifier = Arc::new(StuckNotifier {
        gate: Mutex::new(gate),
        calls: AtomicUsize::new(0),
    });
    let db = Arc::new(Database::open_in_memory().unwrap());
    for _ in 0..3 {
        db.insert(&workout()).unwrap();
    }
    let config = WatcherConfig {
        notify_concurrency: 1,
        ..fast_config()
    };
    let watcher = Watcher::new(db.clone(), notifier.clone(), config);

    runtime.block_on(async {
        let report = watcher.run_cycle_at(at(14, 21)).await.unwrap();
        assert_eq!(report.reminders, 3);

        // Every queued notification times out behind the stuck one.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let report = watcher.run_cycle_at(at(14, 40)).await.unwrap();
        assert_eq!(report.missed, 3);
        tokio::time::sleep(Duration::from_millis(150)).await;
    });

    // Only the first notification ever reached the notifier; the other five
    // were abandoned while waiting for a slot.
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    drop(release);
}

#[tokio::test]
async fn test_slow_notifier_does_not_block_cycle() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let watcher = Watcher::new(db.clone(), Arc::new(SlowNotifier), fast_config());
    for _ in 0..3 {
        db.insert(&workout()).unwrap();
    }

    let started = Instant::now();
    let report = watcher.run_cycle_at(at(14, 21)).await.unwrap();
    assert_eq!(report.reminders, 3);
    assert!(started.elapsed() < Duration::from_millis(250));
}

#[tokio::test]
async fn test_notifier_failure_keeps_transition() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let watcher = Watcher::new(db.clone(), Arc::new(BrokenNotifier), fast_config());
    let id = db.insert(&workout()).unwrap();

    let report = watcher.run_cycle_at(at(14, 21)).await.unwrap();
    assert_eq!(report.reminders, 1);
    assert!(db.get(id).unwrap().reminder_sent);

    // Delivery is best effort; no second reminder.
    let report = watcher.run_cycle_at(at(14, 22)).await.unwrap();
    assert_eq!(report.reminders, 0);
}

#[tokio::test]
async fn test_corrupt_row_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("routines.db");
    let db = Arc::new(Database::open_at(&path).unwrap());
    let good = db.insert(&workout()).unwrap();
    let bad = db.insert(&workout()).unwrap();

    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute(
        "UPDATE routines SET routine_time = 'half past two' WHERE id = ?1",
        [bad],
    )
    .unwrap();
    drop(raw);

    let (notifier, mut rx) = ChannelNotifier::new();
    let watcher = Watcher::new(db.clone(), Arc::new(notifier), fast_config());
    let report = watcher.run_cycle_at(at(14, 21)).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.reminders, 1);
    assert!(matches!(rx.recv().await, Some(Intent::ReminderFire { routine_id, .. }) if routine_id == good));
}

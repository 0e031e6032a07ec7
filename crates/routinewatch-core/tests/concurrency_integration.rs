//! Completion racing the watcher's miss transition on the same row.
//!
//! Two connections to one database file; whichever write lands first wins
//! and the row never ends up with a blend of both transitions.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use routinewatch_core::error::{CoreError, RoutineError};
use routinewatch_core::watcher::commit;
use routinewatch_core::{Commit, Database, NewRoutine, RoutineService, RoutineStatus, RoutineStore};

fn deadline_passed() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(14, 40, 0)
        .unwrap()
}

#[test]
fn test_complete_and_miss_race_leaves_consistent_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let watcher_side = Arc::new(Database::open_at(&path).unwrap());
    let user_side = Arc::new(Database::open_at(&path).unwrap());
    let service = Arc::new(RoutineService::new(user_side.clone()));

    for round in 0..25u32 {
        let mut new = NewRoutine::new(
            format!("Workout {round}"),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
        );
        new.streak = 4;
        new.failures = 2;
        let id = service.create(&[new]).unwrap()[0];

        // The watcher listed the row before the user acted.
        let listed = watcher_side.get(id).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let sweep = {
            let store = watcher_side.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                commit(store.as_ref(), &listed, deadline_passed()).unwrap()
            })
        };
        let completion = {
            let service = service.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                service.complete(id)
            })
        };

        let swept = sweep.join().unwrap();
        let completed = completion.join().unwrap();
        let stored = user_side.get(id).unwrap();

        match stored.status {
            RoutineStatus::Done => {
                assert_eq!(stored.streak, 5);
                assert_eq!(stored.failures, 2);
                assert!(completed.is_ok());
                assert_eq!(swept, Commit::Conflict);
            }
            RoutineStatus::Missed => {
                assert_eq!(stored.streak, 0);
                assert_eq!(stored.failures, 3);
                assert!(matches!(
                    completed,
                    Err(CoreError::Routine(RoutineError::AlreadyMissed(i))) if i == id
                ));
                assert!(matches!(swept, Commit::Applied { .. }));
            }
            RoutineStatus::Pending => panic!("routine {id} left pending"),
        }
    }
}

#[test]
fn test_plain_update_does_not_touch_schedule_fields() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_at(dir.path().join("fields.db")).unwrap();
    let id = db
        .insert(
            &NewRoutine::new(
                "Stretch",
                NaiveDate::from_ymd_opt(2024, 2, 3).unwrap(),
                NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            )
            .with_offsets(15, 3),
        )
        .unwrap();

    let mut edited = db.get(id).unwrap();
    edited.title = "Renamed".into();
    edited.reminder_minutes_before = 0;
    edited.reminder_sent = true;
    db.update(&edited).unwrap();

    let stored = db.get(id).unwrap();
    assert_eq!(stored.title, "Stretch");
    assert_eq!(stored.reminder_minutes_before, 15);
    assert!(stored.reminder_sent);
}

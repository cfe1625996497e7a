//! Snapshot persistence tests

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use tlweave::translate::cache::{CACHE_DIR, CacheStore, ITEMS_FILE, PROJECT_FILE, SaveTicker};
use tlweave::translate::unit::{ProjectStatus, Session, TranslationUnit, UnitStatus};

fn sample_units() -> Vec<TranslationUnit> {
    let mut units: Vec<TranslationUnit> = (0..4)
        .map(|i| TranslationUnit::new("script.rpy", i, &format!("line {}", i)))
        .collect();
    units[0].status = UnitStatus::Translated;
    units[0].target = "第一行".to_string();
    units[1].status = UnitStatus::Translating;
    units[2].retry_count = 2;
    units[3].exclude();
    units
}

#[test]
fn test_snapshot_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let mut session = Session::new(sample_units());
    session.project.status = ProjectStatus::Translating;
    session.project.extras.tokens_used = 1234;

    store.save_snapshot(&session.project, &session.units).unwrap();
    assert!(dir.path().join(CACHE_DIR).join(ITEMS_FILE).exists());
    assert!(dir.path().join(CACHE_DIR).join(PROJECT_FILE).exists());

    let (project, units) = store.load_snapshot().unwrap();
    assert_eq!(project.id, session.project.id);
    assert_eq!(project.extras.tokens_used, 1234);
    assert_eq!(project.status, ProjectStatus::Untranslated);
    assert_eq!(units.len(), 4);
    assert_eq!(units[0].target, "第一行");
    assert_eq!(units[1].status, UnitStatus::Untranslated);
    assert_eq!(units[2].retry_count, 2);
    assert_eq!(units[3].status, UnitStatus::Excluded);
    assert_eq!(units[3].target, "line 3");
}

#[test]
fn test_items_file_is_a_json_array() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let session = Session::new(sample_units());
    store.save_snapshot(&session.project, &session.units).unwrap();

    let raw = fs::read_to_string(dir.path().join(CACHE_DIR).join(ITEMS_FILE)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let items = value.as_array().unwrap();
    assert_eq!(items.len(), 4);
    assert_eq!(items[0]["file_path"], "script.rpy");
    assert_eq!(items[0]["sequence_index"], 0);
}

#[test]
fn test_no_temp_files_left_behind() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let session = Session::new(sample_units());
    for _ in 0..3 {
        store.save_snapshot(&session.project, &session.units).unwrap();
    }

    let names: Vec<String> = fs::read_dir(dir.path().join(CACHE_DIR))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names.len(), 2, "unexpected files: {:?}", names);
}

#[test]
fn test_concurrent_saves_stay_readable() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(CacheStore::new(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let units: Vec<TranslationUnit> = (0..=n)
                    .map(|i| TranslationUnit::new("a.txt", i, "x"))
                    .collect();
                let session = Session::new(units);
                store.save_snapshot(&session.project, &session.units).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let (project, units) = store.load_snapshot().unwrap();
    assert!(!units.is_empty());
    assert!(project.extras.total_lines >= 1);
}

#[test]
fn test_ticker_flushes_only_requested_saves() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(CacheStore::new(dir.path()));
    let session = Arc::new(Mutex::new(Session::new(sample_units())));

    let ticker = SaveTicker::spawn(
        Arc::clone(&store),
        Arc::clone(&session),
        Duration::from_millis(30),
    );

    thread::sleep(Duration::from_millis(120));
    assert!(!store.exists());

    store.request_save();
    thread::sleep(Duration::from_millis(200));
    assert!(store.exists());

    session.lock().units[1].status = UnitStatus::Translated;
    ticker.shutdown();

    let (_, units) = store.load_snapshot().unwrap();
    assert_eq!(units[1].status, UnitStatus::Translated);
}

#[test]
fn test_unwritable_cache_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    // A regular file where the cache directory should be.
    fs::write(dir.path().join(CACHE_DIR), "not a directory").unwrap();
    let store = CacheStore::new(dir.path());
    let session = Session::new(sample_units());

    assert!(store.save_snapshot(&session.project, &session.units).is_err());
    store.save_logged(&session.project, &session.units);
    assert!(store.load_snapshot().is_err());
}

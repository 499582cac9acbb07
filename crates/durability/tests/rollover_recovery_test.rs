//! Rollover and restart tests against real segment files
//!
//! Covers carrying open transactions (with their blobs) into the next
//! segment, restart recovery of the active log, interrupted rollover
//! repair, and deferred records.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use zredo_durability::log::RolloverManager;
use zredo_durability::testing::{note_registry, NoteOp, RecordingStore};
use zredo_durability::{LogManager, LogReader, LogRecord, RedoConfig, RedoPlayer};

fn manager(config: &RedoConfig) -> Arc<LogManager> {
    Arc::new(LogManager::open(config.clone(), Arc::new(note_registry())).unwrap())
}

fn started(manager: &LogManager, op: NoteOp) -> Arc<LogRecord> {
    let mut rec = LogRecord::new(Box::new(op));
    rec.start(manager, zredo_core::now_millis());
    let rec = Arc::new(rec);
    rec.log(manager, false).unwrap();
    rec
}

fn names(store: &RecordingStore) -> Vec<String> {
    store.folders().values().cloned().collect()
}

fn blob_content() -> Vec<u8> {
    b"quarterly report attachment ".repeat(200)
}

// ============================================================================
// Carry-over
// ============================================================================

#[test]
fn test_open_transaction_carried_with_blob() {
    let dir = TempDir::new().unwrap();
    let config = RedoConfig::for_testing(dir.path());
    let registry = note_registry();
    {
        let manager = manager(&config);
        manager.start(Arc::new(RecordingStore::new())).unwrap();

        let open = started(
            &manager,
            NoteOp::new("carried").with_item(10).with_blob(&blob_content(), true),
        );
        let done = started(&manager, NoteOp::new("done").with_item(11));
        done.commit(&*manager).unwrap();

        let archived = manager.force_rollover().unwrap().unwrap();
        assert!(archived.exists());
        assert_eq!(manager.current_sequence(), 2);

        open.commit(&*manager).unwrap();
        manager.flush().unwrap();
    }

    // The carried copy in the new segment holds its own blob bytes.
    let (entries, _) = LogReader::open(&config.log_path(), &registry)
        .unwrap()
        .read_all()
        .unwrap();
    let carried = entries
        .iter()
        .find_map(|e| e.record.op_as::<NoteOp>())
        .unwrap();
    assert_eq!(carried.text, "carried");
    let blob = carried.blob.as_ref().unwrap();
    assert!(blob.is_compressed());
    assert_eq!(blob.load_raw().unwrap(), blob_content());

    // Archive then active replays both.
    let mgr = RolloverManager::new(config.log_path(), &config.archive_dir);
    let mut paths: Vec<_> = mgr
        .archived_logs(0)
        .unwrap()
        .into_iter()
        .map(|(_, p)| p)
        .collect();
    paths.push(config.log_path());
    let store = RecordingStore::new();
    let mut player = RedoPlayer::new(&registry);
    player.replay_files(&paths, &store).unwrap();
    let report = player.finish();
    assert_eq!(names(&store), vec!["carried", "done"]);
    assert!(report.incomplete.is_empty());
    assert_eq!(report.stats.segments_read, 2);
}

#[test]
fn test_size_triggered_rollover() {
    let dir = TempDir::new().unwrap();
    let config = RedoConfig::for_testing(dir.path()).with_rollover_limits(2048, 8192, 0);
    let manager = manager(&config);
    manager.start(Arc::new(RecordingStore::new())).unwrap();

    for i in 0..200 {
        let rec = started(&manager, NoteOp::new(format!("folder-{i:04}")).with_item(i));
        rec.commit(&*manager).unwrap();
    }

    assert!(manager.stats().rollovers > 0);
    assert!(!manager.archived_logs(0).unwrap().is_empty());
    manager.stop().unwrap();
}

// ============================================================================
// Restart
// ============================================================================

#[test]
fn test_restart_replays_active_log_only() {
    let dir = TempDir::new().unwrap();
    let config = RedoConfig::for_testing(dir.path());
    let first_txn;
    {
        let manager = manager(&config);
        manager.start(Arc::new(RecordingStore::new())).unwrap();
        let archived_only = started(&manager, NoteOp::new("before-rollover").with_item(1));
        archived_only.commit(&*manager).unwrap();
        manager.force_rollover().unwrap();

        let committed = started(&manager, NoteOp::new("after-rollover").with_item(2));
        committed.commit(&*manager).unwrap();
        let _uncommitted = started(&manager, NoteOp::new("never-committed").with_item(3));
        first_txn = committed.txn_id();
        manager.flush().unwrap();
        // crash: no stop
    }

    let store = Arc::new(RecordingStore::new());
    let manager = manager(&config);
    manager.start(Arc::clone(&store) as Arc<dyn zredo_core::MailboxStore>).unwrap();

    assert_eq!(names(&store), vec!["after-rollover"]);
    assert!(manager.stats().recovered_records > 0);

    // recovered log was rolled away; new ids never collide with recovered ones
    let rec = started(&manager, NoteOp::new("fresh").with_item(4));
    assert!(rec.txn_id() > first_txn);
    rec.commit(&*manager).unwrap();
    manager.stop().unwrap();
}

#[test]
fn test_clean_stop_leaves_nothing_to_replay() {
    let dir = TempDir::new().unwrap();
    let config = RedoConfig::for_testing(dir.path());
    {
        let manager = manager(&config);
        manager.start(Arc::new(RecordingStore::new())).unwrap();
        let rec = started(&manager, NoteOp::new("a").with_item(1));
        rec.commit(&*manager).unwrap();
        manager.stop().unwrap();
    }

    let store = Arc::new(RecordingStore::new());
    let manager = manager(&config);
    manager.start(Arc::clone(&store) as Arc<dyn zredo_core::MailboxStore>).unwrap();
    assert!(names(&store).is_empty());
    manager.stop().unwrap();
}

#[test]
fn test_interrupted_rollover_promotes_staged_segment() {
    let dir = TempDir::new().unwrap();
    let config = RedoConfig::for_testing(dir.path());
    {
        let manager = manager(&config);
        manager.start(Arc::new(RecordingStore::new())).unwrap();
        let rec = started(&manager, NoteOp::new("staged").with_item(5));
        rec.commit(&*manager).unwrap();
        manager.flush().unwrap();
    }
    let staged = dir.path().join("redo.log.tmp");
    std::fs::rename(config.log_path(), &staged).unwrap();

    let store = Arc::new(RecordingStore::new());
    let manager = manager(&config);
    manager.start(Arc::clone(&store) as Arc<dyn zredo_core::MailboxStore>).unwrap();

    assert!(!staged.exists());
    assert_eq!(names(&store), vec!["staged"]);
    manager.stop().unwrap();
}

// ============================================================================
// Deferred replay
// ============================================================================

#[test]
fn test_deferred_record_replayed_after_startup() {
    let dir = TempDir::new().unwrap();
    let config = RedoConfig::for_testing(dir.path());
    {
        let manager = manager(&config);
        manager.start(Arc::new(RecordingStore::new())).unwrap();
        let slow = started(
            &manager,
            NoteOp::new("deferred").with_item(1).deferred().with_blob(b"body", false),
        );
        slow.commit(&*manager).unwrap();
        let quick = started(&manager, NoteOp::new("inline").with_item(2));
        quick.commit(&*manager).unwrap();
        manager.flush().unwrap();
    }

    let store = Arc::new(RecordingStore::new());
    let manager = manager(&config);
    manager.start(Arc::clone(&store) as Arc<dyn zredo_core::MailboxStore>).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while manager.stats().deferred_replayed == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    manager.stop().unwrap();

    assert_eq!(manager.stats().deferred_replayed, 1);
    assert_eq!(names(&store), vec!["deferred", "inline"]);
}

#[test]
fn test_deferred_record_survives_second_crash() {
    let dir = TempDir::new().unwrap();
    let config = RedoConfig::for_testing(dir.path());
    {
        let manager = manager(&config);
        manager.start(Arc::new(RecordingStore::new())).unwrap();
        let slow = started(&manager, NoteOp::new("deferred").with_item(1).deferred());
        slow.commit(&*manager).unwrap();
        manager.flush().unwrap();
    }
    {
        // restart, then crash again before anything else happens
        let manager = manager(&config);
        manager.start(Arc::new(RecordingStore::new())).unwrap();
        manager.flush().unwrap();
    }

    let registry = note_registry();
    let (entries, _) = LogReader::open(&config.log_path(), &registry)
        .unwrap()
        .read_all()
        .unwrap();
    assert!(entries
        .iter()
        .any(|e| e.record.op_as::<NoteOp>().map(|n| n.text.as_str()) == Some("deferred")));
}

//! Backup-style replay across archived segments.

use std::sync::Arc;
use tempfile::TempDir;
use zredo::{
    default_registry, CreateFolder, CreateMailbox, CreateMessage, ItemType, LogManager,
    LogRecord, MailboxId, MailboxStore, MoveItem, RedoConfig, RedoOp, RedoPlayer, SetItemTags,
};
use zredo_ops::testing::ReferenceStore;

const BOXES: [MailboxId; 3] = [MailboxId(11), MailboxId(12), MailboxId(13)];

fn run(manager: &Arc<LogManager>, live: &ReferenceStore, op: impl RedoOp, mailbox: MailboxId) {
    let mut rec = LogRecord::new(Box::new(op));
    rec.set_mailbox_id(mailbox).unwrap();
    rec.start(&**manager, zredo::now_millis());
    let rec = Arc::new(rec);
    rec.log(&**manager, false).unwrap();
    rec.commit(&**manager).unwrap();
    rec.redo(live).unwrap();
}

fn body(n: i32) -> Vec<u8> {
    format!("Subject: message {}\r\n\r\n{}", n, "lorem ipsum ".repeat(120)).into_bytes()
}

/// Workload large enough to roll the 2K soft limit several times.
fn workload(manager: &Arc<LogManager>, live: &ReferenceStore) {
    for (i, mbox) in BOXES.iter().enumerate() {
        run(manager, live, CreateMailbox::new(format!("user{}", i)), *mbox);
        run(manager, live, CreateFolder::new(1, "Inbox", 2), *mbox);
        run(manager, live, CreateFolder::new(1, "Archive", 3), *mbox);
    }
    for n in 0..12 {
        let mbox = BOXES[n as usize % BOXES.len()];
        let id = 100 + n;
        let op = CreateMessage::new(2, id, format!("digest-{}", id), &body(n), n % 2 == 0).unwrap();
        run(manager, live, op, mbox);
        if n % 3 == 0 {
            run(manager, live, MoveItem::new(vec![id], ItemType::Message, 3), mbox);
        }
    }
    for mbox in BOXES {
        let ids: Vec<i32> = live
            .snapshot()
            .mailboxes[&mbox]
            .items
            .keys()
            .copied()
            .filter(|id| *id >= 100)
            .collect();
        run(manager, live, SetItemTags::new(ids, ItemType::Message, vec!["seen".into()]), mbox);
    }
}

#[test]
fn test_archives_rebuild_the_store_after_clean_shutdown() {
    let dir = TempDir::new().unwrap();
    let config = RedoConfig::for_testing(dir.path()).with_rollover_limits(2048, 8192, 0);
    let registry = Arc::new(default_registry().unwrap());

    let live = ReferenceStore::new();
    let manager = Arc::new(LogManager::open(config.clone(), Arc::clone(&registry)).unwrap());
    manager.start(Arc::new(ReferenceStore::new())).unwrap();
    workload(&manager, &live);
    manager.stop().unwrap();
    assert!(manager.stats().rollovers >= 3);

    // a clean restart has nothing to recover
    let restarted = Arc::new(ReferenceStore::new());
    let manager = Arc::new(LogManager::open(config.clone(), Arc::clone(&registry)).unwrap());
    manager
        .start(Arc::clone(&restarted) as Arc<dyn MailboxStore>)
        .unwrap();
    assert_eq!(manager.stats().recovered_records, 0);
    assert_eq!(restarted.snapshot().mailboxes.len(), 0);
    manager.stop().unwrap();

    // every committed change is in the archives, in order
    let archives = manager.archived_logs(0).unwrap();
    let sequences: Vec<u64> = archives.iter().map(|(seq, _)| *seq).collect();
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    assert_eq!(sequences, sorted);

    let rebuilt = ReferenceStore::new();
    let mut player = RedoPlayer::new(&registry);
    player
        .replay_files(archives.iter().map(|(_, path)| path), &rebuilt)
        .unwrap();
    let report = player.finish();
    assert_eq!(report.stats.failed, 0);
    assert!(report.incomplete.is_empty());
    assert_eq!(report.stats.segments_read, archives.len());
    assert_eq!(rebuilt.snapshot(), live.snapshot());
}

#[test]
fn test_archive_replay_from_a_later_sequence_skips_earlier_work() {
    let dir = TempDir::new().unwrap();
    let config = RedoConfig::for_testing(dir.path()).with_rollover_limits(2048, 8192, 0);
    let registry = Arc::new(default_registry().unwrap());

    let live = ReferenceStore::new();
    let manager = Arc::new(LogManager::open(config, Arc::clone(&registry)).unwrap());
    manager.start(Arc::new(ReferenceStore::new())).unwrap();
    workload(&manager, &live);
    manager.stop().unwrap();

    let all = manager.archived_logs(0).unwrap();
    let (second, _) = all[1];
    let later = manager.archived_logs(second).unwrap();
    assert_eq!(later.len(), all.len() - 1);

    // mailboxes created in the first segment are missing; a lenient store
    // accepts the later changes anyway
    let partial = ReferenceStore::lenient();
    let mut player = RedoPlayer::new(&registry);
    player
        .replay_files(later.iter().map(|(_, path)| path), &partial)
        .unwrap();
    let report = player.finish();
    assert_eq!(report.stats.failed, 0);
    assert!(partial.snapshot().item_count() < live.snapshot().item_count());
}

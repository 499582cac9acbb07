//! Replay with the calendar table attached and detached.

use std::sync::Arc;
use tempfile::TempDir;
use zredo::{
    calendar_ops, default_registry, CreateMailbox, LogManager, LogRecord, MailboxId, RecoveryError,
    RedoConfig, RedoOp, RedoPlayer, SetCalendarItem, CALENDAR_TABLE,
};
use zredo_ops::testing::ReferenceStore;

const MBOX: MailboxId = MailboxId(21);

fn commit(manager: &Arc<LogManager>, op: impl RedoOp) {
    let mut rec = LogRecord::new(Box::new(op));
    rec.set_mailbox_id(MBOX).unwrap();
    rec.start(&**manager, zredo::now_millis());
    let rec = Arc::new(rec);
    rec.log(&**manager, false).unwrap();
    rec.commit(&**manager).unwrap();
}

fn calendar_log() -> (TempDir, RedoConfig) {
    let dir = TempDir::new().unwrap();
    let config = RedoConfig::for_testing(dir.path());
    let manager =
        Arc::new(LogManager::open(config.clone(), Arc::new(default_registry().unwrap())).unwrap());
    manager.start(Arc::new(ReferenceStore::new())).unwrap();
    commit(&manager, CreateMailbox::new("dana"));
    commit(
        &manager,
        SetCalendarItem::new(40, 10, "review@example.com")
            .with_reply("erin@example.com", "TE", 1, 1_700_000_000_000)
            .with_reply("finn@example.com", "AC", 1, 1_700_000_060_000),
    );
    manager.flush().unwrap();
    (dir, config)
}

#[test]
fn test_replay_needs_the_calendar_table() {
    let (_dir, config) = calendar_log();
    let registry = default_registry().unwrap();
    registry.detach(CALENDAR_TABLE);

    let store = ReferenceStore::new();
    let mut player = RedoPlayer::new(&registry);
    let err = player.replay_file(&config.log_path(), &store).unwrap_err();
    assert!(
        matches!(err, RecoveryError::UnknownOpcode { opcode: 30, .. }),
        "{:?}",
        err
    );
    assert!(err.is_log_unreadable());
}

#[test]
fn test_reattached_calendar_table_replays() {
    let (_dir, config) = calendar_log();
    let registry = default_registry().unwrap();
    registry.detach(CALENDAR_TABLE);
    registry.attach(calendar_ops().unwrap()).unwrap();

    let store = ReferenceStore::new();
    let mut player = RedoPlayer::new(&registry);
    player.replay_file(&config.log_path(), &store).unwrap();
    assert_eq!(player.finish().stats.replayed, 2);
    assert_eq!(store.item(MBOX, 40).unwrap().replies, 2);
}

//! Redo log benchmarks
//!
//! - record encode / decode for a blob-carrying message
//! - append + commit through the manager into an in-memory writer
//! - append + commit into segment files (fsync per commit)

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use tempfile::TempDir;
use zredo_core::MailboxId;
use zredo_durability::{LogManager, LogRecord, LogWriter, MemoryLogWriter, RedoConfig};
use zredo_ops::{default_registry, CreateFolder, CreateMessage};

const BODY: &[u8] = &[b'x'; 16 * 1024];

fn message_record() -> LogRecord {
    let op = CreateMessage::new(2, 300, "digest", BODY, true).unwrap();
    let mut rec = LogRecord::new(Box::new(op));
    rec.set_mailbox_id(MailboxId(7)).unwrap();
    rec
}

fn bench_codec(c: &mut Criterion) {
    let registry = default_registry().unwrap();
    let rec = message_record();
    let bytes = rec.to_bytes().unwrap();

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("encode_message", |b| {
        b.iter(|| {
            rec.clear_serialized();
            rec.to_bytes().unwrap()
        })
    });
    group.bench_function("decode_message", |b| {
        b.iter(|| LogRecord::decode(&bytes, &registry).unwrap())
    });
    group.finish();
}

fn bench_memory_commit(c: &mut Criterion) {
    let registry = Arc::new(default_registry().unwrap());
    let writer = Arc::new(MemoryLogWriter::new());
    writer.open().unwrap();
    let manager = LogManager::with_writer(RedoConfig::default(), registry, writer.clone());

    let mut group = c.benchmark_group("manager");
    group.throughput(Throughput::Elements(1));
    group.bench_function("log_commit_memory", |b| {
        b.iter(|| {
            let mut rec = LogRecord::new(Box::new(CreateFolder::new(1, "bench", 9)));
            rec.start(&manager, 0);
            let rec = Arc::new(rec);
            rec.log(&manager, false).unwrap();
            rec.commit(&manager).unwrap();
        })
    });
    group.finish();
}

fn bench_file_commit(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let config = RedoConfig::for_testing(dir.path()).with_fsync_interval_ms(0);
    let manager =
        Arc::new(LogManager::open(config, Arc::new(default_registry().unwrap())).unwrap());
    manager
        .start(Arc::new(zredo_ops::testing::ReferenceStore::new()))
        .unwrap();

    let mut group = c.benchmark_group("manager");
    group.throughput(Throughput::Elements(1));
    group.sample_size(20);
    group.bench_function("log_commit_file_sync", |b| {
        b.iter(|| {
            let mut rec = LogRecord::new(Box::new(CreateFolder::new(1, "bench", 9)));
            rec.start(&*manager, 0);
            let rec = Arc::new(rec);
            rec.log(&*manager, false).unwrap();
            rec.commit(&*manager).unwrap();
        })
    });
    group.finish();
    manager.stop().unwrap();
}

criterion_group!(benches, bench_codec, bench_memory_commit, bench_file_commit);
criterion_main!(benches);

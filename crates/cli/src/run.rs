//! Command execution.
//!
//! Each command writes its report to `out` and returns the process exit
//! code. Errors that stop a command before it can report come back as
//! `anyhow::Error`.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use zredo_core::Version;
use zredo_durability::log::RolloverManager;
use zredo_durability::{LogReader, OpRegistry, RedoConfig, RedoPlayer, ReplayPolicy};
use zredo_ops::testing::ReferenceStore;

use crate::format::{
    format_dump, format_replay, format_verify, DumpReport, HeaderView, OutputMode, RecordView,
    ReplayReport, SegmentCheck, SegmentStatus,
};
use crate::parse::CliAction;

/// Exit code for a clean run
pub const EXIT_OK: i32 = 0;
/// Exit code when a log was found damaged or a redo failed
pub const EXIT_DAMAGED: i32 = 1;

/// Run one action.
pub fn run(action: CliAction, mode: OutputMode, out: &mut impl Write) -> anyhow::Result<i32> {
    let registry = zredo_ops::default_registry().context("building opcode registry")?;
    match action {
        CliAction::Dump { file, max_version } => dump(&file, max_version, &registry, mode, out),
        CliAction::Verify { dir } => verify(&dir, &registry, mode, out),
        CliAction::Replay {
            dir,
            archives_from,
            policy,
        } => replay(&dir, archives_from, policy, &registry, mode, out),
    }
}

fn rollover_for(dir: &Path) -> RolloverManager {
    let config = RedoConfig::default().with_dir(dir);
    RolloverManager::new(config.log_path(), config.archive_dir)
}

/// Segments under `dir`: archives with sequence >= `from`, then the active log.
fn segments(dir: &Path, archives_from: Option<u64>) -> anyhow::Result<Vec<PathBuf>> {
    let rollover = rollover_for(dir);
    let mut paths = Vec::new();
    if let Some(from) = archives_from {
        let archived = rollover
            .archived_logs(from)
            .with_context(|| format!("listing archives in {}", rollover.archive_dir().display()))?;
        paths.extend(archived.into_iter().map(|(_, path)| path));
    }
    if rollover.log_path().exists() {
        paths.push(rollover.log_path().to_path_buf());
    }
    Ok(paths)
}

/// Print every record of one segment.
pub fn dump(
    file: &Path,
    max_version: Version,
    registry: &OpRegistry,
    mode: OutputMode,
    out: &mut impl Write,
) -> anyhow::Result<i32> {
    let reader = LogReader::open(file, registry)
        .with_context(|| format!("opening {}", file.display()))?
        .with_max_version(max_version);
    let header = reader.header().map(HeaderView::from);
    let (entries, truncated) = reader.read_all()?;

    let report = DumpReport {
        path: file.display().to_string(),
        header,
        records: entries.iter().map(|e| RecordView::new(e, registry)).collect(),
        torn_bytes: truncated.map(|t| t.bytes_to_truncate()).unwrap_or(0),
    };
    writeln!(out, "{}", format_dump(&report, mode).trim_end())?;
    Ok(EXIT_OK)
}

fn check_segment(path: &Path, registry: &OpRegistry) -> anyhow::Result<SegmentCheck> {
    let scan = LogReader::scan(path).with_context(|| format!("scanning {}", path.display()))?;
    let mut check = SegmentCheck {
        path: path.display().to_string(),
        sequence: scan.header.map(|h| h.sequence),
        records: scan.frames,
        status: SegmentStatus::Ok,
        detail: None,
    };
    if let Some(offset) = scan.corrupt_at {
        check.status = SegmentStatus::Corrupt;
        check.detail = Some(format!("checksum mismatch at offset {}", offset));
        return Ok(check);
    }

    // frames are intact; make sure every record also decodes
    match LogReader::open(path, registry).and_then(|r| r.read_all()) {
        Ok((entries, truncated)) => {
            check.records = entries.len();
            if let Some(t) = truncated {
                check.status = SegmentStatus::Truncated;
                check.detail = Some(format!(
                    "{} torn bytes after offset {}",
                    t.bytes_to_truncate(),
                    t.valid_end
                ));
            }
        }
        Err(e) => {
            check.status = SegmentStatus::Corrupt;
            check.detail = Some(e.to_string());
        }
    }
    Ok(check)
}

/// Check every archived segment and the active log under `dir`.
///
/// A torn tail is reported but is not damage: it is what a crash mid-append
/// leaves behind.
pub fn verify(
    dir: &Path,
    registry: &OpRegistry,
    mode: OutputMode,
    out: &mut impl Write,
) -> anyhow::Result<i32> {
    let paths = segments(dir, Some(0))?;
    if paths.is_empty() {
        anyhow::bail!("no redo log segments under {}", dir.display());
    }
    let checks = paths
        .iter()
        .map(|p| check_segment(p, registry))
        .collect::<anyhow::Result<Vec<_>>>()?;
    writeln!(out, "{}", format_verify(&checks, mode).trim_end())?;

    let damaged = checks.iter().any(|c| c.status == SegmentStatus::Corrupt);
    Ok(if damaged { EXIT_DAMAGED } else { EXIT_OK })
}

/// Replay segments into an in-memory store and report what happened.
pub fn replay(
    dir: &Path,
    archives_from: Option<u64>,
    policy: ReplayPolicy,
    registry: &OpRegistry,
    mode: OutputMode,
    out: &mut impl Write,
) -> anyhow::Result<i32> {
    let paths = segments(dir, archives_from)?;
    tracing::info!(segments = paths.len(), dir = %dir.display(), "Dry-run replay");

    let store = ReferenceStore::lenient();
    let mut player = RedoPlayer::new(registry).with_policy(policy);
    player.replay_files(&paths, &store)?;
    let report = player.finish();

    let snapshot = store.snapshot();
    let summary = ReplayReport {
        segments: paths.iter().map(|p| p.display().to_string()).collect(),
        incomplete: report.incomplete.iter().map(|t| t.to_string()).collect(),
        mailboxes: snapshot.mailboxes.len(),
        items: snapshot.item_count(),
        shared_blobs: snapshot.blobs.len(),
        stats: report.stats,
    };
    writeln!(out, "{}", format_replay(&summary, mode).trim_end())?;
    Ok(if summary.stats.failed > 0 {
        EXIT_DAMAGED
    } else {
        EXIT_OK
    })
}

//! Report → human/json string formatting.
//!
//! - **Human** (default): one line per record or segment
//! - **JSON** (`--json`): `serde_json::to_string_pretty`

use chrono::{TimeZone, Utc};
use serde::Serialize;
use zredo_durability::format::SegmentHeader;
use zredo_durability::{OpRegistry, ReadEntry, ReplayStats};

/// Output formatting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// Render milliseconds since the epoch as RFC 3339.
pub fn format_millis(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(t) => t.to_rfc3339(),
        None => format!("{}ms", millis),
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

// ============================================================================
// dump
// ============================================================================

/// Segment header as printed by `dump`.
#[derive(Debug, Serialize)]
pub struct HeaderView {
    pub sequence: u64,
    pub created: String,
    pub server_id: String,
    pub format_version: u32,
}

impl From<&SegmentHeader> for HeaderView {
    fn from(h: &SegmentHeader) -> Self {
        HeaderView {
            sequence: h.sequence,
            created: format_millis(h.create_time),
            server_id: uuid::Uuid::from_bytes(h.server_id).to_string(),
            format_version: h.format_version,
        }
    }
}

/// One record as printed by `dump`.
#[derive(Debug, Serialize)]
pub struct RecordView {
    pub offset: u64,
    pub frame_len: u64,
    pub version: String,
    pub opcode: i32,
    pub name: String,
    pub txn: String,
    pub mailbox: String,
    pub time: String,
    pub blob_len: u64,
    pub body: String,
}

impl RecordView {
    /// View of a decoded entry
    pub fn new(entry: &ReadEntry, registry: &OpRegistry) -> Self {
        let rec = &entry.record;
        RecordView {
            offset: entry.offset,
            frame_len: entry.frame_len,
            version: rec.version().to_string(),
            opcode: rec.opcode().0,
            name: registry
                .name_of(rec.opcode())
                .unwrap_or("Unknown")
                .to_string(),
            txn: rec.txn_id().to_string(),
            mailbox: rec.mailbox_id().to_string(),
            time: format_millis(rec.timestamp()),
            blob_len: rec.blob_len(),
            body: rec.op().print_body(),
        }
    }
}

/// Full `dump` output.
#[derive(Debug, Serialize)]
pub struct DumpReport {
    pub path: String,
    pub header: Option<HeaderView>,
    pub records: Vec<RecordView>,
    /// Bytes past the last complete frame
    pub torn_bytes: u64,
}

/// Format a `dump` report.
pub fn format_dump(report: &DumpReport, mode: OutputMode) -> String {
    if mode == OutputMode::Json {
        return to_json(report);
    }
    let mut out = String::new();
    match &report.header {
        Some(h) => out.push_str(&format!(
            "{}: sequence {} created {} by {}\n",
            report.path, h.sequence, h.created, h.server_id
        )),
        None => out.push_str(&format!("{}: no segment header\n", report.path)),
    }
    for r in &report.records {
        out.push_str(&format!(
            "{:>10} {} txn={} ver={} mbox={} {}",
            r.offset, r.name, r.txn, r.version, r.mailbox, r.time
        ));
        if !r.body.is_empty() {
            out.push_str(&format!(" [{}]", r.body));
        }
        if r.blob_len > 0 {
            out.push_str(&format!(" +{} blob bytes", r.blob_len));
        }
        out.push('\n');
    }
    out.push_str(&format!("{} records", report.records.len()));
    if report.torn_bytes > 0 {
        out.push_str(&format!(", {} torn bytes at end", report.torn_bytes));
    }
    out.push('\n');
    out
}

// ============================================================================
// verify
// ============================================================================

/// Health of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Ok,
    Truncated,
    Corrupt,
}

/// One segment as reported by `verify`.
#[derive(Debug, Serialize)]
pub struct SegmentCheck {
    pub path: String,
    pub sequence: Option<u64>,
    pub records: usize,
    pub status: SegmentStatus,
    pub detail: Option<String>,
}

/// Format a `verify` report.
pub fn format_verify(checks: &[SegmentCheck], mode: OutputMode) -> String {
    if mode == OutputMode::Json {
        return to_json(&checks);
    }
    let mut out = String::new();
    for c in checks {
        let status = match c.status {
            SegmentStatus::Ok => "ok",
            SegmentStatus::Truncated => "TRUNCATED",
            SegmentStatus::Corrupt => "CORRUPT",
        };
        let seq = c
            .sequence
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<9} seq={:<6} records={:<8} {}",
            status, seq, c.records, c.path
        ));
        if let Some(detail) = &c.detail {
            out.push_str(&format!(" ({})", detail));
        }
        out.push('\n');
    }
    out
}

// ============================================================================
// replay
// ============================================================================

/// Result of a dry-run replay.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub segments: Vec<String>,
    pub stats: ReplayStats,
    pub incomplete: Vec<String>,
    pub mailboxes: usize,
    pub items: usize,
    pub shared_blobs: usize,
}

/// Format a `replay` report.
pub fn format_replay(report: &ReplayReport, mode: OutputMode) -> String {
    if mode == OutputMode::Json {
        return to_json(report);
    }
    let s = &report.stats;
    let mut out = format!(
        "segments: {}\nrecords: {}\ncommitted: {} (replayed {}, already applied {}, failed {}, deferred {})\naborted: {}\nincomplete: {}\n",
        s.segments_read,
        s.records_read,
        s.committed,
        s.replayed,
        s.idempotent_skips,
        s.failed,
        s.deferred,
        s.aborted,
        s.incomplete
    );
    if s.checkpoint_mismatches > 0 {
        out.push_str(&format!("checkpoint mismatches: {}\n", s.checkpoint_mismatches));
    }
    if let Some(tail) = &s.truncated_tail {
        out.push_str(&format!(
            "torn tail: {} bytes after offset {} in {}\n",
            tail.bytes_to_truncate(),
            tail.valid_end,
            tail.path.display()
        ));
    }
    out.push_str(&format!(
        "store: {} mailboxes, {} items, {} shared blobs\n",
        report.mailboxes, report.items, report.shared_blobs
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "1970-01-01T00:00:00+00:00");
        assert_eq!(format_millis(i64::MAX), format!("{}ms", i64::MAX));
    }

    #[test]
    fn test_verify_human_and_json() {
        let checks = vec![
            SegmentCheck {
                path: "redo-000001.log".into(),
                sequence: Some(1),
                records: 12,
                status: SegmentStatus::Ok,
                detail: None,
            },
            SegmentCheck {
                path: "redo.log".into(),
                sequence: Some(2),
                records: 3,
                status: SegmentStatus::Truncated,
                detail: Some("7 torn bytes".into()),
            },
        ];
        let human = format_verify(&checks, OutputMode::Human);
        assert!(human.contains("TRUNCATED"));
        assert!(human.contains("(7 torn bytes)"));

        let json: serde_json::Value =
            serde_json::from_str(&format_verify(&checks, OutputMode::Json)).unwrap();
        assert_eq!(json[1]["status"], "truncated");
        assert_eq!(json[0]["records"], 12);
    }
}

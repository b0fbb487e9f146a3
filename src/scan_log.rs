//! Append-only scanner for JSONL conversation logs.
//!
//! Each source row remembers the byte offset just past the last consumed
//! line and the sequence number of that line. A run reads only complete
//! lines appended since then; a line still being written (no trailing
//! newline) is left for the next run. A file that shrank was truncated or
//! rotated, so all of its turns are soft-deleted and it is read from the
//! start again.

use serde::Deserialize;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use memex_core::chunk::segment_text;
use memex_core::models::{ChunkIdentity, SourceKind, SourceState, KIND_TURN};
use memex_core::rank::parse_timestamp;

use crate::config::LogSourceConfig;
use crate::error::SyncResult;
use crate::ingest::{ScanOutcome, ScanStats, SyncContext};
use crate::ledger;
use crate::sources;

#[derive(Debug, Deserialize)]
struct TurnRecord {
    #[serde(default)]
    ts: Option<serde_json::Value>,
    #[serde(default)]
    turn_id: Option<serde_json::Value>,
    #[serde(default)]
    messages: Vec<TurnMessage>,
}

#[derive(Debug, Deserialize)]
struct TurnMessage {
    #[serde(default)]
    content: String,
}

/// A parsed log line ready for the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub key: String,
    pub text: String,
    pub updated_at: String,
}

/// Parse one log line consumed as sequence `seq`.
///
/// `None` for blank lines, malformed JSON, and turns with no text. The turn
/// key is `turn_id` when present, else the sequence number. A missing `ts`
/// falls back to `file_mtime`; an unparseable one to the current time.
pub fn parse_turn(line: &str, seq: i64, file_mtime: &str) -> Option<Turn> {
    if line.trim().is_empty() {
        return None;
    }
    let record: TurnRecord = serde_json::from_str(line).ok()?;

    let text = record
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let key = match &record.turn_id {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => seq.to_string(),
    };

    let updated_at = match &record.ts {
        None | Some(serde_json::Value::Null) => file_mtime.to_string(),
        Some(serde_json::Value::String(s)) => parse_timestamp(s)
            .unwrap_or_else(Utc::now)
            .to_rfc3339(),
        Some(_) => Utc::now().to_rfc3339(),
    };

    Some(Turn {
        key,
        text: text.to_string(),
        updated_at,
    })
}

/// Split `buf` into complete lines. Returns the lines and the number of bytes
/// they span (including their newlines); a trailing partial line is excluded.
pub fn complete_lines(buf: &[u8]) -> (Vec<String>, usize) {
    let mut lines = Vec::new();
    let mut consumed = 0;
    while let Some(pos) = buf[consumed..].iter().position(|&b| b == b'\n') {
        let line = &buf[consumed..consumed + pos];
        lines.push(String::from_utf8_lossy(line).into_owned());
        consumed += pos + 1;
    }
    (lines, consumed)
}

/// Log files under the configured directory matching `include_globs`,
/// sorted by path.
pub fn discover_logs(logs: &LogSourceConfig, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let include = build_globset(&logs.include_globs)?;
    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        if include.is_match(rel) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Scan one log file from its stored offset.
pub async fn scan_log(ctx: &SyncContext<'_>, path: &Path) -> SyncResult<ScanOutcome> {
    let source = sources::canonical_source(ctx.config, path);
    let metadata = std::fs::metadata(path)?;
    let size = metadata.len() as i64;
    let mtime = sources::mtime_rfc3339(&metadata);

    let mut tx = ctx.pool.begin().await?;
    let previous = sources::get_source(&mut tx, &source).await?;

    let mut offset = previous.as_ref().and_then(|p| p.last_offset).unwrap_or(0);
    let mut last_seq = previous.as_ref().and_then(|p| p.last_seq).unwrap_or(-1);
    let last_size = previous.as_ref().and_then(|p| p.last_size);

    let mut stats = ScanStats::default();
    let mut stale = Vec::new();

    let truncated = matches!(last_size, Some(prev) if size < prev);
    if truncated {
        let deleted = ledger::soft_delete_source(&mut tx, &source, KIND_TURN, &mtime).await?;
        tracing::info!(source = %source, deleted = deleted.len(), "log shrank, restarting from offset 0");
        stats.deleted = deleted.len();
        stale.extend(deleted);
        offset = 0;
        last_seq = -1;
    }

    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset.max(0) as u64))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let (lines, consumed) = complete_lines(&buf);

    if lines.is_empty() && !truncated {
        tx.rollback().await?;
        return Ok(ScanOutcome::Unchanged);
    }

    let mut to_embed = Vec::new();
    for line in &lines {
        last_seq += 1;
        let Some(turn) = parse_turn(line, last_seq, &mtime) else {
            tracing::debug!(source = %source, seq = last_seq, "skipping log line");
            continue;
        };
        stats.items += 1;
        for (i, segment) in segment_text(&turn.text, ctx.config.chunking.max_chars)
            .into_iter()
            .enumerate()
        {
            let identity = ChunkIdentity::new(&source, KIND_TURN, &turn.key, i as i64);
            let outcome =
                ledger::upsert_revision(&mut tx, &identity, &segment, &turn.updated_at).await?;
            if outcome.changed {
                stats.changed += 1;
                to_embed.push((outcome.chunk_id, segment));
            }
            stale.extend(outcome.superseded);
        }
    }

    let new_offset = offset + consumed as i64;
    sources::upsert_source(
        &mut tx,
        &SourceState {
            source: source.clone(),
            kind: SourceKind::Log,
            key: sources::source_key(path),
            fingerprint: None,
            last_mtime: Some(mtime),
            last_size: Some(size),
            last_seq: Some(last_seq),
            last_offset: Some(new_offset),
            updated_at: None,
        },
    )
    .await?;

    stats.embedded = ctx.apply_vectors(&mut tx, &to_embed, &stale).await?;

    tx.commit().await?;
    tracing::info!(
        source = %source,
        turns = stats.items,
        changed = stats.changed,
        last_seq,
        offset = new_offset,
        "log ingested"
    );
    Ok(ScanOutcome::Ingested(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MTIME: &str = "2025-03-01T00:00:00+00:00";

    #[test]
    fn test_complete_lines_leaves_partial_tail() {
        let (lines, consumed) = complete_lines(b"a\nbb\npartial");
        assert_eq!(lines, vec!["a", "bb"]);
        assert_eq!(consumed, 5);

        let (lines, consumed) = complete_lines(b"no newline yet");
        assert!(lines.is_empty());
        assert_eq!(consumed, 0);
    }

    #[test]
    fn test_parse_turn_joins_messages() {
        let line = r#"{"ts":"2025-01-02T03:04:05Z","turn_id":"t-9","messages":[{"role":"user","content":"hi"},{"role":"assistant","content":"hello"}]}"#;
        let turn = parse_turn(line, 4, MTIME).unwrap();
        assert_eq!(turn.key, "t-9");
        assert_eq!(turn.text, "hi\nhello");
        assert_eq!(turn.updated_at, "2025-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_parse_turn_falls_back_to_seq_and_mtime() {
        let turn = parse_turn(r#"{"messages":[{"content":"x"}]}"#, 7, MTIME).unwrap();
        assert_eq!(turn.key, "7");
        assert_eq!(turn.updated_at, MTIME);
    }

    #[test]
    fn test_parse_turn_skips_unusable_lines() {
        assert!(parse_turn("", 0, MTIME).is_none());
        assert!(parse_turn("   ", 0, MTIME).is_none());
        assert!(parse_turn("{not json", 0, MTIME).is_none());
        assert!(parse_turn(r#"{"messages":[{"content":"  "}]}"#, 0, MTIME).is_none());
    }

    #[test]
    fn test_unparseable_ts_uses_now() {
        let before = Utc::now();
        let turn = parse_turn(r#"{"ts":"yesterday","messages":[{"content":"x"}]}"#, 0, MTIME)
            .unwrap();
        let ts = parse_timestamp(&turn.updated_at).unwrap();
        assert!(ts >= before - chrono::Duration::seconds(1));
    }

    #[test]
    fn test_discover_logs_filters_by_glob() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("2025")).unwrap();
        std::fs::write(tmp.path().join("a.jsonl"), "").unwrap();
        std::fs::write(tmp.path().join("2025").join("b.jsonl"), "").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "").unwrap();

        let cfg = LogSourceConfig {
            dir: tmp.path().to_path_buf(),
            include_globs: vec!["*.jsonl".to_string()],
        };
        let files = discover_logs(&cfg, tmp.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.extension().unwrap() == "jsonl"));
    }
}

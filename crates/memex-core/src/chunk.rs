//! Content addressing and text segmentation.
//!
//! Every chunk identity maps to a deterministic base id (a SHA-256 digest of
//! its `(source, kind, key, seq)` tuple) and every revision to
//! `<base>.r<revision>`. Content and source fingerprints are SHA-256 hex
//! digests as well.
//!
//! [`segment_text`] splits long log turns into line-aligned segments that
//! respect a character budget, hard-splitting single lines that exceed it.
//!
//! # Example
//!
//! ```rust
//! use memex_core::chunk::{chunk_id, segment_text};
//! use memex_core::models::ChunkIdentity;
//!
//! let id = ChunkIdentity::new("memory.toml", "memory_item", "infra:0123", 0);
//! assert!(chunk_id(&id, 2).ends_with(".r2"));
//! assert_eq!(segment_text("one\ntwo", 2000), vec!["one\ntwo".to_string()]);
//! ```

use sha2::{Digest, Sha256};

use crate::models::{ChunkIdentity, NoteItem};

/// Field separator used when hashing identity tuples.
const UNIT_SEP: char = '\u{1f}';

/// Hex length of the identity digest embedded in chunk ids.
const BASE_ID_HEX: usize = 40;

/// Hex length of the content digest embedded in note item keys.
const ITEM_KEY_HEX: usize = 16;

/// SHA-256 hex digest of `text`.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collapse all whitespace runs to single spaces and trim.
pub fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic, revision-independent id prefix for an identity.
pub fn base_id(identity: &ChunkIdentity) -> String {
    let tuple = format!(
        "{}{sep}{}{sep}{}{sep}{}",
        identity.source,
        identity.kind,
        identity.key,
        identity.seq,
        sep = UNIT_SEP
    );
    format!("c_{}", &hash_text(&tuple)[..BASE_ID_HEX])
}

/// Id of a specific revision of an identity.
pub fn chunk_id(identity: &ChunkIdentity, revision: i64) -> String {
    format!("{}.r{}", base_id(identity), revision)
}

/// Split a revisioned chunk id into its base id and revision.
///
/// Returns `None` unless `id` is `c_<digest>.r<n>` with `n >= 1`; a bare base
/// id is not a chunk id.
pub fn parse_chunk_id(id: &str) -> Option<(&str, i64)> {
    let (base, rev) = id.rsplit_once(".r")?;
    let rev = rev.parse::<i64>().ok()?;
    if !base.starts_with("c_") || rev < 1 {
        return None;
    }
    Some((base, rev))
}

/// Key of a note item: lowercased list name plus a short content digest.
///
/// # Arguments
///
/// * `list_name` — Name of the list the item sits in, e.g. `infra`.
/// * `text` — The item text. It is whitespace-normalized before hashing, so
///   reflowing an item does not change its key.
pub fn item_key(list_name: &str, text: &str) -> String {
    format!(
        "{}:{}",
        normalize_ws(list_name).to_lowercase(),
        &hash_text(text)[..ITEM_KEY_HEX]
    )
}

/// Fingerprint of a note document's full item set.
///
/// Hash over the key-sorted `key|contentHash` lines, so item order inside the
/// document does not matter.
pub fn items_fingerprint(items: &[NoteItem]) -> String {
    let mut lines: Vec<String> = items
        .iter()
        .map(|item| format!("{}|{}", item.key, hash_text(&item.text)))
        .collect();
    lines.sort();
    hash_text(&lines.join("\n"))
}

/// Split text into line-aligned segments of at most `max_chars` characters.
///
/// # Arguments
///
/// * `text` — The turn content to segment.
/// * `max_chars` — Character (not byte) budget per segment.
///
/// # Guarantees
///
/// - No segment is longer than `max_chars` characters.
/// - Lines are accumulated until the next one would overflow the budget.
/// - A single line longer than the budget is hard-split, preferring the last
///   space before the limit.
/// - Blank text yields no segments.
pub fn segment_text(text: &str, max_chars: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let max_chars = max_chars.max(1);

    let mut segments = Vec::new();
    let mut buf: Vec<&str> = Vec::new();
    let mut total = 0usize;

    for line in text.split('\n') {
        let len = line.chars().count();

        if len > max_chars {
            flush(&mut segments, &mut buf, &mut total);
            for piece in hard_split(line, max_chars) {
                let piece = piece.trim();
                if !piece.is_empty() {
                    segments.push(piece.to_string());
                }
            }
            continue;
        }

        if total + len + 1 > max_chars && !buf.is_empty() {
            flush(&mut segments, &mut buf, &mut total);
        }
        buf.push(line);
        total += len + 1;
    }

    flush(&mut segments, &mut buf, &mut total);
    segments
}

fn flush(segments: &mut Vec<String>, buf: &mut Vec<&str>, total: &mut usize) {
    if buf.is_empty() {
        return;
    }
    let joined = buf.join("\n");
    let joined = joined.trim();
    if !joined.is_empty() {
        segments.push(joined.to_string());
    }
    buf.clear();
    *total = 0;
}

fn hard_split(line: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = line;

    while rest.chars().count() > max_chars {
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let split = rest[..limit]
            .rfind(' ')
            .filter(|&i| i > 0)
            .map(|i| i + 1)
            .unwrap_or(limit);
        pieces.push(&rest[..split]);
        rest = &rest[split..];
    }

    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(key: &str, seq: i64) -> ChunkIdentity {
        ChunkIdentity::new("notes/memory.toml", "memory_item", key, seq)
    }

    #[test]
    fn test_base_id_is_deterministic_and_identity_sensitive() {
        let a = base_id(&identity("k", 0));
        assert_eq!(a, base_id(&identity("k", 0)));
        assert_ne!(a, base_id(&identity("k", 1)));
        assert_ne!(a, base_id(&identity("j", 0)));
        assert!(a.starts_with("c_"));
        assert_eq!(a.len(), 2 + BASE_ID_HEX);
    }

    #[test]
    fn test_chunk_id_roundtrips_through_parse() {
        let id = chunk_id(&identity("k", 0), 12);
        let (base, rev) = parse_chunk_id(&id).unwrap();
        assert_eq!(base, base_id(&identity("k", 0)));
        assert_eq!(rev, 12);
    }

    #[test]
    fn test_parse_chunk_id_rejects_garbage() {
        assert!(parse_chunk_id("nope").is_none());
        assert!(parse_chunk_id("c_abc.rx").is_none());
        assert!(parse_chunk_id("c_abc.r0").is_none());
        assert!(parse_chunk_id("x_abc.r1").is_none());
    }

    #[test]
    fn test_normalize_ws() {
        assert_eq!(normalize_ws("  Use   env\n\tvars  "), "Use env vars");
        assert_eq!(normalize_ws(" \n "), "");
    }

    #[test]
    fn test_item_key_shape() {
        let key = item_key(" Infra  Env ", "Use env vars for secrets.");
        let (name, digest) = key.split_once(':').unwrap();
        assert_eq!(name, "infra env");
        assert_eq!(digest.len(), ITEM_KEY_HEX);
    }

    #[test]
    fn test_fingerprint_ignores_item_order() {
        let a = NoteItem {
            key: "a".into(),
            text: "alpha".into(),
        };
        let b = NoteItem {
            key: "b".into(),
            text: "beta".into(),
        };
        assert_eq!(
            items_fingerprint(&[a.clone(), b.clone()]),
            items_fingerprint(&[b.clone(), a.clone()])
        );
        let b2 = NoteItem {
            key: "b".into(),
            text: "beta!".into(),
        };
        assert_ne!(items_fingerprint(&[a.clone(), b]), items_fingerprint(&[a, b2]));
    }

    #[test]
    fn test_segment_blank_text() {
        assert!(segment_text("", 100).is_empty());
        assert!(segment_text(" \n \n", 100).is_empty());
    }

    #[test]
    fn test_segment_groups_lines_under_budget() {
        let segs = segment_text("alpha\nbeta\ngamma", 100);
        assert_eq!(segs, vec!["alpha\nbeta\ngamma"]);
    }

    #[test]
    fn test_segment_respects_budget() {
        let text = (0..40)
            .map(|i| format!("line number {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let segs = segment_text(&text, 50);
        assert!(segs.len() > 1);
        for s in &segs {
            assert!(s.chars().count() <= 50, "segment too long: {:?}", s);
        }
        let rejoined = segs.join("\n");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_segment_hard_splits_long_line() {
        let line = "word ".repeat(30);
        let segs = segment_text(&line, 20);
        assert!(segs.len() > 1);
        for s in &segs {
            assert!(s.chars().count() <= 20);
        }
    }

    #[test]
    fn test_segment_multibyte_without_spaces() {
        let line = "é".repeat(25);
        let segs = segment_text(&line, 10);
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0].chars().count(), 10);
        assert_eq!(segs[2].chars().count(), 5);
    }
}

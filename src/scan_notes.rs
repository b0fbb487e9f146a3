//! Full-rescan scanner for structured note documents.
//!
//! A note document (TOML or JSON, by extension) holds one or more lists of
//! short text items. Each run re-reads the whole document, but a fingerprint
//! over the item set short-circuits documents that have not changed. When
//! something did change, every item goes through the ledger, items that
//! vanished are soft-deleted, and only changed items are embedded, all in a
//! single transaction.

use serde_json::{Map, Value};
use std::path::Path;

use memex_core::chunk::{hash_text, item_key, items_fingerprint, normalize_ws};
use memex_core::models::{ChunkIdentity, NoteItem, SourceKind, SourceState, KIND_DOCUMENT_META};

use crate::config::DocumentSourceConfig;
use crate::error::{SyncError, SyncResult};
use crate::ingest::{ScanOutcome, ScanStats, SyncContext};
use crate::ledger;
use crate::sources;

/// Key and sequence of the metadata snapshot chunk.
const META_KEY: &str = "meta";

/// Fingerprint entry standing in for the metadata snapshot.
const META_FINGERPRINT_KEY: &str = "~meta";

/// Parse a document as JSON (`.json`) or TOML (anything else).
pub fn parse_document(path: &Path, content: &str) -> SyncResult<Value> {
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(content)
            .map_err(|e| SyncError::Parse(format!("{}: {}", path.display(), e)))
    } else {
        toml::from_str(content).map_err(|e| SyncError::Parse(format!("{}: {}", path.display(), e)))
    }
}

fn lookup<'a>(doc: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(doc, |node, segment| node.as_object()?.get(segment))
}

fn last_segment(dotted: &str) -> &str {
    dotted.rsplit('.').next().unwrap_or(dotted)
}

/// Normalized items of one list. Non-string and blank entries are skipped.
fn list_items(list_name: &str, values: &[Value], out: &mut Vec<NoteItem>) {
    for value in values {
        let Some(text) = value.as_str() else {
            continue;
        };
        let text = normalize_ws(text);
        if text.is_empty() {
            continue;
        }
        out.push(NoteItem {
            key: item_key(list_name, &text),
            text,
        });
    }
}

fn items_at(doc: &Value, dotted: &str) -> Vec<NoteItem> {
    let mut items = Vec::new();
    match lookup(doc, dotted) {
        Some(Value::Array(values)) => list_items(last_segment(dotted), values, &mut items),
        Some(Value::Object(lists)) => {
            for (name, values) in lists {
                if let Value::Array(values) = values {
                    list_items(name, values, &mut items);
                }
            }
        }
        _ => {}
    }
    items
}

/// Ordered items of a document: `list`, or `legacy_list` when `list` is
/// missing or yields nothing. Duplicate keys keep their first occurrence.
pub fn extract_items(doc: &Value, list: &str, legacy_list: Option<&str>) -> Vec<NoteItem> {
    let mut items = items_at(doc, list);
    if items.is_empty() {
        if let Some(legacy) = legacy_list {
            items = items_at(doc, legacy);
        }
    }
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.key.clone()));
    items
}

fn remove_path(node: &mut Map<String, Value>, segments: &[&str]) {
    match segments {
        [] => {}
        [last] => {
            node.remove(*last);
        }
        [first, rest @ ..] => {
            if let Some(Value::Object(child)) = node.get_mut(*first) {
                remove_path(child, rest);
                if child.is_empty() {
                    node.remove(*first);
                }
            }
        }
    }
}

/// The document minus its item lists, as sorted-key JSON. Empty when nothing
/// else is left.
pub fn meta_text(doc: &Value, list_paths: &[&str]) -> String {
    let Value::Object(map) = doc else {
        return String::new();
    };
    let mut rest = map.clone();
    for path in list_paths {
        let segments: Vec<&str> = path.split('.').collect();
        remove_path(&mut rest, &segments);
    }
    if rest.is_empty() {
        return String::new();
    }
    serde_json::to_string_pretty(&Value::Object(rest)).unwrap_or_default()
}

/// Scan one configured document.
pub async fn scan_document(
    ctx: &SyncContext<'_>,
    doc_cfg: &DocumentSourceConfig,
) -> SyncResult<ScanOutcome> {
    let path = ctx.config.resolve(&doc_cfg.path);
    let source = sources::canonical_source(ctx.config, &path);

    let metadata = std::fs::metadata(&path)?;
    let content = std::fs::read_to_string(&path)?;
    let doc = parse_document(&path, &content)?;
    let mtime = sources::mtime_rfc3339(&metadata);

    let items = extract_items(&doc, &doc_cfg.list, doc_cfg.legacy_list.as_deref());
    let meta = if doc_cfg.meta {
        let mut paths = vec![doc_cfg.list.as_str()];
        if let Some(legacy) = doc_cfg.legacy_list.as_deref() {
            paths.push(legacy);
        }
        Some(meta_text(&doc, &paths))
    } else {
        None
    };

    let mut fingerprint_items = items.clone();
    if let Some(meta) = &meta {
        fingerprint_items.push(NoteItem {
            key: META_FINGERPRINT_KEY.to_string(),
            text: hash_text(meta),
        });
    }
    let fingerprint = items_fingerprint(&fingerprint_items);

    let mut tx = ctx.pool.begin().await?;

    let previous = sources::get_source(&mut tx, &source).await?;
    if previous
        .as_ref()
        .and_then(|p| p.fingerprint.as_deref())
        .map(|fp| fp == fingerprint)
        .unwrap_or(false)
    {
        tx.rollback().await?;
        tracing::debug!(source = %source, "document unchanged");
        return Ok(ScanOutcome::Unchanged);
    }

    let mut stats = ScanStats {
        items: items.len(),
        ..ScanStats::default()
    };
    let mut to_embed = Vec::new();
    let mut stale = Vec::new();

    for item in &items {
        let identity = ChunkIdentity::new(&source, &doc_cfg.kind, &item.key, 0);
        let outcome = ledger::upsert_revision(&mut tx, &identity, &item.text, &mtime).await?;
        if outcome.changed {
            stats.changed += 1;
            to_embed.push((outcome.chunk_id, item.text.clone()));
        }
        stale.extend(outcome.superseded);
    }

    let keep: Vec<String> = items.iter().map(|i| i.key.clone()).collect();
    let deleted = ledger::soft_delete_missing(&mut tx, &source, &doc_cfg.kind, &keep, &mtime).await?;
    stats.deleted += deleted.len();
    stale.extend(deleted);

    if let Some(meta) = &meta {
        let identity = ChunkIdentity::new(&source, KIND_DOCUMENT_META, META_KEY, 0);
        if meta.is_empty() {
            if let Some(id) = ledger::soft_delete_identity(&mut tx, &identity, &mtime).await? {
                stats.deleted += 1;
                stale.push(id);
            }
        } else {
            let outcome = ledger::upsert_revision(&mut tx, &identity, meta, &mtime).await?;
            if outcome.changed {
                stats.changed += 1;
                to_embed.push((outcome.chunk_id, meta.clone()));
            }
            stale.extend(outcome.superseded);
        }
    }

    sources::upsert_source(
        &mut tx,
        &SourceState {
            source: source.clone(),
            kind: SourceKind::Document,
            key: sources::source_key(&path),
            fingerprint: Some(fingerprint),
            last_mtime: Some(mtime.clone()),
            last_size: Some(metadata.len() as i64),
            last_seq: None,
            last_offset: None,
            updated_at: None,
        },
    )
    .await?;

    stats.embedded = ctx.apply_vectors(&mut tx, &to_embed, &stale).await?;

    tx.commit().await?;
    tracing::info!(
        source = %source,
        items = stats.items,
        changed = stats.changed,
        deleted = stats.deleted,
        "document ingested"
    );
    Ok(ScanOutcome::Ingested(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_toml_and_json() {
        let t = parse_document(Path::new("m.toml"), "[memory]\nlists = { infra = [\"a\"] }\n")
            .unwrap();
        assert!(lookup(&t, "memory.lists.infra").is_some());
        let j = parse_document(Path::new("m.JSON"), r#"{"items": ["a"]}"#).unwrap();
        assert!(lookup(&j, "items").is_some());
        assert!(matches!(
            parse_document(Path::new("m.toml"), "[[["),
            Err(SyncError::Parse(_))
        ));
    }

    #[test]
    fn test_table_of_lists_uses_table_keys() {
        let doc = json!({
            "memory": { "lists": {
                "Infra": ["Use  the dotenv loader", 42, "   "],
                "style": ["Prefer short replies"]
            }}
        });
        let items = extract_items(&doc, "memory.lists", None);
        assert_eq!(items.len(), 2);
        assert!(items[0].key.starts_with("infra:"));
        assert_eq!(items[0].text, "Use the dotenv loader");
        assert!(items[1].key.starts_with("style:"));
    }

    #[test]
    fn test_array_list_uses_last_segment() {
        let doc = json!({ "style": { "notes": ["one", "two"] } });
        let items = extract_items(&doc, "style.notes", None);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.key.starts_with("notes:")));
    }

    #[test]
    fn test_legacy_list_fallback() {
        let doc = json!({ "memory": { "lists": {} }, "log": ["old item"] });
        let items = extract_items(&doc, "memory.lists", Some("log"));
        assert_eq!(items.len(), 1);
        assert!(items[0].key.starts_with("log:"));

        let doc = json!({ "memory": { "lists": { "a": ["new"] } }, "log": ["old"] });
        let items = extract_items(&doc, "memory.lists", Some("log"));
        assert_eq!(items[0].text, "new");
    }

    #[test]
    fn test_duplicate_items_collapse() {
        let doc = json!({ "items": ["same", "same "] });
        assert_eq!(extract_items(&doc, "items", None).len(), 1);
    }

    #[test]
    fn test_meta_text_excludes_lists_and_sorts_keys() {
        let doc = json!({
            "owner": "sam",
            "memory": { "lists": { "a": ["x"] }, "version": 2 },
            "log": ["y"]
        });
        let meta = meta_text(&doc, &["memory.lists", "log"]);
        assert!(!meta.contains("lists"));
        assert!(!meta.contains("\"log\""));
        assert!(meta.find("memory").unwrap() < meta.find("owner").unwrap());

        let only_lists = json!({ "memory": { "lists": { "a": ["x"] } } });
        assert_eq!(meta_text(&only_lists, &["memory.lists"]), "");
    }
}

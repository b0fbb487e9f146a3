//! CLI tests: spawn the built `memex` binary against a temp workspace with
//! embeddings disabled.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn memex_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("memex");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("notes")).unwrap();
    fs::create_dir_all(root.join("logs")).unwrap();

    fs::write(
        root.join("notes/memory.toml"),
        "[memory.lists]\ninfra = [\"Deploy with the blue-green script\"]\nstyle = [\"Prefer python examples\"]\n",
    )
    .unwrap();
    fs::write(
        root.join("logs/chat.jsonl"),
        concat!(
            r#"{"turn_id":"t1","ts":"2025-01-01T00:00:00Z","messages":[{"role":"user","content":"how do we deploy"}]}"#,
            "\n",
            r#"{"turn_id":"t2","ts":"2025-01-01T00:01:00Z","messages":[{"role":"assistant","content":"with the script"}]}"#,
            "\n",
        ),
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/memex.sqlite"

[sources]
root = "{root}"

[[sources.documents]]
path = "notes/memory.toml"
kind = "memory_item"
list = "memory.lists"

[sources.logs]
dir = "logs"
"#,
        root = root.display()
    );

    let config_path = root.join("config/memex.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_memex(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = memex_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run memex binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_memex(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/memex.sqlite").exists());

    let (_, _, success) = run_memex(&config_path, &["init"]);
    assert!(success, "second init failed (not idempotent)");
}

#[test]
fn test_sync_reports_each_source() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_memex(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("notes/memory.toml [document]: ingested (items=2, changed=2"));
    assert!(stdout.contains("logs/chat.jsonl [log]: ingested (items=2, changed=2"));
    assert!(stdout.contains("failed: 0"));
    // Embeddings are disabled, so every head is left without a vector.
    assert!(stdout.contains("pending: 4"));
    assert!(stdout.contains("incomplete: 4 heads without vectors"));
    assert!(!stdout.lines().any(|l| l == "ok"));

    let (stdout, _, success) = run_memex(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("notes/memory.toml [document]: unchanged"));
    assert!(stdout.contains("logs/chat.jsonl [log]: unchanged"));
}

#[test]
fn test_sync_only_documents() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_memex(&config_path, &["sync", "--only", "documents"]);
    assert!(success);
    assert!(stdout.contains("notes/memory.toml"));
    assert!(!stdout.contains("logs/chat.jsonl"));

    let (_, stderr, success) = run_memex(&config_path, &["sync", "--only", "everything"]);
    assert!(!success);
    assert!(stderr.contains("Unknown scope"));
}

#[test]
fn test_sync_skips_when_locked() {
    let (_tmp, config_path) = setup_test_env();
    let config = memex::config::load_config(&config_path).unwrap();
    let lock = memex::lock::lock_for(&config).unwrap();
    let _guard = lock.try_acquire().unwrap().unwrap();

    let (stdout, stderr, success) = run_memex(&config_path, &["sync"]);
    assert!(success, "skipped sync must exit 0: stderr={}", stderr);
    assert!(stdout.contains("skipped: another sync is running"));
}

#[test]
fn test_stats_reports_pending_without_provider() {
    let (_tmp, config_path) = setup_test_env();
    run_memex(&config_path, &["sync"]);

    let (stdout, stderr, success) = run_memex(&config_path, &["stats"]);
    assert!(success, "stats failed: stderr={}", stderr);
    assert!(stdout.contains("Sources:       2"));
    assert!(stdout.contains("Active heads:  4"));
    assert!(stdout.contains("Vectors:       0"));
    assert!(stdout.contains("Pending:       4"));
    assert!(stdout.contains("Consistent:    no"));
}

#[tokio::test]
async fn test_get_prints_revision_history() {
    let (_tmp, config_path) = setup_test_env();
    run_memex(&config_path, &["sync"]);

    let config = memex::config::load_config(&config_path).unwrap();
    let pool = memex::db::connect(&config).await.unwrap();
    let id: String = sqlx::query_scalar("SELECT id FROM chunks_head WHERE key = 't1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    pool.close().await;

    let (stdout, stderr, success) = run_memex(&config_path, &["get", &id]);
    assert!(success, "get failed: stderr={}", stderr);
    assert!(stdout.contains("source:  logs/chat.jsonl"));
    assert!(stdout.contains("--- Revisions (1) ---"));
    assert!(stdout.contains("how do we deploy"));

    let base = id.trim_end_matches(".r1");
    let (stdout, _, success) = run_memex(&config_path, &["get", base, "--json"]);
    assert!(success);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["head"], id);
    assert_eq!(parsed["active"], true);
}

#[test]
fn test_get_unknown_id_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_memex(&config_path, &["init"]);

    let (_, stderr, success) = run_memex(&config_path, &["get", "c_0000000000000000.r1"]);
    assert!(!success);
    assert!(stderr.contains("chunk not found"));
}

#[test]
fn test_search_requires_provider() {
    let (_tmp, config_path) = setup_test_env();
    run_memex(&config_path, &["sync"]);

    let (_, stderr, success) = run_memex(&config_path, &["search", "deploy"]);
    assert!(!success);
    assert!(stderr.contains("embedding provider"));
}

#[test]
fn test_search_rejects_unknown_style() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_memex(&config_path, &["search", "deploy", "--style", "abstractive"]);
    assert!(!success);
    assert!(stderr.contains("Unknown search style"));
}

#[test]
fn test_embed_pending_requires_provider() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_memex(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_memex(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

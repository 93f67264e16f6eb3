use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use engagement_hub::config::load_config;
use engagement_hub::models::NewDocument;
use engagement_hub::storage::{BlobStore, FsBlobStore};
use engagement_hub::store::{NewEvaluation, ProjectStore, SqliteStore};

fn ehub_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ehub");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("notes.txt"), "Need login and payment").unwrap();
    fs::write(files_dir.join("photo.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();
    fs::write(files_dir.join("archive.xyz"), "???").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/ehub.sqlite"

[server]
bind = "127.0.0.1:7341"

[storage]
backend = "fs"
root = "{root}/blobs"

[analysis]
concurrency = 2
batch_timeout_secs = 30
"#,
        root = root.display()
    );

    let config_path = config_dir.join("ehub.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ehub(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ehub_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ehub binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ehub(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/ehub.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_ehub(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ehub(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_ehub(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_extract_text_file() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("files/notes.txt");

    let (stdout, stderr, success) =
        run_ehub(&config_path, &["extract", file.to_str().unwrap()]);
    assert!(success, "extract failed: {}", stderr);
    assert!(stdout.contains("kind: text"));
    assert!(stdout.contains("Need login and payment"));
}

#[test]
fn test_extract_media_placeholder() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("files/photo.png");

    let (stdout, _, success) = run_ehub(&config_path, &["extract", file.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("kind: image"));
    assert!(stdout.contains("[IMAGE FILE] photo.png"));
}

#[test]
fn test_extract_does_not_need_config() {
    let (tmp, _) = setup_test_env();
    let file = tmp.path().join("files/notes.txt");

    let (stdout, _, success) = run_ehub(
        &tmp.path().join("missing.toml"),
        &["extract", file.to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("Need login and payment"));
}

#[test]
fn test_extract_unsupported_format_fails() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("files/archive.xyz");

    let (_, stderr, success) = run_ehub(&config_path, &["extract", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("xyz"));
}

#[test]
fn test_vendors_empty_project() {
    let (_tmp, config_path) = setup_test_env();
    run_ehub(&config_path, &["init"]);

    let (stdout, _, success) = run_ehub(&config_path, &["vendors", "proj-1"]);
    assert!(success);
    assert!(stdout.contains("No vendors"));
}

#[tokio::test]
async fn test_vendors_ranked_by_total() {
    let (_tmp, config_path) = setup_test_env();
    let cfg = load_config(&config_path).unwrap();
    let store = SqliteStore::open(&cfg).await.unwrap();

    let low = store.create_vendor("proj-1", "Lowball Ltd", "").await.unwrap();
    let high = store
        .create_vendor("proj-1", "Acme Systems", "integrator")
        .await
        .unwrap();
    for (vendor_id, category, score) in [
        (&high.id, "technical", 80.0),
        (&high.id, "cost", 70.0),
        (&high.id, "experience", 90.0),
        (&high.id, "support", 60.0),
        (&low.id, "cost", 40.0),
    ] {
        store
            .add_evaluation(NewEvaluation {
                vendor_id: vendor_id.clone(),
                category: category.to_string(),
                score,
                comment: None,
            })
            .await
            .unwrap();
    }
    store.close().await;

    let (stdout, stderr, success) = run_ehub(&config_path, &["vendors", "proj-1"]);
    assert!(success, "vendors failed: {}", stderr);
    let acme = stdout.find("Acme Systems").unwrap();
    let lowball = stdout.find("Lowball Ltd").unwrap();
    assert!(acme < lowball, "expected Acme first:\n{}", stdout);
    assert!(stdout.contains("76.00"));
    assert!(stdout.contains("10.00"));

    let (stdout, _, success) = run_ehub(&config_path, &["vendors", "proj-1", "--json"]);
    assert!(success);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed[0]["name"], "Acme Systems");
    assert_eq!(parsed[0]["totalScore"], 76.0);
    assert_eq!(parsed[0]["status"], "EVALUATING");
}

#[tokio::test]
async fn test_analyze_with_disabled_model_reports_per_document_failure() {
    let (_tmp, config_path) = setup_test_env();
    let cfg = load_config(&config_path).unwrap();
    let store = SqliteStore::open(&cfg).await.unwrap();
    let blobs = FsBlobStore::new(cfg.storage.root.clone(), None);

    let blob = blobs.put("notes.txt", b"Need login and payment").await.unwrap();
    let doc = store
        .insert_document(NewDocument {
            project_id: "proj-1".into(),
            name: "notes.txt".into(),
            url: blob.url,
            blob_url: blob.key,
        })
        .await
        .unwrap();
    store.close().await;

    let (stdout, stderr, success) = run_ehub(&config_path, &["analyze", &doc.id, "--json"]);
    assert!(success, "analyze failed: {}", stderr);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
    assert_eq!(parsed[0]["documentId"], doc.id.as_str());
    assert_eq!(parsed[0]["error"], "document analysis failed");
}

#[test]
fn test_analyze_unknown_document_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_ehub(&config_path, &["init"]);

    let (_, stderr, success) = run_ehub(&config_path, &["analyze", "no-such-id"]);
    assert!(!success);
    assert!(stderr.contains("no documents found"));
}

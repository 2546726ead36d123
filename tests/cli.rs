use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tdb_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tdb");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let config_content = format!(
        r#"[index]
db_path = "{}/data/index.db"
schema_doc_path = "{}/data/schema.json"

[target]
url = "sqlite:{}/data/target.db"
"#,
        root.display(),
        root.display(),
        root.display()
    );

    let config_path = root.join("talkdb.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

/// Run `tdb` against the given config. The embedding/generation API key is
/// stripped from the environment so the suite behaves the same with or
/// without ambient credentials.
fn run_tdb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tdb_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tdb binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_writes_config() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("fresh").join("talkdb.toml");

    let (stdout, stderr, success) = run_tdb(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Wrote"));
    assert!(config_path.exists(), "init should create the config file");

    let written = fs::read_to_string(&config_path).unwrap();
    assert!(written.contains("[target]"));
    assert!(written.contains("[embedding]"));
}

#[test]
fn test_init_refuses_overwrite() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_tdb(&config_path, &["init"]);
    assert!(!success, "init over an existing config should fail");
    assert!(
        stderr.contains("config already exists"),
        "Should refuse to clobber, got: {}",
        stderr
    );
}

#[test]
fn test_status_before_refresh() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_tdb(&config_path, &["status"]);
    assert!(
        success,
        "status failed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(stdout.contains("SQLite"));
    assert!(stdout.contains("Schema document: none"));
    assert!(stdout.contains("Index: none"));

    // Reading status must not create the index store as a side effect.
    assert!(!tmp.path().join("data").join("index.db").exists());
}

#[test]
fn test_search_empty_question() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_tdb(&config_path, &["search", ""]);
    assert!(success, "Empty question should not panic");
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_requires_api_key() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_tdb(&config_path, &["search", "product names"]);
    assert!(!success, "search without an API key should fail");
    assert!(
        stderr.contains("OPENAI_API_KEY environment variable not set"),
        "Should name the missing variable, got: {}",
        stderr
    );
}

#[test]
fn test_refresh_requires_api_key() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_tdb(&config_path, &["refresh"]);
    assert!(!success, "refresh without an API key should fail");
    assert!(stderr.contains("OPENAI_API_KEY environment variable not set"));
}

#[test]
fn test_ask_requires_api_key() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_tdb(&config_path, &["ask", "how many products are there"]);
    assert!(!success, "ask without an API key should fail");
    assert!(stderr.contains("OPENAI_API_KEY environment variable not set"));
}

#[test]
fn test_refresh_rejects_unknown_progress_mode() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_tdb(&config_path, &["refresh", "--progress", "verbose"]);
    assert!(!success, "Unknown progress mode should fail");
    assert!(
        stderr.contains("invalid progress mode"),
        "Should mention the invalid mode, got: {}",
        stderr
    );
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("does-not-exist.toml");

    let (_, stderr, success) = run_tdb(&config_path, &["status"]);
    assert!(!success, "Missing config should fail");
    assert!(
        stderr.contains("Failed to read config file"),
        "Should report the unreadable config, got: {}",
        stderr
    );
}

#[test]
fn test_malformed_config_errors() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("talkdb.toml");
    fs::write(&config_path, "this is not [ valid toml").unwrap();

    let (_, stderr, success) = run_tdb(&config_path, &["status"]);
    assert!(!success, "Malformed config should fail");
    assert!(
        stderr.contains("Failed to parse config file"),
        "Should report the parse failure, got: {}",
        stderr
    );
}

#[test]
fn test_unsupported_target_scheme_errors() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("talkdb.toml");
    fs::write(
        &config_path,
        r#"[index]
db_path = "index.db"
schema_doc_path = "schema.json"

[target]
url = "mysql://localhost/shop"
"#,
    )
    .unwrap();

    let (_, stderr, success) = run_tdb(&config_path, &["status"]);
    assert!(!success, "Unsupported target scheme should fail");
    assert!(
        stderr.contains("target.url must start with"),
        "Should name the accepted schemes, got: {}",
        stderr
    );
}

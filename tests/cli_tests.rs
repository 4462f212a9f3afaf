//! CLI Integration Tests for Lekha
//!
//! Runs the built `lekha` binary for the init, config and run commands. The
//! run test points the binary at a mocked OpenAI-compatible server.

mod common;

use common::{article, claims_json, outline_json, seo_json, FACTS};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn lekha(args: &[&str], dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lekha"))
        .args(args)
        .arg("--no-color")
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run lekha binary")
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_command() {
    let dir = TempDir::new().unwrap();
    let output = lekha(&["--help"], dir.path());

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Lekha"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("init"));
    assert!(stdout.contains("config"));
}

#[test]
fn test_version_command() {
    let dir = TempDir::new().unwrap();
    let output = lekha(&["--version"], dir.path());

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

// =============================================================================
// Init Command Tests
// =============================================================================

#[test]
fn test_init_creates_project_files() {
    let dir = TempDir::new().unwrap();
    let output = lekha(&["init"], dir.path());

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(dir.path().join("lekha.toml").exists());
    assert!(dir.path().join(".env.example").exists());
    assert!(dir.path().join("data/sources.json").exists());
    assert!(dir.path().join("outputs").is_dir());
}

#[test]
fn test_init_keeps_existing_config_without_force() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("lekha.toml"), "# mine\n").unwrap();

    let output = lekha(&["init"], dir.path());
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("already exists"));
    assert_eq!(fs::read_to_string(dir.path().join("lekha.toml")).unwrap(), "# mine\n");

    let forced = lekha(&["init", "--force"], dir.path());
    assert!(forced.status.success());
    assert_ne!(fs::read_to_string(dir.path().join("lekha.toml")).unwrap(), "# mine\n");
}

// =============================================================================
// Config Command Tests
// =============================================================================

#[test]
fn test_config_validate_after_init() {
    let dir = TempDir::new().unwrap();
    assert!(lekha(&["init"], dir.path()).status.success());

    let output = lekha(&["config", "--validate", "--full"], dir.path());
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Configuration is valid"));
    assert!(stdout.contains("[pipeline]"));
}

#[test]
fn test_config_rejects_invalid_file() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("lekha.toml"), "[quality]\nmin_citation_coverage = 3.0\n").unwrap();

    let output = lekha(&["config"], dir.path());
    assert!(!output.status.success());
}

#[test]
fn test_run_requires_source_pack() {
    let dir = TempDir::new().unwrap();
    let output = lekha(&["run", "tides"], dir.path());
    assert!(!output.status.success());
}

// =============================================================================
// Run Command Tests
// =============================================================================

async fn mount_role(server: &MockServer, role: &str, content: String) {
    let body = json!({
        "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 100, "completion_tokens": 40, "total_tokens": 140}
    });
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains(format!("Your role: {}", role)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_run_exports_article_against_mock_server() {
    let server = MockServer::start().await;
    mount_role(&server, "Topic Planner", outline_json()).await;
    mount_role(&server, "Abstractive Summarizer", format!("{} [1].", FACTS[1])).await;
    mount_role(&server, "Claim Extractor", claims_json(0.9)).await;
    mount_role(
        &server,
        "Fact-Checker",
        json!({"verdict": "supported", "confidence": 0.9}).to_string(),
    )
    .await;
    mount_role(&server, "Narrative Writer", article(0)).await;
    mount_role(&server, "Style & QA Editor", article(0)).await;
    mount_role(&server, "SEO Specialist", seo_json()).await;

    let dir = TempDir::new().unwrap();
    let sources: Vec<_> = common::tide_sources()
        .into_iter()
        .map(|s| json!({"url": s.url, "title": s.title, "text": s.text}))
        .collect();
    fs::write(dir.path().join("sources.json"), serde_json::to_string(&sources).unwrap()).unwrap();
    fs::write(
        dir.path().join("lekha.toml"),
        format!(
            "[llm]\napi_base = \"{}/v1\"\napi_key_env = \"LEKHA_TEST_API_KEY\"\n\n[logging]\nlevel = \"warn\"\n",
            server.uri()
        ),
    )
    .unwrap();

    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_lekha"))
        .args(["run", "tides", "-s", "sources.json", "-o", "out", "--seed", "cli", "--no-color"])
        .current_dir(dir.path())
        .env("LEKHA_TEST_API_KEY", "test-key")
        .env_remove("RUST_LOG")
        .output()
        .await
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        stdout,
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("succeeded"));

    let run_dirs: Vec<_> = fs::read_dir(dir.path().join("out")).unwrap().collect();
    assert_eq!(run_dirs.len(), 1);
    let run_dir = run_dirs[0].as_ref().unwrap().path();
    let article = fs::read_to_string(run_dir.join("article.md")).unwrap();
    assert!(article.contains("# How Tides Work"));
    assert!(article.contains("## References"));

    let run: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(run_dir.join("run.json")).unwrap()).unwrap();
    assert_eq!(run["status"], "succeeded");
}

#[tokio::test]
async fn test_run_without_api_key_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("sources.json"), "[]").unwrap();
    fs::write(
        dir.path().join("lekha.toml"),
        "[llm]\napi_key_env = \"LEKHA_TEST_UNSET_KEY\"\n",
    )
    .unwrap();

    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_lekha"))
        .args(["run", "tides", "-s", "sources.json", "--no-color"])
        .current_dir(dir.path())
        .env_remove("LEKHA_TEST_UNSET_KEY")
        .output()
        .await
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("LEKHA_TEST_UNSET_KEY"));
}

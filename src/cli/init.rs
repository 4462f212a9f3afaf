//! Init command implementation
//!
//! Writes a default `lekha.toml`, `.env.example` and an example source pack.

use super::output::Output;
use crate::utils::toml_config::LekhaConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Result of the init operation
#[derive(Debug, PartialEq, Eq)]
pub enum InitResult {
    /// Initialization completed successfully
    Success,
    /// lekha.toml already exists and --force was not given
    AlreadyExists,
    /// An error occurred during initialization
    Error(String),
}

/// Configuration for the init command
pub struct InitConfig {
    /// Directory to initialize
    pub path: PathBuf,
    /// Overwrite existing files
    pub force: bool,
}

/// Run the init command
pub fn run(config: InitConfig, output: &Output) -> InitResult {
    output.banner();
    output.header("Initializing Lekha project");

    let base_path = &config.path;
    let config_path = base_path.join("lekha.toml");
    if config_path.exists() && !config.force {
        output.warning("lekha.toml already exists!");
        output.hint("Use --force to overwrite existing files");
        return InitResult::AlreadyExists;
    }

    for dir in ["data", "outputs"] {
        let dir_path = base_path.join(dir);
        if dir_path.exists() {
            output.skipped(dir, "already exists");
            continue;
        }
        if let Err(e) = fs::create_dir_all(&dir_path) {
            output.error(&format!("Failed to create {}: {}", dir, e));
            return InitResult::Error(e.to_string());
        }
        output.created_dir(dir);
    }

    let toml_content = match generate_lekha_toml() {
        Ok(content) => content,
        Err(e) => {
            output.error(&format!("Failed to render lekha.toml: {}", e));
            return InitResult::Error(e);
        }
    };

    let files = [
        ("config", config_path.clone(), toml_content),
        ("env", base_path.join(".env.example"), generate_env_example()),
        ("sources", base_path.join("data/sources.json"), generate_source_pack()),
    ];
    for (kind, path, content) in files {
        match write_file(&path, &content, config.force) {
            Ok(true) => output.created(kind, &path.display().to_string()),
            Ok(false) => output.skipped(&path.display().to_string(), "already exists"),
            Err(e) => {
                output.error(&format!("Failed to create {}: {}", path.display(), e));
                return InitResult::Error(e.to_string());
            }
        }
    }

    output.complete("Lekha project initialized");
    output.header("Next Steps");
    output.info("1. Set your API key:");
    output.command("cp .env.example .env");
    output.info("2. Run the pipeline against the example source pack:");
    output.command("lekha run \"tides\" --sources data/sources.json");

    InitResult::Success
}

/// Returns whether the file was written.
fn write_file(path: &Path, content: &str, force: bool) -> std::io::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    fs::write(path, content)?;
    Ok(true)
}

fn generate_lekha_toml() -> Result<String, String> {
    let body = LekhaConfig::default().to_toml_string().map_err(|e| e.to_string())?;
    Ok(format!(
        "# Lekha configuration\n\
         # Generated by: lekha init\n\
         #\n\
         # The API key is read from the environment variable named by llm.api_key_env.\n\
         # RUST_LOG overrides logging.level.\n\n{}",
        body
    ))
}

fn generate_env_example() -> String {
    "# Copy to .env and fill in\nGROQ_API_KEY=\n# RUST_LOG=lekha=debug\n".to_string()
}

fn generate_source_pack() -> String {
    r#"[
  {
    "url": "https://oceanservice.noaa.gov/education/tutorial_tides/",
    "title": "Tides and Water Levels",
    "author": "NOAA",
    "text": "Tides are very long-period waves that move through the oceans in response to the forces exerted by the moon and sun. The gravitational pull of the moon is the main force behind tides."
  },
  {
    "url": "https://en.wikipedia.org/wiki/Tide",
    "title": "Tide",
    "text": "Tides are the rise and fall of sea levels caused by the combined effects of the gravitational forces exerted by the Moon and the Sun and the rotation of the Earth. Most places experience two high tides each day."
  }
]
"#
    .to_string()
}

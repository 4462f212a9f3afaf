//! Colored output helpers for CLI
//!
//! Provides consistent, colored terminal output for the Lekha CLI.

use crate::types::{QualityReport, RunStatus, Verdict};
use owo_colors::OwoColorize;

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    /// Print the Lekha banner
    pub fn banner(&self) {
        let version = format!("v{}", env!("CARGO_PKG_VERSION"));
        if self.colored {
            println!(
                "\n   {} {}\n   {}\n",
                "lekha".bright_cyan().bold(),
                version.dimmed(),
                "research -> cited article".bright_white()
            );
        } else {
            println!("\n   lekha {}\n   research -> cited article\n", version);
        }
    }

    /// Print a success message with a checkmark
    pub fn success(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "✓".green().bold(), message.green());
        } else {
            println!("  [OK] {}", message);
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print a file creation message
    pub fn created(&self, file_type: &str, path: &str) {
        if self.colored {
            println!("  {} {} {}", "✓".green().bold(), file_type.dimmed(), path.bright_white());
        } else {
            println!("  [CREATED] {} {}", file_type, path);
        }
    }

    /// Print a file skipped message
    pub fn skipped(&self, path: &str, reason: &str) {
        if self.colored {
            println!("  {} {} {}", "○".yellow(), path.dimmed(), format!("({})", reason).yellow());
        } else {
            println!("  [SKIPPED] {} ({})", path, reason);
        }
    }

    /// Print a directory creation message
    pub fn created_dir(&self, path: &str) {
        self.created("directory", path);
    }

    /// Print a header for a section
    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    /// Print a list item
    pub fn list_item(&self, item: &str) {
        if self.colored {
            println!("    {} {}", "•".blue(), item);
        } else {
            println!("    - {}", item);
        }
    }

    /// Print a hint/tip message
    pub fn hint(&self, message: &str) {
        if self.colored {
            println!("\n  {}", message.dimmed().italic());
        } else {
            println!("\n  [TIP] {}", message);
        }
    }

    /// Print a command suggestion
    pub fn command(&self, cmd: &str) {
        if self.colored {
            println!("     {}", format!("$ {}", cmd).bright_cyan());
        } else {
            println!("     $ {}", cmd);
        }
    }

    /// Print completion message
    pub fn complete(&self, message: &str) {
        if self.colored {
            println!("\n  {}", message.bright_green().bold());
        } else {
            println!("\n  [DONE] {}", message);
        }
    }

    /// Print a run's terminal status
    pub fn status(&self, status: RunStatus) {
        let label = status_label(status);
        match (self.colored, status) {
            (false, _) => println!("  [STATUS] {}", label),
            (true, RunStatus::Succeeded) => println!("  {}", label.green().bold()),
            (true, RunStatus::Running) => println!("  {}", label.blue().bold()),
            (true, _) => println!("  {}", label.red().bold()),
        }
    }

    /// Print the gate metrics of a quality report
    pub fn report(&self, report: &QualityReport) {
        self.header(&format!(
            "Quality report (attempt {}/{})",
            report.attempt, report.max_attempts
        ));
        for check in &report.checks {
            let mark = match (check.passed, check.advisory) {
                (true, _) => "pass",
                (false, true) => "advisory",
                (false, false) => "FAIL",
            };
            self.kv(
                &check.name,
                &format!("{:.3} (threshold {:.3}) {}", check.value, check.threshold, mark),
            );
        }
        self.kv("unknown markers", &report.unknown_marker_count.to_string());
        self.kv("verdict", verdict_label(report.verdict));
        for reason in &report.failure_reasons {
            self.list_item(reason);
        }
        for recommendation in &report.recommendations {
            self.list_item(recommendation);
        }
    }
}

pub fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Succeeded => "succeeded",
        RunStatus::FailedQuality => "failed (quality)",
        RunStatus::FailedFatal => "failed (fatal)",
    }
}

fn verdict_label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Pass => "pass",
        Verdict::Retry => "retry",
        Verdict::Reject => "reject",
    }
}

//! Step-by-step deploy progress output
//!
//! Lines go through `tracing` so they share the subscriber's timestamps and
//! filtering. Under GitHub Actions, workflow commands (`::group::`,
//! `::error::`) are printed to stdout as well so the job log folds per
//! service and failures surface as annotations.

use colored::Colorize;
use tracing::{error, info};

/// Environment variable GitHub Actions sets to `true`
pub const GITHUB_ACTIONS_ENV: &str = "GITHUB_ACTIONS";

const RULE_WIDTH: usize = 45;

/// Progress reporter
#[derive(Debug, Clone, Default)]
pub struct Progress {
    github_actions: bool,
}

impl Progress {
    pub fn new(github_actions: bool) -> Self {
        Self { github_actions }
    }

    pub fn info(&self, msg: &str) {
        info!("{}", msg);
    }

    /// Section header, opens a log group in CI
    pub fn header(&self, title: &str) {
        if self.github_actions {
            println!("::group::{}", title);
        }
        info!("{}", rule(title));
    }

    /// Section footer, closes the log group in CI
    pub fn footer(&self, title: &str) {
        info!("{}", rule(title));
        if self.github_actions {
            println!("::endgroup::");
        }
    }

    pub fn service_start(&self, name: &str) {
        if self.github_actions {
            println!("::group::{}", name);
        }
        info!("▸ {}", name.bold());
    }

    pub fn service_end(&self) {
        if self.github_actions {
            println!("::endgroup::");
        }
    }

    pub fn step(&self, msg: &str) {
        info!("  {}", msg);
    }

    pub fn success(&self, msg: &str) {
        info!("  {} {}", "✓".green(), msg);
    }

    pub fn failure(&self, msg: &str) {
        if self.github_actions {
            println!("::error::{}", msg);
        }
        error!("  {} {}", "✗".red(), msg);
    }

    /// Run-level error, outside any service block
    pub fn error(&self, msg: &str) {
        if self.github_actions {
            println!("::error::{}", msg);
        }
        error!("{}", msg);
    }
}

pub fn is_github_actions() -> bool {
    std::env::var(GITHUB_ACTIONS_ENV).is_ok_and(|v| v == "true")
}

fn rule(title: &str) -> String {
    let fill = RULE_WIDTH.saturating_sub(title.chars().count());
    format!("── {} {}", title, "─".repeat(fill))
}

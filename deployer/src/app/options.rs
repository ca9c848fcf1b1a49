//! Deploy configuration options

use std::path::Path;

use crate::deploy::compose::CommandPrefix;
use crate::deploy::docker::DEFAULT_STOP_TIMEOUT;
use crate::progress::is_github_actions;
use crate::storage::layout::StateLayout;

/// Tag used when neither an explicit tag nor history is available
pub const FALLBACK_TAG: &str = "latest";

/// Options shared by every command
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Lock and tag history locations
    pub layout: StateLayout,

    /// Compose and provider command prefixes
    pub commands: CommandPrefix,

    /// Tag deployed when no tag is given and the history is empty
    pub fallback_tag: String,

    /// Grace period in seconds when stopping a failed new container
    pub rollback_stop_timeout: u64,

    /// Emit GitHub Actions workflow commands
    pub github_actions: bool,
}

impl DeployOptions {
    /// Options for a project directory, resolving the compose command and
    /// CI detection from the environment
    pub fn for_project(project_dir: &Path) -> Self {
        Self {
            layout: StateLayout::new(project_dir),
            commands: CommandPrefix::from_env(project_dir),
            github_actions: is_github_actions(),
            ..Default::default()
        }
    }
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            layout: StateLayout::default(),
            commands: CommandPrefix::default(),
            fallback_tag: FALLBACK_TAG.to_string(),
            rollback_stop_timeout: DEFAULT_STOP_TIMEOUT,
            github_actions: false,
        }
    }
}

/// A single deploy request
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    /// Image tag; defaults to the current tag from history
    pub tag: Option<String>,

    /// Restrict the deploy to these services
    pub services: Option<Vec<String>>,

    /// Describe the deploy without executing it
    pub dry_run: bool,
}

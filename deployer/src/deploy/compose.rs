//! Docker Compose command resolution and execution

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::deploy::gateway::{ExecOutput, Gateway, Invocation};
use crate::errors::DeployError;
use crate::models::service::ComposeProject;

/// Environment variable overriding the compose command
pub const COMPOSE_COMMAND_ENV: &str = "COMPOSE_COMMAND";

/// Project-local wrapper script used when present and executable
pub const PROD_SCRIPT: &str = "script/prod";

/// Environment variable carrying the deploy tag into compose interpolation
pub const DEPLOY_TAG_ENV: &str = "DEPLOY_TAG";

/// Command prefixes for compose-level and provider-level commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPrefix {
    /// e.g. `docker compose`
    pub compose: Vec<String>,

    /// e.g. `docker`
    pub provider: Vec<String>,
}

impl CommandPrefix {
    /// Resolve the compose prefix for `project_dir` from the environment
    pub fn from_env(project_dir: &Path) -> Self {
        let env_override = std::env::var(COMPOSE_COMMAND_ENV).ok();
        Self {
            compose: resolve_compose_command(env_override.as_deref(), project_dir),
            ..Default::default()
        }
    }
}

impl Default for CommandPrefix {
    fn default() -> Self {
        Self {
            compose: vec!["docker".to_string(), "compose".to_string()],
            provider: vec!["docker".to_string()],
        }
    }
}

/// Resolve the compose command.
///
/// Order: explicit override (whitespace split), then `script/prod` if it is
/// an executable file, then `docker compose`.
pub fn resolve_compose_command(env_override: Option<&str>, project_dir: &Path) -> Vec<String> {
    if let Some(cmd) = env_override {
        let parts: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
        if !parts.is_empty() {
            return parts;
        }
    }

    let script = project_dir.join(PROD_SCRIPT);
    if is_executable(&script) {
        return vec![script.to_string_lossy().into_owned()];
    }

    CommandPrefix::default().compose
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Compose-level operations for one project
#[derive(Clone)]
pub struct ComposeClient {
    gateway: Arc<dyn Gateway>,
    prefix: Vec<String>,
}

impl ComposeClient {
    pub fn new(gateway: Arc<dyn Gateway>, prefix: Vec<String>) -> Self {
        Self { gateway, prefix }
    }

    /// Invocation for `args` with the compose prefix
    pub fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(&self.prefix, args)
    }

    /// Run `<compose> config` and parse the merged document
    pub async fn config(&self) -> Result<ComposeProject, DeployError> {
        let output = self.gateway.execute(&self.invocation(["config"])).await?;
        if !output.success() {
            return Err(DeployError::ComposeError(format!(
                "compose config failed: {}",
                output.stderr.trim()
            )));
        }
        crate::deploy::registry::parse_project(&output.stdout)
    }

    /// Pull images for `service` at `tag`
    pub async fn pull(&self, service: &str, tag: &str) -> Result<ExecOutput, DeployError> {
        self.run_tagged(["pull", service], tag).await
    }

    /// Start a second instance without touching the running one
    pub async fn scale_up(&self, service: &str, tag: &str) -> Result<ExecOutput, DeployError> {
        let scale = format!("{}=2", service);
        self.run_tagged(
            ["up", "-d", "--no-deps", "--no-recreate", "--scale", scale.as_str(), service],
            tag,
        )
        .await
    }

    /// Return `service` to a single instance
    pub async fn scale_back(&self, service: &str, tag: &str) -> Result<ExecOutput, DeployError> {
        let scale = format!("{}=1", service);
        self.run_tagged(["up", "-d", "--no-deps", "--scale", scale.as_str(), service], tag)
            .await
    }

    /// Run a command inside a service container with inherited stdio
    pub async fn exec(&self, service: &str, command: &[String]) -> Result<i32, DeployError> {
        let mut args = vec!["exec".to_string(), service.to_string()];
        args.extend(command.iter().cloned());
        self.gateway.execute_interactive(&self.invocation(args)).await
    }

    /// Stream service logs with inherited stdio
    pub async fn logs(
        &self,
        service: &str,
        follow: bool,
        tail: Option<u32>,
    ) -> Result<i32, DeployError> {
        let mut args = vec!["logs".to_string()];
        if follow {
            args.push("--follow".to_string());
        }
        if let Some(n) = tail {
            args.push("--tail".to_string());
            args.push(n.to_string());
        }
        args.push(service.to_string());
        self.gateway.execute_interactive(&self.invocation(args)).await
    }

    async fn run_tagged<const N: usize>(
        &self,
        args: [&str; N],
        tag: &str,
    ) -> Result<ExecOutput, DeployError> {
        let invocation = self.invocation(args).with_env(DEPLOY_TAG_ENV, tag);
        debug!("compose: {}", invocation.display());
        self.gateway.execute(&invocation).await
    }
}

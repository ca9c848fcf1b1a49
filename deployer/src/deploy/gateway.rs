//! Execution gateway: the single seam for external commands

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeployError;

/// A command line plus extra environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Build an invocation from a command prefix and arguments
    pub fn new<I, S>(prefix: &[String], args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = prefix.to_vec();
        argv.extend(args.into_iter().map(Into::into));
        Self {
            argv,
            env: Vec::new(),
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The command line as a single string, for logs and errors
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Buffered result of a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external commands on behalf of the deploy engine
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Run a command and capture its output
    async fn execute(&self, invocation: &Invocation) -> Result<ExecOutput, DeployError>;

    /// Run a command with inherited stdio and return its exit code
    async fn execute_interactive(&self, invocation: &Invocation) -> Result<i32, DeployError>;
}

/// Gateway backed by real child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessGateway {
    working_dir: Option<PathBuf>,
}

impl ProcessGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command from `dir`
    pub fn with_working_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }

    fn command(&self, invocation: &Invocation) -> Result<Command, DeployError> {
        let (program, args) = invocation
            .argv
            .split_first()
            .ok_or_else(|| DeployError::Internal("empty command line".to_string()))?;

        let mut command = Command::new(program);
        command.args(args);
        command.envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        Ok(command)
    }
}

#[async_trait]
impl Gateway for ProcessGateway {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecOutput, DeployError> {
        debug!("Running: {}", invocation.display());

        let output = self
            .command(invocation)?
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| DeployError::Spawn {
                command: invocation.display(),
                source,
            })?;

        Ok(ExecOutput {
            // Killed by a signal: report as a generic failure
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn execute_interactive(&self, invocation: &Invocation) -> Result<i32, DeployError> {
        debug!("Running (interactive): {}", invocation.display());

        let status = self
            .command(invocation)?
            .status()
            .await
            .map_err(|source| DeployError::Spawn {
                command: invocation.display(),
                source,
            })?;

        Ok(status.code().unwrap_or(-1))
    }
}

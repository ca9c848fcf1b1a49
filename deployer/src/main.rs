//! flow-deploy - Entry Point
//!
//! Rolling, health-checked deploys of Docker Compose services.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use flow_deploy::app::options::{DeployOptions, DeployRequest};
use flow_deploy::app::run::{Deployer, RunStatus};
use flow_deploy::deploy::gateway::ProcessGateway;
use flow_deploy::deploy::hosts::{discover_hosts, HostOverrides};
use flow_deploy::logs::{init_logging, LogLevel, LogOptions};
use flow_deploy::utils::LONG_VERSION;

#[derive(Debug, Parser)]
#[command(name = "flow-deploy", version, long_version = LONG_VERSION)]
#[command(about = "Zero-downtime rolling deploys for Docker Compose services")]
struct Cli {
    /// Log level, overridden by FLOW_DEPLOY_LOG
    #[arg(
        long,
        global = true,
        value_enum,
        ignore_case = true,
        env = "FLOW_DEPLOY_LOG_LEVEL",
        default_value_t = LogLevel::Info
    )]
    log_level: LogLevel,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Compose project directory
    #[arg(long, global = true, env = "FLOW_DEPLOY_DIR")]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Roll app services to a new image tag
    Deploy(DeployArgs),

    /// Redeploy the previous tag from history
    Rollback {
        /// Only roll back these services
        #[arg(long = "service", short = 's')]
        services: Vec<String>,
    },

    /// Show the current tag, lock, and container health
    Status,

    /// Run a command inside a service container
    Exec {
        service: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Show service logs
    Logs {
        service: String,

        /// Follow log output
        #[arg(long, short = 'f')]
        follow: bool,

        /// Number of lines from the end
        #[arg(long, short = 'n')]
        tail: Option<u32>,
    },

    /// Print app services grouped by deploy host as JSON
    DiscoverHosts,
}

#[derive(Debug, Args)]
struct DeployArgs {
    /// Image tag; defaults to the current tag from history
    #[arg(long, short = 't')]
    tag: Option<String>,

    /// Only deploy these services
    #[arg(long = "service", short = 's')]
    services: Vec<String>,

    /// Print the plan without executing it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_options = LogOptions {
        log_level: cli.log_level,
        json_format: cli.json_logs,
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            RunStatus::Failure.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let project_dir = match cli.project_dir {
        Some(dir) => std::path::absolute(&dir)
            .with_context(|| format!("Invalid project directory {}", dir.display()))?,
        None => env::current_dir().context("Unable to resolve the working directory")?,
    };
    let options = DeployOptions::for_project(&project_dir);
    let gateway = Arc::new(ProcessGateway::with_working_dir(project_dir.clone()));
    let deployer = Deployer::new(gateway, options);

    let code = match cli.command {
        Command::Deploy(args) => {
            let request = DeployRequest {
                tag: args.tag.map(|tag| tag.trim().to_string()),
                services: non_empty(args.services),
                dry_run: args.dry_run,
            };
            deployer
                .deploy(&request, await_shutdown_signal())
                .await
                .exit_code()
        }
        Command::Rollback { services } => deployer
            .rollback(non_empty(services), await_shutdown_signal())
            .await
            .exit_code(),
        Command::Status => {
            deployer.status().await?;
            RunStatus::Success.exit_code()
        }
        Command::Exec { service, command } => {
            if command.is_empty() {
                error!("No command given for {}", service);
                return Ok(RunStatus::Failure.exit_code());
            }
            deployer.compose().exec(&service, &command).await?
        }
        Command::Logs {
            service,
            follow,
            tail,
        } => deployer.compose().logs(&service, follow, tail).await?,
        Command::DiscoverHosts => {
            let project = deployer.compose().config().await?;
            let groups = discover_hosts(&project, &HostOverrides::from_env())?;
            println!("{}", serde_json::to_string(&groups)?);
            RunStatus::Success.exit_code()
        }
    };

    Ok(code)
}

fn non_empty(services: Vec<String>) -> Option<Vec<String>> {
    if services.is_empty() {
        None
    } else {
        Some(services)
    }
}

/// Resolves on the first SIGINT or SIGTERM. The listeners live only as long
/// as the returned future.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return std::future::pending().await;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return std::future::pending().await;
        }
        info!("Ctrl+C received, shutting down...");
    }
}

//! Deploy orchestration: lock, per-service upgrades, tag history

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{error, info};

use crate::app::options::{DeployOptions, DeployRequest};
use crate::deploy::compose::ComposeClient;
use crate::deploy::docker::DockerClient;
use crate::deploy::gateway::Gateway;
use crate::deploy::registry::validate_healthchecks;
use crate::deploy::upgrade::ServiceUpgrader;
use crate::models::service::ServiceDescriptor;
use crate::progress::Progress;
use crate::storage::lock::DeployLock;
use crate::storage::tags::{validate_tag, TagLedger};
use crate::utils::format_secs;

/// Final status of a deploy or rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
    /// Another live process holds the deploy lock
    Locked,
}

impl RunStatus {
    /// Process exit code: 0 success, 1 failure, 2 locked
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failure => 1,
            RunStatus::Locked => 2,
        }
    }
}

/// Top-level deploy driver
pub struct Deployer {
    pub(crate) compose: ComposeClient,
    pub(crate) docker: DockerClient,
    pub(crate) lock: DeployLock,
    pub(crate) ledger: TagLedger,
    pub(crate) progress: Progress,
    options: DeployOptions,
}

impl Deployer {
    pub fn new(gateway: Arc<dyn Gateway>, options: DeployOptions) -> Self {
        Self {
            compose: ComposeClient::new(gateway.clone(), options.commands.compose.clone()),
            docker: DockerClient::new(gateway, options.commands.provider.clone()),
            lock: DeployLock::new(options.layout.lock_file()),
            ledger: TagLedger::new(options.layout.tag_file()),
            progress: Progress::new(options.github_actions),
            options,
        }
    }

    pub fn compose(&self) -> &ComposeClient {
        &self.compose
    }

    pub fn lock(&self) -> &DeployLock {
        &self.lock
    }

    pub fn ledger(&self) -> &TagLedger {
        &self.ledger
    }

    /// Rolling deploy of the selected app services.
    ///
    /// `shutdown` resolving aborts the run between or during steps; the lock
    /// is released on every path.
    pub async fn deploy(
        &self,
        request: &DeployRequest,
        shutdown: impl Future<Output = ()>,
    ) -> RunStatus {
        let project = match self.compose.config().await {
            Ok(project) => project,
            Err(e) => {
                self.progress.error(&e.to_string());
                return RunStatus::Failure;
            }
        };

        let mut services = project.app_services(request.services.as_deref());
        if services.is_empty() {
            self.progress.error("No app services to deploy");
            return RunStatus::Failure;
        }
        services.sort_by_key(|s| (s.order, s.file_order));

        let missing = validate_healthchecks(&services);
        if !missing.is_empty() {
            self.progress.error(&format!(
                "Services missing healthcheck: {}",
                missing.join(", ")
            ));
            return RunStatus::Failure;
        }

        let tag = match &request.tag {
            Some(tag) => tag.clone(),
            None => match self.ledger.current().await {
                Ok(current) => current.unwrap_or_else(|| self.options.fallback_tag.clone()),
                Err(e) => {
                    self.progress
                        .error(&format!("Failed to read tag history: {}", e));
                    return RunStatus::Failure;
                }
            },
        };
        if let Err(e) = validate_tag(&tag) {
            self.progress.error(&e.to_string());
            return RunStatus::Failure;
        }

        if request.dry_run {
            self.dry_run(&tag, &services);
            return RunStatus::Success;
        }

        let guard = match self.lock.try_lock().await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                let holder = self
                    .lock
                    .read_holder()
                    .await
                    .map(|h| h.pid.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                self.progress
                    .error(&format!("Deploy lock held by PID {}", holder));
                return RunStatus::Locked;
            }
            Err(e) => {
                self.progress
                    .error(&format!("Failed to acquire deploy lock: {}", e));
                return RunStatus::Failure;
            }
        };

        let status = tokio::select! {
            status = self.run_services(&tag, &services, project.name.as_deref()) => status,
            _ = shutdown => {
                self.progress.error("Interrupted, aborting deploy");
                self.progress.footer("FAILED (interrupted)");
                RunStatus::Failure
            }
        };

        if let Err(e) = guard.release().await {
            error!("Failed to release deploy lock: {}", e);
        }
        status
    }

    /// Redeploy the previous tag from history
    pub async fn rollback(
        &self,
        services: Option<Vec<String>>,
        shutdown: impl Future<Output = ()>,
    ) -> RunStatus {
        let previous = match self.ledger.previous().await {
            Ok(Some(tag)) => tag,
            Ok(None) => {
                self.progress.error("No previous tag to rollback to");
                return RunStatus::Failure;
            }
            Err(e) => {
                self.progress
                    .error(&format!("Failed to read tag history: {}", e));
                return RunStatus::Failure;
            }
        };

        self.progress
            .info(&format!("Rolling back to tag: {}", previous));
        let request = DeployRequest {
            tag: Some(previous),
            services,
            dry_run: false,
        };
        self.deploy(&request, shutdown).await
    }

    async fn run_services(
        &self,
        tag: &str,
        services: &[ServiceDescriptor],
        project: Option<&str>,
    ) -> RunStatus {
        let names = service_names(services);
        self.progress.header("deploy");
        self.progress.info(&format!("tag: {}", tag));
        self.progress.info(&format!("services: {}", names));

        let started = Instant::now();
        let upgrader = ServiceUpgrader::new(
            &self.compose,
            &self.docker,
            &self.progress,
            project,
            self.options.rollback_stop_timeout,
        );

        for svc in services {
            let outcome = upgrader.upgrade(svc, tag).await;
            if !outcome.succeeded() {
                info!("Deploy aborted: {}", outcome.message);
                self.progress.footer("FAILED (deploy aborted)");
                return RunStatus::Failure;
            }
        }

        if let Err(e) = self.ledger.append(tag).await {
            self.progress
                .error(&format!("Deployed, but failed to record tag {}: {}", tag, e));
            self.progress.footer("FAILED (tag history not updated)");
            return RunStatus::Failure;
        }

        self.progress
            .footer(&format!("complete ({})", format_secs(started.elapsed())));
        RunStatus::Success
    }

    fn dry_run(&self, tag: &str, services: &[ServiceDescriptor]) {
        self.progress.header("deploy (dry-run)");
        self.progress.info(&format!("tag: {}", tag));
        self.progress
            .info(&format!("services: {}", service_names(services)));

        for svc in services {
            self.progress.service_start(&svc.name);
            self.progress
                .step(&format!("would pull {}:{}", svc.display_image(), tag));
            self.progress.step(&format!(
                "would scale to 2, health check (timeout: {}s)",
                svc.healthcheck_timeout
            ));
            self.progress
                .step(&format!("would drain old container ({}s timeout)", svc.drain));
            self.progress.step("would scale back to 1");
            self.progress.service_end();
        }

        self.progress.footer("dry-run complete");
    }
}

fn service_names(services: &[ServiceDescriptor]) -> String {
    services
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

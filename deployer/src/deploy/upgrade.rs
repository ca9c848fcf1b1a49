//! Rolling upgrade of a single service
//!
//! Pull, scale to two, identify the new container, wait for it to report
//! healthy, then either drain the old one (cutover) or remove the new one
//! (rollback). Every path ends with the service scaled back to one instance,
//! except a failed pull or scale-up where nothing was started.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::deploy::compose::ComposeClient;
use crate::deploy::docker::DockerClient;
use crate::deploy::fsm::{UpgradeEvent, UpgradeFsm, UpgradeState};
use crate::deploy::gateway::ExecOutput;
use crate::deploy::resolver::identify;
use crate::errors::DeployError;
use crate::models::container::{short_id, HealthStatus};
use crate::models::service::ServiceDescriptor;
use crate::progress::Progress;
use crate::utils::format_secs;

/// Lower bound on the health poll interval
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline offset used when `now + timeout` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Result of one service upgrade
#[derive(Debug, Clone)]
pub struct UpgradeOutcome {
    pub service: String,
    pub state: UpgradeState,
    pub message: String,
    pub elapsed: Duration,
}

impl UpgradeOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == UpgradeState::Done
    }
}

/// Drives services through the upgrade state machine
pub struct ServiceUpgrader<'a> {
    compose: &'a ComposeClient,
    docker: &'a DockerClient,
    progress: &'a Progress,
    project: Option<&'a str>,
    rollback_stop_timeout: u64,
}

impl<'a> ServiceUpgrader<'a> {
    pub fn new(
        compose: &'a ComposeClient,
        docker: &'a DockerClient,
        progress: &'a Progress,
        project: Option<&'a str>,
        rollback_stop_timeout: u64,
    ) -> Self {
        Self {
            compose,
            docker,
            progress,
            project,
            rollback_stop_timeout,
        }
    }

    /// Upgrade `svc` to `tag`. Never fails past this point: every error is
    /// folded into the outcome.
    pub async fn upgrade(&self, svc: &ServiceDescriptor, tag: &str) -> UpgradeOutcome {
        self.progress.service_start(&svc.name);
        let started = Instant::now();
        let mut fsm = UpgradeFsm::new();

        let result = self.drive(svc, tag, &mut fsm, started).await;
        let elapsed = started.elapsed();

        let (state, message) = match result {
            Ok(()) if fsm.state() == UpgradeState::Done => {
                let message = format!("{} deployed ({})", svc.name, format_secs(elapsed));
                self.progress.success(&message);
                (UpgradeState::Done, message)
            }
            Ok(()) => {
                // Already reported by the failing step
                let reason = fsm.error().unwrap_or("upgrade failed").to_string();
                (UpgradeState::Failed, format!("{}: {}", svc.name, reason))
            }
            Err(e) => {
                error!("Upgrade of {} aborted: {}", svc.name, e);
                self.progress.failure(&format!("{} FAILED", svc.name));
                (UpgradeState::Failed, format!("{}: {}", svc.name, e))
            }
        };

        self.progress.service_end();
        UpgradeOutcome {
            service: svc.name.clone(),
            state,
            message,
            elapsed,
        }
    }

    async fn drive(
        &self,
        svc: &ServiceDescriptor,
        tag: &str,
        fsm: &mut UpgradeFsm,
        started: Instant,
    ) -> Result<(), DeployError> {
        // 1. Pull
        self.progress
            .step(&format!("pulling {}:{}...", svc.display_image(), tag));
        let pull_started = Instant::now();
        if let Err(reason) = checked(self.compose.pull(&svc.name, tag).await) {
            return self.fail(fsm, format!("pull failed: {}", reason));
        }
        self.progress
            .step(&format!("pulled ({})", format_secs(pull_started.elapsed())));

        // 2. Scale to two without recreating the running instance
        self.progress.step("starting new container...");
        if let Err(reason) = checked(self.compose.scale_up(&svc.name, tag).await) {
            return self.fail(fsm, format!("scale up failed: {}", reason));
        }
        fsm.process(UpgradeEvent::ScaledUp)?;

        // 3. Tell old from new
        let containers = self.docker.list_containers(&svc.name, self.project).await;
        if containers.len() != 2 {
            let reason = format!("expected 2 containers, found {}", containers.len());
            self.scale_back(svc, tag).await;
            return self.fail(fsm, reason);
        }
        let Some((old, new)) = identify(&containers, tag) else {
            self.scale_back(svc, tag).await;
            return self.fail(fsm, "could not identify old/new containers".to_string());
        };
        debug!(
            "{}: old={} ({}), new={} ({})",
            svc.name, old.id, old.image, new.id, new.image
        );
        fsm.process(UpgradeEvent::Resolved)?;

        // 4. Health check
        self.progress.step(&format!(
            "waiting for health check (timeout: {}s)...",
            svc.healthcheck_timeout
        ));
        let healthy = wait_for_healthy(
            self.docker,
            &new.id,
            Duration::from_secs(svc.healthcheck_timeout),
            Duration::from_secs(svc.healthcheck_poll),
        )
        .await;

        if healthy {
            fsm.process(UpgradeEvent::HealthPassed)?;
            self.progress
                .step(&format!("healthy ({})", format_secs(started.elapsed())));

            // 5a. Cutover: the new container stays regardless of cleanup results
            fsm.process(UpgradeEvent::StartCutover)?;
            self.progress.step(&format!(
                "draining old container ({}, {}s timeout)...",
                short_id(&old.id, 7),
                svc.drain
            ));
            if !self.docker.stop(&old.id, svc.drain).await {
                warn!("{}: failed to stop old container {}", svc.name, old.id);
            }
            if !self.docker.remove(&old.id).await {
                warn!("{}: failed to remove old container {}", svc.name, old.id);
            }
            self.scale_back(svc, tag).await;
            fsm.process(UpgradeEvent::CutoverComplete)?;
        } else {
            fsm.process(UpgradeEvent::HealthFailed)?;
            self.progress.step("health check failed");

            // 5b. Rollback: the old container never stopped serving
            fsm.process(UpgradeEvent::StartRollback)?;
            self.progress.step(&format!(
                "rolling back: stopping new container ({})...",
                short_id(&new.id, 7)
            ));
            if !self.docker.stop(&new.id, self.rollback_stop_timeout).await {
                warn!("{}: failed to stop new container {}", svc.name, new.id);
            }
            if !self.docker.remove(&new.id).await {
                warn!("{}: failed to remove new container {}", svc.name, new.id);
            }
            self.scale_back(svc, tag).await;
            self.progress
                .step("rollback complete, old container still serving");
            fsm.process(UpgradeEvent::RollbackComplete)?;
            self.progress.failure(&format!("{} FAILED", svc.name));
        }

        Ok(())
    }

    fn fail(&self, fsm: &mut UpgradeFsm, reason: String) -> Result<(), DeployError> {
        self.progress.failure(&reason);
        fsm.process(UpgradeEvent::StepFailed(reason))?;
        Ok(())
    }

    /// Best effort: a failure here is logged, not acted on
    async fn scale_back(&self, svc: &ServiceDescriptor, tag: &str) {
        if let Err(reason) = checked(self.compose.scale_back(&svc.name, tag).await) {
            warn!("{}: scale back to 1 failed: {}", svc.name, reason);
        }
    }
}

/// Map a gateway result to `Err(reason)` on spawn failure or non-zero exit
fn checked(result: Result<ExecOutput, DeployError>) -> Result<ExecOutput, String> {
    match result {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => {
            let stderr = output.stderr.trim();
            if stderr.is_empty() {
                Err(format!("exit code {}", output.exit_code))
            } else {
                Err(stderr.to_string())
            }
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Poll container health until healthy, unhealthy, or `timeout` elapses.
///
/// Failed queries count as "not yet healthy". Returns `true` only for an
/// explicit healthy report.
pub async fn wait_for_healthy(
    docker: &DockerClient,
    container_id: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> bool {
    let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
    let now = Instant::now();
    let deadline = now
        .checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE);

    while Instant::now() < deadline {
        match docker.health(container_id).await {
            HealthStatus::Healthy => return true,
            HealthStatus::Unhealthy => return false,
            status => debug!("{} health: {}", container_id, status),
        }
        let next_poll = Instant::now()
            .checked_add(poll_interval)
            .map_or(deadline, |at| at.min(deadline));
        tokio::time::sleep_until(next_poll).await;
    }

    false
}

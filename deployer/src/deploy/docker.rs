//! Provider-level container operations: list, inspect, stop, remove

use std::sync::Arc;

use tracing::{debug, warn};

use crate::deploy::gateway::{Gateway, Invocation};
use crate::models::container::{ContainerObservation, HealthStatus};

/// Default grace period for `docker stop`, in seconds
pub const DEFAULT_STOP_TIMEOUT: u64 = 30;

/// Container operations against the provider CLI
#[derive(Clone)]
pub struct DockerClient {
    gateway: Arc<dyn Gateway>,
    prefix: Vec<String>,
}

impl DockerClient {
    pub fn new(gateway: Arc<dyn Gateway>, prefix: Vec<String>) -> Self {
        Self { gateway, prefix }
    }

    /// Running containers for `service`, optionally scoped to a compose project.
    ///
    /// Command failures and unparsable lines yield no containers; callers
    /// treat a wrong count as fatal anyway.
    pub async fn list_containers(
        &self,
        service: &str,
        project: Option<&str>,
    ) -> Vec<ContainerObservation> {
        let mut args = vec![
            "ps".to_string(),
            "--filter".to_string(),
            format!("label=com.docker.compose.service={}", service),
        ];
        if let Some(project) = project.filter(|p| !p.is_empty()) {
            args.push("--filter".to_string());
            args.push(format!("label=com.docker.compose.project={}", project));
        }
        args.extend(
            ["--filter", "status=running", "--format", "{{json .}}"]
                .into_iter()
                .map(str::to_string),
        );

        let output = match self.gateway.execute(&Invocation::new(&self.prefix, args)).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                warn!("docker ps failed for {}: {}", service, output.stderr.trim());
                return Vec::new();
            }
            Err(e) => {
                warn!("docker ps failed for {}: {}", service, e);
                return Vec::new();
            }
        };

        let mut containers = Vec::new();
        for line in output.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<ContainerObservation>(line) {
                Ok(container) => containers.push(container),
                Err(e) => warn!("Skipping unparsable docker ps line: {}", e),
            }
        }
        debug!("Found {} running container(s) for {}", containers.len(), service);
        containers
    }

    /// Current health of a container. Query failures report `Unknown`.
    pub async fn health(&self, container_id: &str) -> HealthStatus {
        let invocation = Invocation::new(
            &self.prefix,
            ["inspect", "--format", "{{.State.Health.Status}}", container_id],
        );
        match self.gateway.execute(&invocation).await {
            Ok(output) if output.success() => HealthStatus::parse(&output.stdout),
            Ok(_) => HealthStatus::Unknown,
            Err(e) => {
                debug!("docker inspect failed for {}: {}", container_id, e);
                HealthStatus::Unknown
            }
        }
    }

    /// Stop a container with a grace period. Returns whether it succeeded.
    pub async fn stop(&self, container_id: &str, timeout_secs: u64) -> bool {
        let timeout = timeout_secs.to_string();
        let invocation = Invocation::new(
            &self.prefix,
            ["stop", "--time", timeout.as_str(), container_id],
        );
        self.run_ok(&invocation).await
    }

    /// Remove a stopped container. Returns whether it succeeded.
    pub async fn remove(&self, container_id: &str) -> bool {
        let invocation = Invocation::new(&self.prefix, ["rm", container_id]);
        self.run_ok(&invocation).await
    }

    async fn run_ok(&self, invocation: &Invocation) -> bool {
        match self.gateway.execute(invocation).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!("{} failed: {}", invocation.display(), output.stderr.trim());
                false
            }
            Err(e) => {
                warn!("{} failed: {}", invocation.display(), e);
                false
            }
        }
    }
}

//! Current state of all managed services

use crate::app::run::Deployer;
use crate::errors::DeployError;
use crate::models::service::ComposeProject;

impl Deployer {
    /// Print the current tag, the lock holder if any, and every labelled
    /// service's running containers with their health
    pub async fn status(&self) -> Result<ComposeProject, DeployError> {
        let project = self.compose.config().await?;
        let current = self.ledger.current().await?;

        self.progress.info(&format!(
            "Current tag: {}",
            current.as_deref().unwrap_or("(none)")
        ));
        if let Some(holder) = self.lock.read_holder().await {
            let since = holder
                .acquired_at()
                .map(|at| format!(" since {}", at.format("%Y-%m-%d %H:%M:%S UTC")))
                .unwrap_or_default();
            self.progress
                .info(&format!("Deploy lock held by PID {}{}", holder.pid, since));
        }
        self.progress.info("");

        for svc in &project.services {
            let containers = self
                .docker
                .list_containers(&svc.name, project.name.as_deref())
                .await;
            if containers.is_empty() {
                self.progress
                    .info(&format!("  {} ({})  no containers", svc.name, svc.role));
                continue;
            }
            for container in &containers {
                let health = self.docker.health(&container.id).await;
                self.progress.info(&format!(
                    "  {} ({})  {}  {}  {}/{}",
                    svc.name,
                    svc.role,
                    container.short_id(),
                    container.image,
                    container.state,
                    health
                ));
            }
        }

        Ok(project)
    }
}

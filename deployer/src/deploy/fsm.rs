//! Finite State Machine for a single service upgrade

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Upgrade state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeState {
    /// Pulling the image and starting the second instance
    Pulling,

    /// Two instances running, not yet told apart
    ScaledUp,

    /// Old and new container identified, health check pending
    Resolved,

    /// New container reported healthy
    Healthy,

    /// Draining and removing the old container
    CuttingOver,

    /// New container is the sole instance
    Done,

    /// New container unhealthy or timed out
    Unhealthy,

    /// Removing the new container
    RollingBack,

    /// Upgrade failed; the old container (if any) keeps serving
    Failed,
}

impl UpgradeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpgradeState::Done | UpgradeState::Failed)
    }
}

/// Upgrade event
#[derive(Debug, Clone)]
pub enum UpgradeEvent {
    /// Image pulled and second instance started
    ScaledUp,

    /// Old/new containers identified
    Resolved,

    /// Health check passed
    HealthPassed,

    /// Health check reported unhealthy or timed out
    HealthFailed,

    /// Begin draining the old container
    StartCutover,

    /// Old container removed, service scaled back
    CutoverComplete,

    /// Begin removing the new container
    StartRollback,

    /// New container removed, service scaled back
    RollbackComplete,

    /// A step failed before health checking
    StepFailed(String),
}

/// Per-service upgrade FSM
#[derive(Debug, Clone)]
pub struct UpgradeFsm {
    state: UpgradeState,
    error: Option<String>,
}

impl UpgradeFsm {
    /// Create a new FSM in the pulling state
    pub fn new() -> Self {
        Self {
            state: UpgradeState::Pulling,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> UpgradeState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: UpgradeEvent) -> Result<UpgradeState, DeployError> {
        let new_state = match (self.state, &event) {
            (UpgradeState::Pulling, UpgradeEvent::ScaledUp) => UpgradeState::ScaledUp,
            (UpgradeState::ScaledUp, UpgradeEvent::Resolved) => UpgradeState::Resolved,

            (UpgradeState::Resolved, UpgradeEvent::HealthPassed) => UpgradeState::Healthy,
            (UpgradeState::Healthy, UpgradeEvent::StartCutover) => UpgradeState::CuttingOver,
            (UpgradeState::CuttingOver, UpgradeEvent::CutoverComplete) => UpgradeState::Done,

            (UpgradeState::Resolved, UpgradeEvent::HealthFailed) => {
                self.error = Some("health check failed".to_string());
                UpgradeState::Unhealthy
            }
            (UpgradeState::Unhealthy, UpgradeEvent::StartRollback) => UpgradeState::RollingBack,
            (UpgradeState::RollingBack, UpgradeEvent::RollbackComplete) => UpgradeState::Failed,

            (
                UpgradeState::Pulling | UpgradeState::ScaledUp | UpgradeState::Resolved,
                UpgradeEvent::StepFailed(err),
            ) => {
                self.error = Some(err.clone());
                UpgradeState::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(DeployError::InvalidTransition(format!(
                    "{:?} -> {:?}",
                    state, event
                )));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for UpgradeFsm {
    fn default() -> Self {
        Self::new()
    }
}

//! Host discovery: partition app services into per-host deploy groups
//!
//! Each group is deployed by a separate invocation on its host; nothing
//! here coordinates across hosts.

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::models::service::ComposeProject;

/// Environment variable replacing the host of every group
pub const HOST_NAME_ENV: &str = "HOST_NAME";

/// Environment variable replacing the user of every group
pub const HOST_USER_ENV: &str = "HOST_USER";

/// Host/user values that replace whatever the compose labels say
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostOverrides {
    pub host: Option<String>,
    pub user: Option<String>,
}

impl HostOverrides {
    /// Read non-empty `HOST_NAME` / `HOST_USER`
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            host: non_empty(HOST_NAME_ENV),
            user: non_empty(HOST_USER_ENV),
        }
    }
}

/// Services deployed together on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroup {
    pub host: String,
    pub user: Option<String>,
    pub dir: Option<String>,
    pub services: Vec<String>,
}

/// Group app services by `(host, user, dir)`, in first-seen order.
///
/// Overrides apply before validation, so they can supply a missing host.
pub fn discover_hosts(
    project: &ComposeProject,
    overrides: &HostOverrides,
) -> Result<Vec<HostGroup>, DeployError> {
    let mut missing = Vec::new();
    let mut groups: Vec<HostGroup> = Vec::new();

    for svc in project.services.iter().filter(|s| s.is_app()) {
        let Some(host) = overrides.host.clone().or_else(|| svc.host.clone()) else {
            missing.push(svc.name.clone());
            continue;
        };
        let user = overrides.user.clone().or_else(|| svc.user.clone());
        let dir = svc.dir.clone();

        match groups
            .iter_mut()
            .find(|g| g.host == host && g.user == user && g.dir == dir)
        {
            Some(group) => group.services.push(svc.name.clone()),
            None => groups.push(HostGroup {
                host,
                user,
                dir,
                services: vec![svc.name.clone()],
            }),
        }
    }

    if !missing.is_empty() {
        return Err(DeployError::HostError(format!(
            "services missing deploy host: {}",
            missing.join(", ")
        )));
    }

    Ok(groups)
}

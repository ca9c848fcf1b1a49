//! Service descriptors parsed from the compose configuration

use serde::{Deserialize, Serialize};

/// Role label value for services that take part in rolling deploys
pub const APP_ROLE: &str = "app";

/// One deployable service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Compose service name
    pub name: String,

    /// Value of the `deploy.role` label
    pub role: String,

    /// Nominal image reference
    pub image: Option<String>,

    /// Deploy sequence, lower first
    pub order: i64,

    /// Seconds the old container gets to finish in-flight work
    pub drain: u64,

    /// Seconds to wait for the new container to become healthy
    pub healthcheck_timeout: u64,

    /// Seconds between health polls
    pub healthcheck_poll: u64,

    /// Whether the service declares a `healthcheck.test`
    pub has_healthcheck: bool,

    /// Declaration position in the compose file
    pub file_order: usize,

    /// Deploy host (label or `x-deploy` default)
    pub host: Option<String>,

    /// SSH user for the deploy host
    pub user: Option<String>,

    /// Project directory on the deploy host
    pub dir: Option<String>,
}

impl ServiceDescriptor {
    pub fn is_app(&self) -> bool {
        self.role == APP_ROLE
    }

    /// Image reference shown in progress output
    pub fn display_image(&self) -> &str {
        self.image.as_deref().unwrap_or(&self.name)
    }
}

/// Parsed compose configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeProject {
    /// Compose project name, used to scope container lookups
    pub name: Option<String>,

    /// Labelled services sorted by (order, file_order)
    pub services: Vec<ServiceDescriptor>,
}

impl ComposeProject {
    /// App services, optionally restricted to `filter`
    pub fn app_services(&self, filter: Option<&[String]>) -> Vec<ServiceDescriptor> {
        self.services
            .iter()
            .filter(|s| s.is_app())
            .filter(|s| filter.map_or(true, |names| names.iter().any(|n| n == &s.name)))
            .cloned()
            .collect()
    }
}

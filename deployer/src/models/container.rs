//! Container observations reported by the runtime

use serde::{Deserialize, Serialize};

/// A running container as listed by `docker ps --format '{{json .}}'`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerObservation {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Image", default)]
    pub image: String,

    /// Creation time as printed by the runtime; compared as a string
    #[serde(rename = "CreatedAt", default)]
    pub created_at: String,

    #[serde(rename = "State", default)]
    pub state: String,
}

impl ContainerObservation {
    /// First 12 characters of the ID
    pub fn short_id(&self) -> &str {
        short_id(&self.id, 12)
    }

    /// Whether the image reference carries `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        !tag.is_empty() && self.image.ends_with(&format!(":{}", tag))
    }
}

/// Truncate a container ID for display
pub fn short_id(id: &str, len: usize) -> &str {
    match id.char_indices().nth(len) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Health as reported by `docker inspect`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Starting,
    /// No health information, or the query failed
    Unknown,
}

impl HealthStatus {
    /// Parse the templated `{{.State.Health.Status}}` output
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "healthy" => HealthStatus::Healthy,
            "unhealthy" => HealthStatus::Unhealthy,
            "starting" => HealthStatus::Starting,
            _ => HealthStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Starting => "starting",
            HealthStatus::Unknown => "none",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Service registry: compose configuration to service descriptors

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_yaml_ng::{Mapping, Value};

use crate::errors::DeployError;
use crate::models::service::{ComposeProject, ServiceDescriptor};

const LABEL_ROLE: &str = "deploy.role";
const LABEL_ORDER: &str = "deploy.order";
const LABEL_DRAIN: &str = "deploy.drain";
const LABEL_HC_TIMEOUT: &str = "deploy.healthcheck.timeout";
const LABEL_HC_POLL: &str = "deploy.healthcheck.poll";
const LABEL_HOST: &str = "deploy.host";
const LABEL_USER: &str = "deploy.user";
const LABEL_DIR: &str = "deploy.dir";

const DEFAULT_ORDER: i64 = 100;
const DEFAULT_DRAIN: u64 = 30;
const DEFAULT_HC_TIMEOUT: u64 = 120;
const DEFAULT_HC_POLL: u64 = 2;

/// Merged compose document, as printed by `<compose> config`
#[derive(Debug, Default, Deserialize)]
struct ComposeDocument {
    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    services: Mapping,

    #[serde(rename = "x-deploy", default)]
    x_deploy: HostDefaults,
}

/// Top-level `x-deploy` defaults
#[derive(Debug, Default, Deserialize)]
struct HostDefaults {
    host: Option<String>,
    user: Option<String>,
    dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawService {
    #[serde(default)]
    image: Option<String>,

    #[serde(default)]
    labels: Labels,

    #[serde(default)]
    healthcheck: Option<RawHealthcheck>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHealthcheck {
    #[serde(default)]
    test: Option<Value>,
}

/// Compose accepts labels as a map or as a `key=value` list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Labels {
    Map(BTreeMap<String, Value>),
    List(Vec<String>),
}

impl Default for Labels {
    fn default() -> Self {
        Labels::Map(BTreeMap::new())
    }
}

impl Labels {
    fn into_map(self) -> BTreeMap<String, String> {
        match self {
            Labels::Map(map) => map
                .into_iter()
                .map(|(k, v)| (k, scalar_to_string(&v)))
                .collect(),
            Labels::List(items) => items
                .into_iter()
                .map(|item| match item.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (item, String::new()),
                })
                .collect(),
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml_ng::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn numeric_label<T: std::str::FromStr>(
    service: &str,
    labels: &BTreeMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, DeployError> {
    match labels.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            DeployError::ConfigError(format!(
                "service {}: label {} must be an integer, got {:?}",
                service, key, raw
            ))
        }),
    }
}

/// Parse `<compose> config` YAML output
pub fn parse_project(yaml: &str) -> Result<ComposeProject, DeployError> {
    let document: ComposeDocument = if yaml.trim().is_empty() {
        ComposeDocument::default()
    } else {
        serde_yaml_ng::from_str(yaml)?
    };
    project_from_document(document)
}

fn project_from_document(document: ComposeDocument) -> Result<ComposeProject, DeployError> {
    let mut services = Vec::new();

    for (file_order, (key, value)) in document.services.into_iter().enumerate() {
        let name = match key {
            Value::String(name) => name,
            other => scalar_to_string(&other),
        };
        let raw: RawService = if value.is_null() {
            RawService::default()
        } else {
            serde_yaml_ng::from_value(value).map_err(|e| {
                DeployError::ConfigError(format!("service {}: {}", name, e))
            })?
        };

        let labels = raw.labels.into_map();
        let Some(role) = labels.get(LABEL_ROLE).cloned() else {
            continue;
        };

        let has_healthcheck = raw
            .healthcheck
            .as_ref()
            .and_then(|hc| hc.test.as_ref())
            .is_some_and(|test| !test.is_null());

        let label_or_default = |key: &str, default: &Option<String>| {
            labels
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .or_else(|| default.clone())
        };

        services.push(ServiceDescriptor {
            order: numeric_label(&name, &labels, LABEL_ORDER, DEFAULT_ORDER)?,
            drain: numeric_label(&name, &labels, LABEL_DRAIN, DEFAULT_DRAIN)?,
            healthcheck_timeout: numeric_label(&name, &labels, LABEL_HC_TIMEOUT, DEFAULT_HC_TIMEOUT)?,
            healthcheck_poll: numeric_label(&name, &labels, LABEL_HC_POLL, DEFAULT_HC_POLL)?,
            host: label_or_default(LABEL_HOST, &document.x_deploy.host),
            user: label_or_default(LABEL_USER, &document.x_deploy.user),
            dir: label_or_default(LABEL_DIR, &document.x_deploy.dir),
            name,
            role,
            image: raw.image,
            has_healthcheck,
            file_order,
        });
    }

    // Stable: equal orders keep declaration order
    services.sort_by_key(|s| (s.order, s.file_order));

    Ok(ComposeProject {
        name: document.name,
        services,
    })
}

/// Names of app services without a healthcheck
pub fn validate_healthchecks(services: &[ServiceDescriptor]) -> Vec<String> {
    services
        .iter()
        .filter(|s| s.is_app() && !s.has_healthcheck)
        .map(|s| s.name.clone())
        .collect()
}

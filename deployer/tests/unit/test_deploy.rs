//! End-to-end deploy orchestration against a fake compose stack

mod common;

use std::future::pending;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{options_in, FakeStack, ScriptedGateway, TWO_APP_CONFIG};
use flow_deploy::app::options::DeployRequest;
use flow_deploy::app::run::{Deployer, RunStatus};

fn request(tag: &str) -> DeployRequest {
    DeployRequest {
        tag: Some(tag.to_string()),
        ..Default::default()
    }
}

/// Commands a successful upgrade of `service` issues, in order
fn cutover_commands(service: &str, drain: u64) -> Vec<String> {
    vec![
        format!("docker compose pull {}", service),
        format!(
            "docker compose up -d --no-deps --no-recreate --scale {0}=2 {0}",
            service
        ),
        ps_command(service),
        format!("docker inspect --format {{{{.State.Health.Status}}}} {}-new", service),
        format!("docker stop --time {} {}-old", drain, service),
        format!("docker rm {}-old", service),
        scale_back_command(service),
    ]
}

fn ps_command(service: &str) -> String {
    format!(
        "docker ps --filter label=com.docker.compose.service={} \
         --filter label=com.docker.compose.project=shop \
         --filter status=running --format {{{{json .}}}}",
        service
    )
}

fn scale_back_command(service: &str) -> String {
    format!("docker compose up -d --no-deps --scale {0}=1 {0}", service)
}

fn deploy_tags(gateway: &ScriptedGateway) -> Vec<String> {
    gateway
        .calls()
        .iter()
        .flat_map(|call| call.env.iter())
        .filter(|(key, _)| key == "DEPLOY_TAG")
        .map(|(_, value)| value.clone())
        .collect()
}

#[tokio::test]
async fn test_deploys_services_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2").into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    let status = deployer.deploy(&request("v2"), pending()).await;
    assert_eq!(status, RunStatus::Success);
    assert_eq!(status.exit_code(), 0);

    let mut expected = vec!["docker compose config".to_string()];
    expected.extend(cutover_commands("web", 15));
    expected.extend(cutover_commands("worker", 30));
    assert_eq!(gateway.commands(), expected);

    assert!(deploy_tags(&gateway).iter().all(|tag| tag == "v2"));
    assert_eq!(deployer.ledger().read().await.unwrap(), vec!["v2"]);
    assert!(deployer.lock().read_holder().await.is_none());
}

#[tokio::test]
async fn test_unhealthy_service_rolls_back_and_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2")
        .with_health("web", "unhealthy")
        .into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));
    deployer.ledger().append("v1").await.unwrap();

    let status = deployer.deploy(&request("v2"), pending()).await;
    assert_eq!(status, RunStatus::Failure);
    assert_eq!(status.exit_code(), 1);

    assert_eq!(
        gateway.commands(),
        vec![
            "docker compose config".to_string(),
            "docker compose pull web".to_string(),
            "docker compose up -d --no-deps --no-recreate --scale web=2 web".to_string(),
            ps_command("web"),
            "docker inspect --format {{.State.Health.Status}} web-new".to_string(),
            "docker stop --time 30 web-new".to_string(),
            "docker rm web-new".to_string(),
            scale_back_command("web"),
        ]
    );
    assert!(!gateway.commands().iter().any(|c| c.contains("worker")));
    assert_eq!(deployer.ledger().read().await.unwrap(), vec!["v1"]);
    assert!(deployer.lock().read_holder().await.is_none());
}

#[tokio::test]
async fn test_held_lock_reports_locked() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2").into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    // Held by this (live) process
    assert!(deployer.lock().acquire().await.unwrap());

    let status = deployer.deploy(&request("v2"), pending()).await;
    assert_eq!(status, RunStatus::Locked);
    assert_eq!(status.exit_code(), 2);

    assert_eq!(gateway.commands(), vec!["docker compose config"]);
    assert_eq!(
        deployer.lock().read_holder().await.unwrap().pid,
        std::process::id()
    );
    assert!(deployer.ledger().read().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rollback_without_history_fails() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = ScriptedGateway::succeeding();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));
    deployer.ledger().append("v1").await.unwrap();

    let status = deployer.rollback(None, pending()).await;
    assert_eq!(status, RunStatus::Failure);
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn test_rollback_redeploys_previous_tag() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v1").into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));
    deployer.ledger().append("v1").await.unwrap();
    deployer.ledger().append("v2").await.unwrap();

    let status = deployer.rollback(None, pending()).await;
    assert_eq!(status, RunStatus::Success);

    let tags = deploy_tags(&gateway);
    assert!(!tags.is_empty());
    assert!(tags.iter().all(|tag| tag == "v1"));
    assert_eq!(
        deployer.ledger().read().await.unwrap(),
        vec!["v1", "v2", "v1"]
    );
}

#[tokio::test]
async fn test_tag_defaults_to_current_then_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "latest").into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    let status = deployer.deploy(&DeployRequest::default(), pending()).await;
    assert_eq!(status, RunStatus::Success);
    assert!(deploy_tags(&gateway).iter().all(|tag| tag == "latest"));

    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v3").into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));
    deployer.ledger().append("v3").await.unwrap();

    let status = deployer.deploy(&DeployRequest::default(), pending()).await;
    assert_eq!(status, RunStatus::Success);
    assert!(deploy_tags(&gateway).iter().all(|tag| tag == "v3"));
    assert_eq!(deployer.ledger().read().await.unwrap(), vec!["v3", "v3"]);
}

#[tokio::test]
async fn test_missing_healthcheck_fails_before_any_change() {
    let yaml = r#"
services:
  web:
    image: registry/web
    labels:
      deploy.role: app
"#;
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(yaml, "v2").into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    let status = deployer.deploy(&request("v2"), pending()).await;
    assert_eq!(status, RunStatus::Failure);
    assert_eq!(gateway.commands(), vec!["docker compose config"]);
    assert!(deployer.lock().read_holder().await.is_none());
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2").into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    let request = DeployRequest {
        tag: Some("v2".to_string()),
        dry_run: true,
        ..Default::default()
    };
    let status = deployer.deploy(&request, pending()).await;

    assert_eq!(status, RunStatus::Success);
    assert_eq!(gateway.commands(), vec!["docker compose config"]);
    assert!(deployer.ledger().read().await.unwrap().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_pull_failure_aborts_without_scaling() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2")
        .with_failing_pull("web")
        .into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    let status = deployer.deploy(&request("v2"), pending()).await;
    assert_eq!(status, RunStatus::Failure);
    assert_eq!(
        gateway.commands(),
        vec!["docker compose config", "docker compose pull web"]
    );
    assert!(deployer.ledger().read().await.unwrap().is_empty());
    assert!(deployer.lock().read_holder().await.is_none());
}

#[tokio::test]
async fn test_wrong_container_count_scales_back() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2")
        .with_missing_new("web")
        .into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    let status = deployer.deploy(&request("v2"), pending()).await;
    assert_eq!(status, RunStatus::Failure);
    assert_eq!(
        gateway.commands(),
        vec![
            "docker compose config".to_string(),
            "docker compose pull web".to_string(),
            "docker compose up -d --no-deps --no-recreate --scale web=2 web".to_string(),
            ps_command("web"),
            scale_back_command("web"),
        ]
    );
}

#[tokio::test]
async fn test_service_filter() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2").into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    let request = DeployRequest {
        tag: Some("v2".to_string()),
        services: Some(vec!["worker".to_string()]),
        dry_run: false,
    };
    let status = deployer.deploy(&request, pending()).await;
    assert_eq!(status, RunStatus::Success);

    let mut expected = vec!["docker compose config".to_string()];
    expected.extend(cutover_commands("worker", 30));
    assert_eq!(gateway.commands(), expected);
}

#[tokio::test]
async fn test_no_app_services_fails() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2").into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    let request = DeployRequest {
        tag: Some("v2".to_string()),
        services: Some(vec!["postgres".to_string()]),
        dry_run: false,
    };
    assert_eq!(deployer.deploy(&request, pending()).await, RunStatus::Failure);
    assert_eq!(gateway.commands(), vec!["docker compose config"]);
}

#[tokio::test]
async fn test_config_failure() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = ScriptedGateway::new(|_| common::failed("yaml: line 3: mapping values"));
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    assert_eq!(
        deployer.deploy(&request("v2"), pending()).await,
        RunStatus::Failure
    );
    assert_eq!(gateway.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_releases_lock() {
    let dir = tempfile::tempdir().unwrap();
    // web never becomes healthy, so the run is still polling when the
    // interrupt arrives
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2")
        .with_health("web", "starting")
        .into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    let interrupt = async { tokio::time::sleep(Duration::from_secs(5)).await };
    let status = deployer.deploy(&request("v2"), interrupt).await;

    assert_eq!(status, RunStatus::Failure);
    assert!(deployer.lock().read_holder().await.is_none());
    assert!(!dir.path().join(".deploy-lock").exists());
    assert!(!gateway.commands().iter().any(|c| c.contains("worker")));
    assert!(deployer.ledger().read().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_reads_every_labelled_service() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2").into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));
    deployer.ledger().append("v2").await.unwrap();

    let project = deployer.status().await.unwrap();
    assert_eq!(project.services.len(), 3);

    let commands = gateway.commands();
    for service in ["web", "postgres", "worker"] {
        assert!(commands.contains(&ps_command(service)));
        assert!(commands
            .iter()
            .any(|c| c.ends_with(&format!("inspect --format {{{{.State.Health.Status}}}} {}-new", service))));
    }
    // Read-only: no lock taken, history untouched
    assert!(deployer.lock().read_holder().await.is_none());
    assert_eq!(deployer.ledger().read().await.unwrap(), vec!["v2"]);
}

/// Collects formatted log output for the current thread while alive
struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl CapturedLogs {
    fn start() -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || SharedWriter(writer.clone()))
            .finish();
        Self {
            buffer,
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }

    fn failure_lines(&self) -> Vec<String> {
        let output = String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned();
        output
            .lines()
            .filter(|line| line.contains('✗'))
            .map(str::to_string)
            .collect()
    }
}

struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_step_reports_one_failure_line() {
    let logs = CapturedLogs::start();
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2")
        .with_failing_pull("web")
        .into_gateway();
    let deployer = Deployer::new(gateway, options_in(&dir));

    assert_eq!(deployer.deploy(&request("v2"), pending()).await, RunStatus::Failure);

    let lines = logs.failure_lines();
    assert_eq!(lines.len(), 1, "{:?}", lines);
    assert!(lines[0].contains("pull failed"));
}

#[tokio::test]
async fn test_rollback_reports_one_failure_line() {
    let logs = CapturedLogs::start();
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2")
        .with_health("web", "unhealthy")
        .into_gateway();
    let deployer = Deployer::new(gateway, options_in(&dir));

    assert_eq!(deployer.deploy(&request("v2"), pending()).await, RunStatus::Failure);

    let lines = logs.failure_lines();
    assert_eq!(lines.len(), 1, "{:?}", lines);
    assert!(lines[0].contains("web FAILED"));
}

#[tokio::test(start_paused = true)]
async fn test_oversized_health_timeout_keeps_polling() {
    let config = TWO_APP_CONFIG.replace(
        r#"deploy.drain: "15""#,
        r#"deploy.drain: "15"
      deploy.healthcheck.timeout: "18446744073709551615""#,
    );
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(&config, "v2")
        .with_health("web", "starting")
        .into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    // web never turns healthy; the run must stay interruptible, not panic
    let status = deployer
        .deploy(&request("v2"), tokio::time::sleep(Duration::from_secs(600)))
        .await;
    assert_eq!(status, RunStatus::Failure);
    assert!(gateway
        .commands()
        .iter()
        .any(|c| c.starts_with("docker inspect")));
    assert!(deployer.lock().read_holder().await.is_none());
    assert!(deployer.ledger().read().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_tag_fails_before_any_change() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = FakeStack::new(TWO_APP_CONFIG, "v2").into_gateway();
    let deployer = Deployer::new(gateway.clone(), options_in(&dir));

    let status = deployer.deploy(&request("v2\nv3"), pending()).await;
    assert_eq!(status, RunStatus::Failure);
    assert_eq!(gateway.commands(), vec!["docker compose config"]);
    assert!(deployer.lock().read_holder().await.is_none());
    assert!(deployer.ledger().read().await.unwrap().is_empty());
}

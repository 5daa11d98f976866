//! Sidecar orchestration against an in-memory cluster.
//!
//! Covers launch-command parsing at the boundary, idempotent deploys,
//! rollback after a failed service, and teardown tolerance.

mod common;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use pretty_assertions::assert_eq;

use mcp_gateway::error::ErrorKind;
use mcp_gateway::launch::{self, DEFAULT_CONTAINER_PORT, resource_name};
use mcp_gateway::sidecar::{DeployAction, SidecarError, SidecarState, SidecarStatus};
use mcp_gateway::testing::InMemoryCluster;

use common::{NAMESPACE, gateway, gateway_with};

const UYUNI: &str = "docker run -it --rm -e UYUNI_SERVER=http://dummy.domain.com -e UYUNI_USER=admin ghcr.io/example/server:latest";

#[test]
fn parses_a_typical_launch_command() {
    let spec = launch::parse(UYUNI).unwrap();

    let expected: BTreeMap<String, String> = [
        ("UYUNI_SERVER", "http://dummy.domain.com"),
        ("UYUNI_USER", "admin"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    assert_eq!(spec.image, "ghcr.io/example/server:latest");
    assert_eq!(spec.env, expected);
    assert_eq!(spec.port, DEFAULT_CONTAINER_PORT);
    assert_eq!(spec, launch::parse(UYUNI).unwrap());
}

#[test]
fn rejects_commands_without_an_image() {
    let err = launch::parse("docker run -e A=1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImageNotFound);

    let err = launch::parse("kubectl run img").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedCommand);
}

#[tokio::test]
async fn repeated_deploys_create_one_pair() {
    let gw = gateway();
    let spec = launch::parse(UYUNI).unwrap();
    let env = HashMap::new();

    let first = gw.orchestrator.deploy("uyuni", &spec, &env).await.unwrap();
    let second = gw.orchestrator.deploy("uyuni", &spec, &env).await.unwrap();
    let third = gw.orchestrator.deploy("uyuni", &spec, &env).await.unwrap();

    assert_eq!(first, DeployAction::Created);
    assert_eq!(second, DeployAction::Unchanged);
    assert_eq!(third, DeployAction::Unchanged);
    assert_eq!(gw.cluster.workload_count(), 1);
    assert_eq!(gw.cluster.service_count(), 1);
    assert_eq!(gw.cluster.workload_applies(), 1);
    assert!(gw.cluster.has_namespace(NAMESPACE));
}

#[tokio::test]
async fn changed_overrides_update_in_place() {
    let gw = gateway();
    let spec = launch::parse(UYUNI).unwrap();

    gw.orchestrator
        .deploy("uyuni", &spec, &HashMap::new())
        .await
        .unwrap();
    let overrides: HashMap<String, String> =
        [("UYUNI_USER".to_string(), "operator".to_string())].into();
    let action = gw.orchestrator.deploy("uyuni", &spec, &overrides).await.unwrap();

    assert_eq!(action, DeployAction::Updated);
    assert_eq!(gw.cluster.workload_count(), 1);
    assert_eq!(gw.cluster.workload_applies(), 2);
}

#[tokio::test]
async fn concurrent_deploys_of_one_adapter_converge() {
    let gw = gateway();
    let spec = launch::parse(UYUNI).unwrap();
    let env = HashMap::new();

    let (a, b) = tokio::join!(
        gw.orchestrator.deploy("uyuni", &spec, &env),
        gw.orchestrator.deploy("uyuni", &spec, &env),
    );

    let mut actions = vec![a.unwrap(), b.unwrap()];
    actions.sort_by_key(|a| format!("{a:?}"));
    assert_eq!(actions, vec![DeployAction::Created, DeployAction::Unchanged]);
    assert_eq!(gw.cluster.workload_count(), 1);
}

#[tokio::test]
async fn independent_adapters_deploy_in_parallel() {
    let gw = gateway();
    let spec = launch::parse(UYUNI).unwrap();
    let env = HashMap::new();

    let (a, b) = tokio::join!(
        gw.orchestrator.deploy("one", &spec, &env),
        gw.orchestrator.deploy("two", &spec, &env),
    );

    assert_eq!(a.unwrap(), DeployAction::Created);
    assert_eq!(b.unwrap(), DeployAction::Created);
    assert_eq!(gw.cluster.workload_count(), 2);
    assert_eq!(gw.cluster.service_count(), 2);
}

#[tokio::test]
async fn failed_service_rolls_back_the_workload() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.set_fail_service_apply(true);
    let gw = gateway_with(cluster);
    let spec = launch::parse(UYUNI).unwrap();

    let err = gw
        .orchestrator
        .deploy("uyuni", &spec, &HashMap::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SidecarError::ServiceCreationFailed {
            rolled_back: true,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::DeploymentFailed);
    assert_eq!(gw.cluster.workload_count(), 0);
    assert_eq!(gw.cluster.service_count(), 0);
    assert_eq!(gw.orchestrator.state("uyuni").await, SidecarState::NotDeployed);

    gw.cluster.set_fail_service_apply(false);
    let action = gw
        .orchestrator
        .deploy("uyuni", &spec, &HashMap::new())
        .await
        .unwrap();
    assert_eq!(action, DeployAction::Created);
}

#[tokio::test]
async fn status_reports_pending_then_ready() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.set_auto_ready(false);
    let gw = gateway_with(cluster);
    let spec = launch::parse(UYUNI).unwrap();

    assert_eq!(
        gw.orchestrator.status("uyuni").await.unwrap().status,
        SidecarStatus::NotFound
    );

    gw.orchestrator
        .deploy("uyuni", &spec, &HashMap::new())
        .await
        .unwrap();
    let pending = gw.orchestrator.status("uyuni").await.unwrap();
    assert_eq!(pending.status, SidecarStatus::Pending);
    assert_eq!(pending.ready_replicas, 0);

    gw.cluster.mark_ready(&resource_name("uyuni"));
    let ready = gw.orchestrator.status("uyuni").await.unwrap();
    assert_eq!(ready.status, SidecarStatus::Ready);
    assert_eq!(ready.ready_replicas, 1);
    assert_eq!(ready.image.as_deref(), Some("ghcr.io/example/server:latest"));
}

#[tokio::test]
async fn teardown_is_tolerant_of_missing_resources() {
    let gw = gateway();
    let spec = launch::parse(UYUNI).unwrap();

    gw.orchestrator.teardown("never-deployed").await.unwrap();

    gw.orchestrator
        .deploy("uyuni", &spec, &HashMap::new())
        .await
        .unwrap();
    gw.orchestrator.teardown("uyuni").await.unwrap();
    gw.orchestrator.teardown("uyuni").await.unwrap();

    assert_eq!(gw.cluster.workload_count(), 0);
    assert_eq!(gw.cluster.service_count(), 0);
}

#[tokio::test]
async fn teardown_reports_every_failure() {
    let gw = gateway();
    let spec = launch::parse(UYUNI).unwrap();
    gw.orchestrator
        .deploy("uyuni", &spec, &HashMap::new())
        .await
        .unwrap();

    gw.cluster.set_fail_workload_delete(true);
    gw.cluster.set_fail_service_delete(true);
    let err = gw.orchestrator.teardown("uyuni").await.unwrap_err();

    match &err {
        SidecarError::TeardownFailed { errors, .. } => assert_eq!(errors.len(), 2),
        other => panic!("expected TeardownFailed, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::TeardownFailed);
    assert_eq!(gw.orchestrator.state("uyuni").await, SidecarState::Ready);

    gw.cluster.set_fail_workload_delete(false);
    gw.cluster.set_fail_service_delete(false);
    gw.orchestrator.teardown("uyuni").await.unwrap();
    assert_eq!(gw.cluster.workload_count(), 0);
}

#[tokio::test]
async fn logs_are_tailed() {
    let gw = gateway();
    let spec = launch::parse(UYUNI).unwrap();
    gw.orchestrator
        .deploy("uyuni", &spec, &HashMap::new())
        .await
        .unwrap();

    let logs = gw.orchestrator.logs("uyuni", 2).await.unwrap();
    assert_eq!(logs.lines().count(), 2);
    assert!(logs.ends_with("line 3"));
}

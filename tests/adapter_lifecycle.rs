//! Adapter registration and deletion through `AdapterService`.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use mcp_gateway::adapter::{
    AdapterService, AdapterStatus, AdapterStore, ConnectionKind, CreateAdapter,
    InMemoryAdapterStore,
};
use mcp_gateway::catalog::StaticCatalog;
use mcp_gateway::error::ErrorKind;
use mcp_gateway::launch::resource_name;
use mcp_gateway::proxy::Dispatcher;
use mcp_gateway::session::{InMemorySessionStore, SessionManager};
use mcp_gateway::testing::InMemoryCluster;

use common::{call, gateway, gateway_with, initialize, spawn_mock_backend, wait_for_status};

const COMMAND: &str = "docker run -it --rm -e UYUNI_SERVER=http://dummy.domain.com -e UYUNI_USER=admin ghcr.io/example/server:latest";

fn sidecar(name: &str) -> CreateAdapter {
    CreateAdapter {
        command: Some(COMMAND.to_string()),
        ..CreateAdapter::new(name, ConnectionKind::SidecarContainer)
    }
}

#[tokio::test]
async fn sidecar_reports_pending_until_ready() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.set_auto_ready(false);
    let gw = gateway_with(cluster);

    let created = gw.adapters.create(sidecar("uyuni")).await.unwrap();
    assert_eq!(created.status, AdapterStatus::Provisioning);
    assert_eq!(
        created.launch.as_ref().map(|l| l.image.as_str()),
        Some("ghcr.io/example/server:latest")
    );

    let pending = gw.dispatcher.status("uyuni").await.unwrap();
    assert_eq!(pending.status, "pending");
    assert_eq!(pending.ready_replicas, Some(0));
    assert_eq!(
        gw.adapters.get("uyuni").await.unwrap().status,
        AdapterStatus::Provisioning
    );

    gw.cluster.mark_ready(&resource_name("uyuni"));
    wait_for_status(&gw.adapters, "uyuni", AdapterStatus::Ready).await;

    let ready = gw.dispatcher.status("uyuni").await.unwrap();
    assert_eq!(ready.status, "ready");
    assert_eq!(ready.ready_replicas, Some(1));
    assert_eq!(ready.replicas, Some(1));
}

#[tokio::test]
async fn requests_before_readiness_are_backend_unavailable() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.set_auto_ready(false);
    let gw = gateway_with(cluster);
    gw.adapters.create(sidecar("uyuni")).await.unwrap();

    let err = gw.dispatcher.handle("uyuni", initialize(1)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
}

#[tokio::test]
async fn deleting_invalidates_every_session() {
    let (url, _mock) = spawn_mock_backend().await;
    let gw = gateway();
    gw.cluster.set_endpoint(&url);

    gw.adapters.create(sidecar("uyuni")).await.unwrap();
    wait_for_status(&gw.adapters, "uyuni", AdapterStatus::Ready).await;

    let first = gw.dispatcher.handle("uyuni", initialize(1)).await.unwrap();
    let second = gw.dispatcher.handle("uyuni", initialize(1)).await.unwrap();
    let s1 = first.session_id.unwrap();
    let s2 = second.session_id.unwrap();
    assert_ne!(s1, s2);

    gw.adapters.delete("uyuni").await.unwrap();

    for session in [&s1, &s2] {
        let err = gw
            .dispatcher
            .handle("uyuni", call(session, 2, "tools/list"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionInvalidated);
        assert!(!gw.sessions.get(session).await.unwrap().is_active());
    }
    assert_eq!(gw.cluster.workload_count(), 0);
    assert_eq!(gw.cluster.service_count(), 0);
    assert_eq!(
        gw.adapters.get("uyuni").await.unwrap_err().kind(),
        ErrorKind::AdapterNotFound
    );
}

#[tokio::test]
async fn failed_teardown_keeps_the_adapter_deleted_until_retried() {
    let gw = gateway();
    gw.adapters.create(sidecar("uyuni")).await.unwrap();

    gw.cluster.set_fail_service_delete(true);
    let err = gw.adapters.delete("uyuni").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TeardownFailed);

    let adapter = gw.adapters.get("uyuni").await.unwrap();
    assert_eq!(adapter.status, AdapterStatus::Deleted);
    assert!(adapter.status_reason.is_some());
    assert_eq!(
        gw.dispatcher.handle("uyuni", initialize(1)).await.unwrap_err().kind(),
        ErrorKind::AdapterNotFound
    );

    gw.cluster.set_fail_service_delete(false);
    gw.adapters.delete("uyuni").await.unwrap();
    assert_eq!(gw.cluster.service_count(), 0);
    assert!(gw.adapters.get("uyuni").await.is_err());

    // The name is free again.
    gw.adapters.create(sidecar("uyuni")).await.unwrap();
}

#[tokio::test]
async fn failed_deploy_leaves_the_adapter_degraded() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.set_fail_service_apply(true);
    let gw = gateway_with(cluster);

    let err = gw.adapters.create(sidecar("uyuni")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeploymentFailed);

    let adapter = gw.adapters.get("uyuni").await.unwrap();
    assert_eq!(adapter.status, AdapterStatus::Degraded);
    assert!(
        adapter
            .status_reason
            .as_deref()
            .is_some_and(|r| r.contains("service"))
    );
    assert_eq!(gw.cluster.workload_count(), 0);
}

#[tokio::test]
async fn malformed_commands_are_rejected_before_anything_is_stored() {
    let gw = gateway();
    let request = CreateAdapter {
        command: Some("docker run --rm".to_string()),
        ..CreateAdapter::new("broken", ConnectionKind::SidecarContainer)
    };

    let err = gw.adapters.create(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImageNotFound);
    assert!(gw.adapters.get("broken").await.is_err());
    assert_eq!(gw.cluster.workload_count(), 0);
}

#[tokio::test]
async fn registration_validates_names_and_duplicates() {
    let gw = gateway();

    let err = gw.adapters.create(sidecar("bad name")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAdapter);

    gw.adapters.create(sidecar("uyuni")).await.unwrap();
    let err = gw.adapters.create(sidecar("uyuni")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AdapterExists);

    let err = gw
        .adapters
        .create(CreateAdapter::new("remote", ConnectionKind::RemoteHttp))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAdapter);
}

#[tokio::test]
async fn sidecar_adapters_need_a_strategy() {
    let store: Arc<dyn AdapterStore> = Arc::new(InMemoryAdapterStore::new());
    let sessions = Arc::new(SessionManager::new(Arc::new(InMemorySessionStore::new())));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        sessions,
        None,
        Duration::from_secs(5),
    ));
    let adapters = AdapterService::new(store, None, dispatcher, 8000, "mcp-sidecars");

    let err = adapters.create(sidecar("uyuni")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationFatal);
    assert!(adapters.list().await.is_empty());
}

#[tokio::test]
async fn catalog_entries_supply_command_port_and_env() {
    let catalog = StaticCatalog::from_toml_str(
        r#"
        [[server]]
        id = "uyuni"
        command = "docker run -e UYUNI_SERVER=http://uyuni.local ghcr.io/example/server:latest"
        port = 9000

        [server.env]
        UYUNI_USER = "catalog"
        UYUNI_PASS = "default"
        "#,
    )
    .unwrap();

    let gw = gateway();
    let adapters = Arc::try_unwrap(gw.adapters)
        .ok()
        .unwrap()
        .with_catalog(Arc::new(catalog));

    let request = CreateAdapter {
        catalog_id: Some("uyuni".to_string()),
        env: HashMap::from([("UYUNI_USER".to_string(), "override".to_string())]),
        ..CreateAdapter::new("from-catalog", ConnectionKind::SidecarContainer)
    };
    let adapter = adapters.create(request).await.unwrap();

    let launch = adapter.launch.unwrap();
    assert_eq!(launch.port, 9000);
    assert_eq!(launch.image, "ghcr.io/example/server:latest");
    assert_eq!(adapter.env["UYUNI_USER"], "override");
    assert_eq!(adapter.env["UYUNI_PASS"], "default");

    let missing = CreateAdapter {
        catalog_id: Some("nope".to_string()),
        ..CreateAdapter::new("missing", ConnectionKind::SidecarContainer)
    };
    assert_eq!(
        adapters.create(missing).await.unwrap_err().kind(),
        ErrorKind::InvalidAdapter
    );

    let both = CreateAdapter {
        catalog_id: Some("uyuni".to_string()),
        ..sidecar("both")
    };
    assert_eq!(
        adapters.create(both).await.unwrap_err().kind(),
        ErrorKind::InvalidAdapter
    );
}

#[tokio::test]
async fn http_adapters_get_normalised_or_derived_urls() {
    let gw = gateway();

    let remote = gw
        .adapters
        .create(CreateAdapter {
            remote_url: Some("https://mcp.example.com".to_string()),
            ..CreateAdapter::new("remote", ConnectionKind::RemoteHttp)
        })
        .await
        .unwrap();
    assert_eq!(remote.remote_url.as_deref(), Some("https://mcp.example.com/mcp"));
    assert_eq!(remote.status, AdapterStatus::Ready);

    let streamable = gw
        .adapters
        .create(CreateAdapter::new("stream", ConnectionKind::StreamableHttp))
        .await
        .unwrap();
    assert_eq!(
        streamable.remote_url,
        Some(format!(
            "http://{}.mcp-sidecars.svc.cluster.local:8000/mcp",
            resource_name("stream")
        ))
    );
    assert_eq!(gw.cluster.workload_count(), 0);
}

#[tokio::test]
async fn remote_adapters_report_reachability_and_no_logs() {
    let (url, _mock) = spawn_mock_backend().await;
    let gw = gateway();
    gw.adapters
        .create(CreateAdapter {
            remote_url: Some(url.clone()),
            ..CreateAdapter::new("remote", ConnectionKind::RemoteHttp)
        })
        .await
        .unwrap();

    let report = gw.dispatcher.status("remote").await.unwrap();
    assert_eq!(report.status, "ready");
    assert_eq!(report.address.as_deref(), Some(url.as_str()));

    let logs = gw.dispatcher.logs("remote", 50).await.unwrap();
    assert_eq!(logs, mcp_gateway::proxy::REMOTE_LOGS_MESSAGE);

    gw.adapters
        .create(CreateAdapter {
            remote_url: Some("http://127.0.0.1:9/mcp".to_string()),
            ..CreateAdapter::new("gone", ConnectionKind::RemoteHttp)
        })
        .await
        .unwrap();
    assert_eq!(gw.dispatcher.status("gone").await.unwrap().status, "unavailable");
}

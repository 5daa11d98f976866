//! MCP gateway - main entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_gateway::{
    adapter::{AdapterService, AdapterStore, InMemoryAdapterStore},
    catalog::StaticCatalog,
    cli::{Cli, Command, run_parse_command},
    config::Config,
    launch::Translator,
    proxy::Dispatcher,
    server::{self, GatewayState},
    session::{InMemorySessionStore, SessionManager},
    sidecar::{SidecarOrchestrator, select_strategy},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Parse {
            command,
            default_port,
        }) => {
            println!("{}", run_parse_command(&command, default_port)?);
            Ok(())
        }
        Some(Command::Serve {
            host,
            port,
            log_json,
        }) => serve(host, port, log_json).await,
        None => serve(None, None, false).await,
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mcp_gateway=info,tower_http=info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

async fn serve(host: Option<String>, port: Option<u16>, log_json: bool) -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();
    init_tracing(log_json);

    let mut config = Config::from_env()?;
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    let orchestrator = select_strategy(&config.sidecar).await?.map(|strategy| {
        Arc::new(SidecarOrchestrator::new(
            strategy,
            Translator::from_config(&config.sidecar),
            Duration::from_secs(config.sidecar.startup_timeout_secs),
        ))
    });
    let sidecar_strategy = orchestrator.as_ref().map(|o| o.strategy_name());

    let sessions = Arc::new(SessionManager::new(Arc::new(InMemorySessionStore::new())));
    let store: Arc<dyn AdapterStore> = Arc::new(InMemoryAdapterStore::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        Arc::clone(&sessions),
        orchestrator.clone(),
        config.gateway.request_timeout,
    ));

    let mut adapters = AdapterService::new(
        store,
        orchestrator,
        Arc::clone(&dispatcher),
        config.sidecar.default_port,
        config.sidecar.namespace.clone(),
    );
    if let Some(path) = &config.gateway.catalog_path {
        adapters = adapters.with_catalog(Arc::new(StaticCatalog::load(path).await?));
    }

    if let Some(max_idle) = config.session.idle_timeout {
        tracing::info!(
            idle_secs = max_idle.as_secs(),
            every_secs = config.session.sweep_interval.as_secs(),
            "Idle session sweep enabled"
        );
        Arc::clone(&sessions).spawn_idle_sweep(max_idle, config.session.sweep_interval);
    }

    let state = Arc::new(GatewayState {
        adapters: Arc::new(adapters),
        dispatcher,
        sidecar_strategy,
    });

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, sidecars = sidecar_strategy.unwrap_or("disabled"), "Gateway listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}

//! ShipSec Studio server binary.
//!
//! Wires the component catalog, engine, persistence, scheduler, and
//! REST API together. Exits non-zero on fatal startup failure (bad
//! configuration, unreachable database, empty component registry).

use std::sync::Arc;

use shipsec_core::component::ComponentRegistry;
use shipsec_core::port::ContractRegistry;
use shipsec_engine::{Engine, EngineConfig};
use shipsec_runtime::{components, ComponentRuntime, ContainerRunner, InlineRegistry};
use shipsec_server::db;
use shipsec_server::service::AppState;
use shipsec_server::sink::DbLogSink;
use shipsec_server::storage::SqliteArtifacts;
use shipsec_server::{create_router, schedule, ShipsecConfig, SqliteJournal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let config = ShipsecConfig::from_env().map_err(|e| format!("configuration error: {}", e))?;
    tracing::info!("Database URL: {}", config.database_url);
    tracing::info!("Container runner enabled: {}", config.container_runner_enabled);
    tracing::info!("Scheduler enabled: {}", config.scheduler_enabled);

    // Database and migrations. Fatal when unreachable.
    let pool = db::connect(&config.database_url).await?;

    // Component catalog: registered once, immutable afterwards.
    let mut registry = ComponentRegistry::new();
    let mut inline = InlineRegistry::new();
    components::install(&mut registry, &mut inline)?;
    if registry.is_empty() {
        return Err("component registry is empty after bootstrap".into());
    }
    tracing::info!("Registered {} components", registry.len());
    let contracts = ContractRegistry::new();

    // Runtime with persistent sinks; the container runner only attaches
    // when enabled so inline-only deployments need no Docker daemon.
    let mut runtime = ComponentRuntime::new(inline)
        .with_artifacts(Arc::new(SqliteArtifacts::new(pool.clone())))
        .with_log_sink(Arc::new(DbLogSink::spawn(pool.clone())));
    if config.container_runner_enabled {
        let runner = ContainerRunner::connect()
            .map_err(|e| format!("container runner requested but unavailable: {}", e))?;
        runtime = runtime.with_container_runner(runner);
    }

    let engine = Engine::with_config(
        Arc::new(runtime),
        Arc::new(SqliteJournal::new(pool.clone())),
        EngineConfig {
            tenant_id: config.tenant_id.clone(),
            grace_period: config.cancel_grace,
            default_max_concurrency: None,
        },
    );

    let state = AppState {
        pool,
        engine,
        registry: Arc::new(registry),
        contracts: Arc::new(contracts),
        config: config.clone(),
    };

    // Reattach runs interrupted by the previous shutdown.
    match state.recover_unfinished().await {
        Ok(0) => {}
        Ok(count) => tracing::info!("Recovered {} unfinished run(s)", count),
        Err(error) => tracing::warn!(%error, "run recovery failed"),
    }

    if config.scheduler_enabled {
        schedule::spawn(state.clone(), config.scheduler_interval);
    }

    let router = create_router(state);
    let addr = config.bind_addr();
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

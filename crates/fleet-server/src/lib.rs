//! `fleet-server` — HTTP API over the remote operation orchestrator.

pub mod error;
pub mod mesh_api;
pub mod orchestrator;
pub mod routes;
pub mod state;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::{delete, get, post};
use axum::Router;
use fleet_bus::NatsTransport;
use fleet_core::config::{Config, WarnLevel};
use fleet_core::ResourceDb;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::orchestrator::Orchestrator;
use crate::state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Reconciliation
        .route(
            "/api/agents/{id}/refresh",
            post(routes::resources::refresh),
        )
        // Resources
        .route(
            "/api/agents/{id}/resources",
            get(routes::resources::list_resources),
        )
        .route(
            "/api/agents/{id}/resources/{key}/operation",
            delete(routes::resources::clear_operation),
        )
        // Volumes
        .route(
            "/api/agents/{id}/volumes/{drive}/{action}",
            post(routes::volumes::volume_action),
        )
        // Mesh
        .route(
            "/api/agents/{id}/mesh/{action}",
            post(routes::mesh::mesh_action),
        )
        // Packages
        .route(
            "/api/agents/{id}/packages",
            post(routes::packages::deploy_package),
        )
        // Agent-level commands
        .route("/api/agents/{id}/{action}", post(routes::agents::agent_action))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Open the store, connect to the bus and start background tasks for the
/// console rooted at `root`.
pub async fn build_state(root: &Path, config: &Config) -> anyhow::Result<AppState> {
    let db_path = config.db_path(root);
    let tenants = config.tenants.clone();
    let db = tokio::task::spawn_blocking(move || -> fleet_core::Result<ResourceDb> {
        let db = ResourceDb::open(&db_path)?;
        for (tenant, settings) in &tenants {
            db.put_mesh_settings(tenant, settings)?;
        }
        Ok(db)
    })
    .await
    .context("task join error")??;
    if !config.tenants.is_empty() {
        tracing::info!(tenants = config.tenants.len(), "mesh settings loaded from config");
    }
    let transport = NatsTransport::connect(&config.nats_url)
        .await
        .with_context(|| format!("cannot connect to message bus at {}", config.nats_url))?;

    let orchestrator = Arc::new(
        Orchestrator::new(Arc::new(db), Arc::new(transport)).with_timeouts(config.timeouts.clone()),
    );
    orchestrator.spawn_package_listener().await?;
    orchestrator.spawn_stall_sweep(&config.stall_sweep);
    Ok(AppState::new(orchestrator))
}

/// Start the console API on the address from the configuration.
pub async fn serve(root: &Path) -> anyhow::Result<()> {
    let config = Config::load(root)?;
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("cannot listen on {}", config.listen))?;
    serve_on(root, &config, listener).await
}

/// Start the console API on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when port 0 lets
/// the OS pick a free port).
pub async fn serve_on(
    root: &Path,
    config: &Config,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    for warning in config.validate() {
        match warning.level {
            WarnLevel::Error => anyhow::bail!("invalid configuration: {}", warning.message),
            WarnLevel::Warning => tracing::warn!("{}", warning.message),
        }
    }

    let app = build_router(build_state(root, config).await?);
    let addr = listener.local_addr()?;
    tracing::info!("fleet console listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

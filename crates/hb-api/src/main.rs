mod auth;
mod config;
mod dto;
mod error;
mod monitor;
mod routes;
mod state;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use hb_db::PgHostStore;
use hb_infra::{GuestProvisioner, PortAllocator, ProvisionConfig, VirtualBoxDriver};
use hb_lifecycle::{Lifecycle, LifecycleSettings};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::monitor::spawn_monitor;
use crate::routes::api_router;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    // Database
    let db = hb_db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to database");

    hb_db::run_migrations(&db)
        .await
        .expect("failed to run migrations");

    // Hypervisor and guest access
    let driver = VirtualBoxDriver::from_env().expect("invalid hypervisor config");
    let ports = PortAllocator::from_env().expect("invalid port ranges");
    let provision = ProvisionConfig::from_env().expect("invalid provisioning config");
    let settings = LifecycleSettings::from_env().expect("invalid VM settings");

    let ssh_user = provision
        .service_account
        .clone()
        .or_else(|| provision.credentials.first().map(|c| c.user.clone()))
        .unwrap_or_else(|| "webuser".into());

    tracing::info!(
        web_ports = %ports.web_range(),
        ssh_ports = %ports.ssh_range(),
        "port ranges ready"
    );

    let lifecycle = Lifecycle::new(
        Arc::new(driver),
        Arc::new(ports),
        Arc::new(PgHostStore::new(db)),
        Arc::new(GuestProvisioner::ssh(provision)),
        settings,
    );

    lifecycle
        .restore_port_cursors()
        .await
        .expect("failed to restore port allocations");

    // Background monitor
    spawn_monitor(lifecycle.clone(), config.monitor_interval_secs);

    let state = AppState {
        lifecycle,
        config: config.clone(),
        ssh_user,
    };

    let app = api_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .expect("failed to bind listener");

    tracing::info!(addr = %config.listen_addr, "starting hosting control plane API");

    axum::serve(listener, app).await.expect("server error");
}

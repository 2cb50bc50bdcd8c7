// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

mod config;
mod logging;

use std::sync::Arc;

use airstate_bus::MemoryBus;
use airstate_http::AdminServices;
use airstate_kv::MemoryKv;
use airstate_rpc::{ConnectionConfig, ProcedureRouter, Services};
use airstate_session::SessionRegistry;
use airstate_state::StateEngine;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::load().unwrap_or_else(|err| {
        eprintln!("invalid configuration: {err}");
        std::process::exit(1);
    });
    logging::init(&config.log_format);
    info!(?config, "starting airstate");

    if let Err(err) = run(config).await {
        tracing::error!(%err, "server exited with an error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let kv = Arc::new(MemoryKv::new());
    let bus = Arc::new(MemoryBus::new());
    let engine = Arc::new(StateEngine::new(kv, bus.clone()).await?);
    let sessions = Arc::new(SessionRegistry::with_capacity(config.session_channel_capacity));

    let services = Arc::new(Services { engine: engine.clone(), bus: bus.clone(), sessions });
    let procedures: Arc<ProcedureRouter<MemoryKv, MemoryBus>> = Arc::new(airstate_rpc::default_router());

    let shutdown = CancellationToken::new();
    let connection_config = ConnectionConfig {
        worker_pool_size: config.max_transactional_routines,
        response_channel_capacity: config.resolved_response_channel_capacity(),
    };

    let service_router = airstate_rpc::ws_router(services, procedures, connection_config, shutdown.clone());
    let admin_services = Arc::new(AdminServices { engine, bus });
    let admin_router = airstate_http::router(admin_services);

    let service_listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    let admin_listener = TcpListener::bind(("0.0.0.0", config.admin_port)).await?;
    info!(port = config.port, admin_port = config.admin_port, "listening");

    let service_shutdown = shutdown.clone();
    let admin_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown.cancel();
    });

    let service_task = axum::serve(service_listener, service_router)
        .with_graceful_shutdown(async move { service_shutdown.cancelled().await });
    let admin_task = axum::serve(admin_listener, admin_router)
        .with_graceful_shutdown(async move { admin_shutdown.cancelled().await });

    let (service_result, admin_result) = tokio::join!(service_task, admin_task);
    service_result?;
    admin_result?;
    Ok(())
}

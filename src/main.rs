// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{env, net::SocketAddr};

use hail_auth_gateway::{
    api::router,
    config::{AuthSettings, DEFAULT_LOG_FILTER, LOG_FORMAT_ENV},
    state::AppState,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.trim().eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Resolves on Ctrl-C and cancels background tasks.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let settings = AuthSettings::from_env().expect("Invalid configuration");
    info!(?settings, "Configuration loaded");

    let state = AppState::from_settings(&settings)
        .await
        .expect("Failed to initialize application state");

    let shutdown = CancellationToken::new();

    // Cache warm-up runs beside the server; requests never wait on it.
    if settings.prefetch {
        state.prefetch_job().spawn(shutdown.clone());
    } else {
        info!("Provider token prefetch disabled");
    }

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .expect("Failed to parse bind address");
    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");

    info!(%addr, "Hail auth gateway listening (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .expect("HTTP server failed");
}

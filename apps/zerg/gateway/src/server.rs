//! Gateway initialization and lifecycle management
//!
//! This module handles all server setup:
//! - Tracing, error reporting and the metrics recorder
//! - Configuration from the environment
//! - Discovery, agent and filter registries
//! - HTTP and gRPC server startup (with grpc.health.v1.Health)
//! - Graceful shutdown of both servers and the background tasks

use std::sync::Arc;

use core_config::{Environment, FromEnv};
use domain_gateway::{
    ConnectionRegistry, Discoverer, DiscovererConfig, FilterChain, GatewayConfig, GatewayGrpc,
    GatewayService, GatewayState, GrpcAgent, GrpcFilter, init_metrics, router,
};
use eyre::{Result, WrapErr};
use rpc::agent::v1::agent_server::{AgentServer, SERVICE_NAME};
use tokio::signal;
use tokio::sync::watch;
use tonic::codec::CompressionEncoding;
use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};

/// Run the gateway
///
/// 1. Sets up structured logging (JSON for prod, pretty for dev) and color-eyre
/// 2. Loads [`GatewayConfig`] from the environment
/// 3. Runs a first discovery poll, then keeps polling in the background
/// 4. Evicts agent connections as agents leave the membership
/// 5. Serves HTTP and gRPC until SIGINT/SIGTERM, then stops the background tasks
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid
/// - The metrics recorder cannot be installed
/// - Server binding fails
/// - Server runtime encounters an error
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    let config = GatewayConfig::from_env().wrap_err("Failed to load gateway configuration")?;
    let source = config.membership_source();
    info!(
        membership = %source.describe(),
        quorum = ?config.write_quorum,
        "Gateway configuration loaded"
    );

    let discoverer = Arc::new(Discoverer::new(
        source,
        DiscovererConfig {
            interval: config.discovery_interval,
            debounce: config.discovery_debounce,
        },
        config.backoff.clone(),
        config.breaker.clone(),
    ));
    match discoverer.poll_once().await {
        Ok(outcome) => info!(agents = outcome.added.len(), "Initial membership loaded"),
        Err(err) => warn!(error = %err, "Initial membership poll failed, starting without agents"),
    }

    let agents = Arc::new(ConnectionRegistry::new(
        "agents",
        GrpcAgent::connector(
            config.channel.clone(),
            config.backoff.clone(),
            config.breaker.clone(),
        ),
    ));
    let filters = FilterChain::new(Arc::new(ConnectionRegistry::new(
        "filters",
        GrpcFilter::connector(
            config.channel.clone(),
            config.backoff.clone(),
            config.breaker.clone(),
        ),
    )));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let discovery = tokio::spawn(discoverer.clone().run(shutdown_rx.clone()));
    let eviction = tokio::spawn(agents.clone().watch_membership(
        discoverer.subscribe(),
        discoverer.snapshots(),
        shutdown_rx.clone(),
    ));

    let service = GatewayService::new(config.clone(), agents, filters, discoverer.snapshots());
    let state = GatewayState::new(Arc::new(service));
    let app = router(state.clone()).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let listener = tokio::net::TcpListener::bind(config.server.address())
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.server.address()))?;
    info!("Gateway listening on {}", listener.local_addr()?);

    let grpc_addr = config
        .grpc
        .socket_addr()
        .wrap_err("Invalid gRPC listen address")?;
    let (health_reporter, health_service) = health_reporter();
    health_reporter
        .set_service_status(SERVICE_NAME, tonic_health::ServingStatus::Serving)
        .await;
    // Empty name is what Kubernetes health checks ask for.
    health_reporter
        .set_service_status("", tonic_health::ServingStatus::Serving)
        .await;
    info!("Gateway gRPC listening on {}", grpc_addr);

    let shutdown_tx = Arc::new(shutdown_tx);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        }
    });

    let http = async {
        axum::serve(listener, app)
            .with_graceful_shutdown(stopped(shutdown_rx.clone()))
            .await
            .wrap_err("HTTP server failed")
    };
    let grpc = async {
        Server::builder()
            .add_service(health_service)
            .add_service(
                AgentServer::new(GatewayGrpc::new(state))
                    .accept_compressed(CompressionEncoding::Zstd)
                    .send_compressed(CompressionEncoding::Zstd)
                    .max_decoding_message_size(config.channel.max_message_size),
            )
            .serve_with_shutdown(grpc_addr, stopped(shutdown_rx.clone()))
            .await
            .wrap_err("gRPC server failed")
    };
    let served = tokio::try_join!(http, grpc).map(|_| ());

    info!("Stopping background tasks");
    // Receivers may already be gone.
    let _ = shutdown_tx.send(true);
    let (discovery, eviction) = tokio::join!(discovery, eviction);
    for (task, result) in [("discovery", discovery), ("eviction", eviction)] {
        if let Err(err) = result {
            warn!(task, error = %err, "Background task ended abnormally");
        }
    }

    served
}

/// Resolves once shutdown was requested or the sender is gone.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

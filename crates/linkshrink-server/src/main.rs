#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use axum_extra::extract::cookie::Key;
use clap::Parser;
use linkshrink_core::{
    proto::{FILE_DESCRIPTOR_SET, shortener_server::ShortenerServer},
    storage,
};
use server::{
    config::{CliArgs, ServerConfig},
    pool::{DeletionPool, PoolConfig},
    service::{
        handler::ShortenerService,
        http::{AppState, router},
    },
    telemetry::init_telemetry,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let storage = storage::open(
        config.database_dsn.as_deref(),
        config.file_storage_path.as_deref(),
    )
    .await
    .context("failed to open storage")?;

    // Cancelling `root` aborts the deletion pool; `stop_serving` only stops
    // accepting connections.
    let root = CancellationToken::new();
    let stop_serving = CancellationToken::new();

    let pool = Arc::new(DeletionPool::new(
        Arc::clone(&storage),
        PoolConfig {
            num_workers: config.num_workers,
        },
        &root,
    ));

    let base_url: Arc<str> = Arc::from(config.base_url.as_str());
    let cookie_key = match &config.cookie_key {
        Some(key) => {
            Key::try_from(key.as_bytes()).map_err(|e| anyhow::anyhow!("invalid COOKIE_KEY: {e}"))?
        }
        None => {
            tracing::warn!("COOKIE_KEY not set, identities will not survive a restart");
            Key::generate()
        }
    };

    let app = router(AppState {
        storage: Arc::clone(&storage),
        pool: Arc::clone(&pool),
        base_url: Arc::clone(&base_url),
        trusted_subnet: config.trusted_subnet,
        cookie_key,
    });

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<ShortenerServer<ShortenerService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let grpc_service = ShortenerServer::new(ShortenerService::new(
        Arc::clone(&storage),
        Arc::clone(&pool),
        base_url,
        config.trusted_subnet,
    ))
    .send_compressed(CompressionEncoding::Gzip)
    .accept_compressed(CompressionEncoding::Gzip);

    let http_listener = TcpListener::bind(config.server_address)
        .await
        .with_context(|| format!("failed to bind HTTP on {}", config.server_address))?;
    let grpc_listener = TcpListener::bind(config.grpc_address)
        .await
        .with_context(|| format!("failed to bind gRPC on {}", config.grpc_address))?;

    tokio::spawn(shutdown_signal(health_reporter, stop_serving.clone()));

    let http = async {
        axum::serve(
            http_listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(stop_serving.clone().cancelled_owned())
        .await
        .context("HTTP server failed")
    };

    let grpc = async {
        Server::builder()
            .add_service(health_service)
            .add_service(reflection)
            .add_service(grpc_service)
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(grpc_listener),
                stop_serving.clone().cancelled_owned(),
            )
            .await
            .context("gRPC server failed")
    };

    let served = tokio::try_join!(http, grpc);
    stop_serving.cancel();

    match tokio::time::timeout(config.shutdown_timeout, pool.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Deletion pool reported a failure: {e}"),
        Err(_) => {
            tracing::warn!(
                "Deletion pool did not drain within {:?}, aborting",
                config.shutdown_timeout
            );
            root.cancel();
        }
    }

    providers.shutdown();
    served?;
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting linkshrink with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting linkshrink: HTTP on {}, gRPC on {}, {} deletion workers",
            config.server_address,
            config.grpc_address,
            config.num_workers
        );
    }
}

async fn shutdown_signal(health_reporter: HealthReporter, stop_serving: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
        () = stop_serving.cancelled() => return,
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_not_serving::<ShortenerServer<ShortenerService>>()
        .await;

    // 2. Stop both servers; the deletion pool is drained once they return
    stop_serving.cancel();
}

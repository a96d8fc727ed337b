use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use keyhole_gateway::config::{Cli, Settings};
use keyhole_gateway::grpc::ShortenerGrpcServer;
use keyhole_gateway::{telemetry, App, AppState};
use keyhole_hasher::FoldHasher;
use keyhole_proto_schema::v1::shortener_service_server::ShortenerServiceServer;
use keyhole_shortener::ShortenerService;
use tokio::net::{lookup_host, TcpListener};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_cli(Cli::parse())?;
    telemetry::init(&settings.log_level, settings.log_json)?;

    info!(
        server_address = %settings.server_address,
        grpc_address = ?settings.grpc_address,
        base_url = %settings.base_url,
        storage_backend = %settings.backend,
        trusted_subnet = ?settings.trusted_subnet.map(|subnet| subnet.to_string()),
        "starting keyhole server"
    );

    let store = keyhole_storage::open(&settings.backend)
        .await
        .context("failed to open storage backend")?;
    let shortener = ShortenerService::new(Arc::clone(&store), FoldHasher::default());
    let state = AppState::new(
        Arc::new(shortener),
        settings.base_url.clone(),
        settings.trusted_subnet,
    );

    let listener = TcpListener::bind(&settings.server_address)
        .await
        .with_context(|| format!("failed to bind {}", settings.server_address))?;
    info!(listen_addr = %listener.local_addr()?, "http listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let (http, grpc) = tokio::join!(
        serve_http(listener, state.clone(), shutdown.clone()),
        serve_grpc(settings.grpc_address.clone(), state.clone(), shutdown),
    );

    state.drain().await;
    if let Err(e) = store.close().await {
        error!(error = %e, "failed to close storage");
    }
    http?;
    grpc?;

    info!("server stopped");
    Ok(())
}

async fn serve_http(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    // Either server stopping stops the other.
    let _stop_all = shutdown.clone().drop_guard();

    axum::serve(
        listener,
        App::router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await
    .context("http server failed")
}

async fn serve_grpc(
    address: Option<String>,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let Some(address) = address else {
        info!("grpc server disabled");
        return Ok(());
    };
    let _stop_all = shutdown.clone().drop_guard();

    let addr = lookup_host(&address)
        .await
        .with_context(|| format!("failed to resolve {address}"))?
        .next()
        .with_context(|| format!("no socket address for {address}"))?;
    info!(listen_addr = %addr, "grpc listening");

    Server::builder()
        .add_service(ShortenerServiceServer::new(ShortenerGrpcServer::new(state)))
        .serve_with_shutdown(addr, shutdown.cancelled_owned())
        .await
        .context("grpc server failed")
}

async fn watch_signals(shutdown: CancellationToken) {
    tokio::select! {
        _ = shutdown_signal() => shutdown.cancel(),
        _ = shutdown.cancelled() => {},
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

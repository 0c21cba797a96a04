//! The edge controller control plane.
//!
//! A single process hosts the HTTP listener, the TLS/gRPC front end
//! (with the reverse-dial registry behind it) and a signal watcher;
//! one shutdown channel joins their lifetimes.

pub mod agent;
pub mod app_state;
pub mod config;
pub mod dispatcher;
pub mod enrollment;
pub mod error;
pub mod grpc;
pub mod http;
pub mod k8s;
pub mod metrics;
pub mod persistence;
pub mod pki;
pub mod registry;
pub mod tls;
pub mod version;

/// Binary-level result; handler-level errors live in [`error::Error`].
pub type Result<T> = std::result::Result<T, anyhow::Error>;

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::get;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use common::entities::Kind;

use crate::app_state::AppState;
use crate::dispatcher::Dispatcher;
use crate::persistence::{MemoryStore, Store};
use crate::registry::AgentRegistry;

/// Directory the CA material lives under.
pub const CERTS_DIR: &str = "./certificates";

/// Per-listener graceful shutdown budget before a forced stop.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(60);

/// Initialize JSON tracing with the given default filter.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();
}

/// Boot the controller and serve until SIGINT/SIGTERM.
pub async fn run(flags: config::Flags) -> Result<()> {
    run_with_shutdown(flags, shutdown_signal()).await
}

/// Boot the controller and serve until `shutdown` resolves.
pub async fn run_with_shutdown<S>(flags: config::Flags, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let mode = flags.validate()?;
    let metrics_handle = metrics::init_metrics_recorder();

    // Dependencies may compile in more than one rustls provider; pin
    // the process default so implicit client builders agree with the
    // pinned server configs.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let store = build_store(&flags.dsn)?;

    let ca = Arc::new(
        pki::RootCa::init(&Path::new(CERTS_DIR).join("ca"))
            .context("error initializing controller CA")?,
    );
    info!("initialized controller CA");
    // Nodes add this to their trust anchors out of band.
    info!(root_ca = %ca.cert_pem(), "controller root CA certificate");

    let scheduler = match mode {
        dispatcher::OrchestrationMode::Native => None,
        _ => Some(Arc::new(k8s::KubernetesClient::from_config(&flags.kubernetes())?)
            as k8s::Scheduler),
    };

    let registry = AgentRegistry::new();
    let dispatcher = Arc::new(Dispatcher::new(mode, registry.clone(), scheduler));
    dispatcher
        .ensure_ready()
        .await
        .map_err(|err| anyhow::anyhow!("error getting orchestration mode ready: {err}"))?;
    info!(
        mode = mode.as_str(),
        ela_port = flags.ela_port,
        eva_port = flags.eva_port,
        "orchestration backend ready"
    );

    // Every persisted node is known to the registry up front, so dials
    // against absent nodes report "not yet connected" rather than
    // "unknown node".
    for record in store.read_all(Kind::Node).await? {
        if let Ok(node_id) = Uuid::try_parse(record.id()) {
            registry.prime(node_id).await;
        }
    }

    let state = AppState {
        store,
        ca: ca.clone(),
        registry: registry.clone(),
        dispatcher,
    };

    let tls = tls::TlsFrontEnd::new(&ca)?;

    let http_addr: SocketAddr = ([0, 0, 0, 0], flags.http_port).into();
    let grpc_addr: SocketAddr = ([0, 0, 0, 0], flags.grpc_port).into();
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let grpc_listener = tokio::net::TcpListener::bind(grpc_addr).await?;
    info!(%http_addr, "HTTP server serving");
    info!(%grpc_addr, "gRPC server serving");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx_for_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown.await;
        let _ = shutdown_tx_for_signal.send(true);
    });

    let router = http::build_router(state.clone()).route(
        "/metrics",
        get(move || {
            let handle = metrics_handle.clone();
            async move { handle.render() }
        }),
    );

    let mut http_shutdown = shutdown_rx.clone();
    let mut http_task: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(http_listener, router)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
            })
            .await
            .map_err(|err| anyhow::anyhow!("HTTP server failed: {err}"))
    });

    let mut grpc_shutdown = shutdown_rx.clone();
    let grpc_state = state.clone();
    let mut grpc_task: JoinHandle<Result<()>> = tokio::spawn(async move {
        grpc::serve(grpc_state, grpc_listener, tls, async move {
            let _ = grpc_shutdown.changed().await;
        })
        .await
    });

    info!("controller ready");

    // Any listener exiting takes the rest down; the signal watcher
    // flips the same channel. Wait for both to finish within the
    // graceful deadline, then force.
    let first = tokio::select! {
        res = &mut http_task => ("HTTP", flatten(res)),
        res = &mut grpc_task => ("gRPC", flatten(res)),
    };
    let _ = shutdown_tx.send(true);
    if let (which, Err(err)) = &first {
        error!(listener = which, %err, "listener exited with error");
    }

    let remaining = match first.0 {
        "HTTP" => ("gRPC", grpc_task),
        _ => ("HTTP", http_task),
    };
    let (which, mut task) = remaining;
    let second = match tokio::time::timeout(SHUTDOWN_DEADLINE, &mut task).await {
        Ok(res) => flatten(res),
        Err(_elapsed) => {
            info!(listener = which, "graceful shutdown exceeded timeout, using force");
            task.abort();
            Ok(())
        }
    };

    first.1.and(second)
}

fn flatten(res: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match res {
        Ok(inner) => inner,
        Err(join_err) => Err(anyhow::anyhow!("listener task failed: {join_err}")),
    }
}

fn build_store(dsn: &str) -> Result<Store> {
    match dsn.split(':').next().unwrap_or_default() {
        "memory" | "mem" => Ok(Arc::new(MemoryStore::new())),
        other => anyhow::bail!("unsupported persistence DSN scheme: {other}"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => stream.recv().await,
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                None
            }
        };
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("received SIGTERM, shutting down");
        },
    }
}

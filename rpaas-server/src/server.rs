//! HTTP server
//!
//! Serves the API router over plain TCP or TLS. Every connection speaks
//! HTTP/1.1 (with WebSocket upgrades) or HTTP/2, prior knowledge included,
//! so h2c exec clients work without TLS.
//!
//! Shutdown: the first SIGINT/SIGTERM cancels the shared token. The accept
//! loop stops, open connections finish their in-flight requests, streaming
//! sessions are cancelled, and the process waits up to the configured
//! timeout for all of it. A second signal exits right away.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use rpaas_operator::ClusterFactory;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::api::{self, metrics, AppState};
use crate::config::Config;

// ============================================================================
// TLS
// ============================================================================

/// Builds a TLS acceptor from PEM files, advertising h2 and http/1.1.
pub fn load_tls(certificate: &Path, key: &Path) -> Result<TlsAcceptor> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut reader = BufReader::new(
        File::open(certificate)
            .with_context(|| format!("Failed to open certificate {}", certificate.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to parse certificate chain")?;
    if certs.is_empty() {
        anyhow::bail!("No certificate found in {}", certificate.display());
    }

    let mut reader = BufReader::new(
        File::open(key).with_context(|| format!("Failed to open key {}", key.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut reader)
        .context("Failed to parse private key")?
        .ok_or_else(|| anyhow::anyhow!("No private key found"))?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Invalid certificate/key pair")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

// ============================================================================
// Accept loop
// ============================================================================

/// Accepts connections until `shutdown` fires. Connections are spawned on
/// `connections` so the caller can wait for them to drain.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    tls: Option<TlsAcceptor>,
    shutdown: CancellationToken,
    connections: TaskTracker,
) -> Result<()> {
    let builder = Builder::new(TokioExecutor::new());
    let service = TowerToHyperService::new(router);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // e.g. EMFILE; back off instead of spinning
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
            _ = shutdown.cancelled() => break,
        };
        let _ = stream.set_nodelay(true);

        let builder = builder.clone();
        let service = service.clone();
        let tls = tls.clone();
        let shutdown = shutdown.clone();
        connections.spawn(async move {
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_connection(builder, service, stream, peer, shutdown).await,
                    Err(e) => debug!(peer = %peer, error = %e, "TLS handshake failed"),
                },
                None => serve_connection(builder, service, stream, peer, shutdown).await,
            }
        });
    }

    info!("Stopped accepting connections");
    Ok(())
}

async fn serve_connection<I>(
    builder: Builder<TokioExecutor>,
    service: TowerToHyperService<Router>,
    io: I,
    peer: SocketAddr,
    shutdown: CancellationToken,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        debug!(peer = %peer, error = %e, "Connection closed with error");
    }
}

// ============================================================================
// Signals
// ============================================================================

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate() => {}
    }
}

/// Waits for every tracked task, up to `timeout`. Returns false on timeout.
pub async fn drain(trackers: &[&TaskTracker], timeout: Duration) -> bool {
    for tracker in trackers {
        tracker.close();
    }
    let all = futures::future::join_all(trackers.iter().map(|t| t.wait()));
    tokio::time::timeout(timeout, all).await.is_ok()
}

/// Like [`drain`], but gives up as soon as `interrupt` completes, in which
/// case it returns `None`.
pub async fn drain_until<F>(trackers: &[&TaskTracker], timeout: Duration, interrupt: F) -> Option<bool>
where
    F: std::future::Future<Output = ()>,
{
    tokio::select! {
        drained = drain(trackers, timeout) => Some(drained),
        _ = interrupt => None,
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Runs the API server with `config` until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let factory = ClusterFactory::new(
        config.clusters.clone(),
        config.kubernetes_settings(),
        config.purge.clone(),
    );
    let tls = match (&config.tls_certificate, &config.tls_key) {
        (Some(cert), Some(key)) => Some(load_tls(cert, key)?),
        _ => None,
    };

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    let local = listener.local_addr()?;
    let shutdown_timeout = config.shutdown_timeout;

    let state = AppState::new(Arc::new(factory), config).with_metrics(metrics::init_metrics_recorder());
    let shutdown = state.shutdown.clone();
    let sessions = state.sessions.clone();
    let router = api::create_router(state);
    let connections = TaskTracker::new();

    info!(
        address = %local,
        tls = tls.is_some(),
        "rpaas API listening"
    );

    let server = tokio::spawn(serve(
        listener,
        router,
        tls,
        shutdown.clone(),
        connections.clone(),
    ));

    shutdown_signal().await;
    info!("Shutdown signal received, draining connections");
    shutdown.cancel();

    let trackers = [&sessions, &connections];
    match drain_until(&trackers, shutdown_timeout, shutdown_signal()).await {
        Some(true) => {}
        Some(false) => warn!(timeout = ?shutdown_timeout, "Shutdown timed out with sessions still open"),
        None => {
            warn!("Second signal received, exiting immediately");
            return Ok(());
        }
    }

    match server.await {
        Ok(result) => result?,
        Err(e) => error!(error = %e, "Server task failed"),
    }
    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_waits_for_tracked_tasks() {
        let sessions = TaskTracker::new();
        let connections = TaskTracker::new();
        sessions.spawn(tokio::time::sleep(Duration::from_millis(20)));
        connections.spawn(async {});

        let trackers = [&sessions, &connections];
        let drained = drain_until(&trackers, Duration::from_secs(1), std::future::pending()).await;
        assert_eq!(drained, Some(true));
    }

    #[tokio::test]
    async fn drain_reports_timeouts() {
        let sessions = TaskTracker::new();
        sessions.spawn(std::future::pending::<()>());
        let drained = drain_until(&[&sessions], Duration::from_millis(20), std::future::pending()).await;
        assert_eq!(drained, Some(false));
    }

    #[tokio::test]
    async fn second_signal_interrupts_drain() {
        let sessions = TaskTracker::new();
        sessions.spawn(std::future::pending::<()>());
        let drained = drain_until(&[&sessions], Duration::from_secs(30), async {}).await;
        assert_eq!(drained, None);
    }
}

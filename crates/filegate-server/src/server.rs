//! Server lifecycle: bind, serve, graceful shutdown.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::AppState;

pub struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<anyhow::Result<()>>>,
}

impl RunningServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(join) = self.join.take() {
            join.await.context("gateway task panicked")??;
        }
        Ok(())
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

pub async fn start(mut config: Config) -> anyhow::Result<RunningServer> {
    // Containment compares canonical paths, so the root itself must be
    // canonical before any request is served.
    config.root = tokio::fs::canonicalize(&config.root)
        .await
        .with_context(|| format!("resolve serving root {}", config.root.display()))?;

    let bind_addr = config.listen;
    let state = AppState::new(config)?;
    let app = crate::app(state)
        .into_make_service_with_connect_info::<SocketAddr>();

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    let addr = listener.local_addr().context("read bound address")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("serve")?;
        Ok(())
    });

    tracing::info!(%addr, "gateway listening");
    Ok(RunningServer {
        addr,
        shutdown_tx: Some(shutdown_tx),
        join: Some(join),
    })
}

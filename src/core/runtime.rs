//! Runtime orchestration: builds the store and router, resolves the
//! advertised hostname, starts the listeners and waits for shutdown.

use crate::config::{Config, StoreKind};
use crate::net::{aws, update, ws};
use crate::ops::metrics::Metrics;
use crate::pinger::{NoopPinger, Pinger};
use crate::router::peers::PeerClient;
use crate::router::Router;
use crate::storage::{MemoryStore, NoStore, Store};
use crate::telemetry::{self, LogHandle};
use crate::time::{Clock, PingGate};
use crate::worker::WorkerCtx;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const METADATA_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Addresses the runtime actually bound, for callers that configured
/// ephemeral ports.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeAddrs {
    pub ws: SocketAddr,
    pub update: SocketAddr,
}

pub struct Runtime<C: Clock> {
    config: Config,
    clock: C,
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
    router: Option<Arc<Router>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    log_handle: Option<LogHandle>,
}

impl<C: Clock> Runtime<C> {
    pub fn new(config: Config, clock: C, log_handle: Option<LogHandle>) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let store: Arc<dyn Store> = match config.db.store {
            StoreKind::Memory => Arc::new(MemoryStore::new(config.db.max_channels)),
            StoreKind::None => Arc::new(NoStore::new(config.db.max_channels)),
        };
        Ok(Self {
            config,
            clock,
            store,
            metrics: Arc::new(Metrics::default()),
            router: None,
            shutdown_tx,
            shutdown_rx,
            log_handle,
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Router, available once `start` has run.
    pub fn router(&self) -> Option<Arc<Router>> {
        self.router.clone()
    }

    /// Ask the runtime to exit its `run` loop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Bind every listener and spawn their accept loops. Returns the
    /// bound addresses.
    pub async fn start(&mut self) -> Result<RuntimeAddrs> {
        let hostname = self.advertised_hostname().await;

        // The ingress must be bound before the router exists: minted
        // endpoints embed its real port.
        let update_listener = update::bind(&self.config.server.update_bind).await?;
        let update_addr = update_listener
            .local_addr()
            .context("update ingress local_addr")?;
        let endpoint_base = format!(
            "{}://{}:{}",
            self.config.server.scheme,
            hostname,
            update_addr.port()
        );
        tracing::info!("advertising endpoints under {endpoint_base}");

        let pinger: Arc<dyn Pinger> = Arc::new(NoopPinger);
        let peers = PeerClient::new(
            self.config.cluster.peers.clone(),
            Duration::from_millis(self.config.cluster.forward_timeout_ms),
        );
        let router = Arc::new(Router::new(
            self.config.cluster.node_id.clone(),
            endpoint_base,
            self.store.clone(),
            pinger,
            peers,
            self.metrics.clone(),
        ));
        update::serve(update_listener, router.clone());

        let ctx = WorkerCtx {
            router: router.clone(),
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
            hello_timeout: self.config.socket.hello_timeout,
            ping_gate: PingGate::new(Duration::from_secs(self.config.client.min_ping_interval)),
            long_pongs: self.config.push.long_pongs,
            redirect: self.config.db.redirect.clone(),
            max_frame_bytes: self.config.socket.max_frame_bytes,
        };
        let ws_addr = ws::start(&self.config.server.ws_bind, ctx).await?;

        if let Some(bind) = self.config.telemetry.metrics_bind.clone() {
            telemetry::start_http(&bind, self.metrics.clone(), self.log_handle.clone()).await?;
        }

        self.router = Some(router);
        Ok(RuntimeAddrs {
            ws: ws_addr,
            update: update_addr,
        })
    }

    /// Start the runtime and block until ctrl-c or [`Runtime::shutdown`].
    pub async fn run(&mut self) -> Result<()> {
        let addrs = self.start().await?;
        tracing::info!(
            "pushgate node {} up: ws={} update={}",
            self.config.cluster.node_id,
            addrs.ws,
            addrs.update
        );
        self.handle_shutdown().await
    }

    async fn handle_shutdown(&mut self) -> Result<()> {
        let mut rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("ctrl-c received; shutting down");
            }
            _ = rx.changed() => {
                tracing::info!("shutdown requested");
            }
        }
        Ok(())
    }

    async fn advertised_hostname(&self) -> String {
        if !self.config.server.resolve_aws_hostname {
            return self.config.server.hostname.clone();
        }
        match aws::public_hostname(METADATA_PROBE_TIMEOUT).await {
            Ok(hostname) => {
                tracing::info!("using metadata-derived hostname {hostname}");
                hostname
            }
            Err(err) => {
                tracing::warn!(
                    "metadata probe failed ({err}); falling back to {}",
                    self.config.server.hostname
                );
                self.config.server.hostname.clone()
            }
        }
    }
}

//! WebSocket listener.
//!
//! Accepts upgrades and hands each connection to its own worker task.
//! Accept and handshake failures are logged and never take the
//! listener down.

use crate::session::SessionHandle;
use crate::time::Clock;
use crate::worker::{self, WorkerCtx};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Bind the listener and spawn the accept loop. Returns the bound
/// address (useful with an ephemeral port).
pub async fn start<C>(bind: &str, ctx: WorkerCtx<C>) -> Result<SocketAddr>
where
    C: Clock,
{
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind websocket listener on {bind}"))?;
    let addr = listener.local_addr()?;
    tracing::info!("websocket listener bound on {addr}");

    tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!("websocket accept error: {err:?}");
                    continue;
                }
            };
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let ws = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(err) => {
                        tracing::warn!("websocket handshake failed peer={peer}: {err}");
                        return;
                    }
                };
                ctx.metrics.incr("client.socket.connect");
                let (handle, control) = SessionHandle::channel();
                worker::run(ctx.clone(), ws, peer, control, handle).await;
                ctx.metrics.incr("client.socket.disconnect");
            });
        }
    });
    Ok(addr)
}

//! The client protocol state machine.
//!
//! One worker per connection. The worker owns the socket and the
//! session record and runs a single `tokio::select!` loop over the
//! inbound frame stream, the control channel and the hello deadline,
//! so socket writes are serialized by construction. External
//! components reach the worker only through its [`SessionHandle`].

use crate::error::ProtoError;
use crate::id;
use crate::ops::metrics::Metrics;
use crate::proto::{self, Frame, Update, MAX_ID_LEN};
use crate::router::Router;
use crate::session::{ControlEvent, Session, SessionHandle, SessionState};
use crate::storage::Store;
use crate::time::{Clock, Deadline, PingGate};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Shared wiring handed to every worker.
#[derive(Clone)]
pub struct WorkerCtx<C: Clock> {
    pub router: Arc<Router>,
    pub store: Arc<dyn Store>,
    pub metrics: Arc<Metrics>,
    pub clock: C,
    /// Sessions that have not completed hello by this deadline close.
    pub hello_timeout: Duration,
    /// Rate limit on client pings.
    pub ping_gate: PingGate,
    /// Reply to pings with a full frame instead of `{}`.
    pub long_pongs: bool,
    /// When set, every hello is answered with a 302 and the session
    /// closes.
    pub redirect: Option<String>,
    /// Frames larger than this are a protocol violation.
    pub max_frame_bytes: usize,
}

/// Run one session to completion. Returns when the socket drops, a
/// handler fails, the hello deadline fires, or the router evicts the
/// session.
pub async fn run<C, S>(
    ctx: WorkerCtx<C>,
    mut ws: WebSocketStream<S>,
    peer: SocketAddr,
    mut control: mpsc::Receiver<ControlEvent>,
    handle: SessionHandle,
) where
    C: Clock,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session::new(peer, ctx.clock.now());
    let hello_deadline = Deadline::after(session.born, ctx.hello_timeout);

    while !session.stopped {
        let hello_pending = session.state == SessionState::Inactive;
        let hello_remaining = hello_deadline.remaining(ctx.clock.now());

        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_text(&ctx, &mut session, &mut ws, &handle, &text).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    match std::str::from_utf8(&data) {
                        Ok(text) => {
                            handle_text(&ctx, &mut session, &mut ws, &handle, text).await;
                        }
                        Err(_) => {
                            tracing::debug!("non-utf8 frame peer={peer}");
                            session.stopped = true;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    session.stopped = true;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!("socket error peer={peer}: {err}");
                    session.stopped = true;
                }
            },
            event = control.recv() => match event {
                Some(ControlEvent::Flush { channel, version }) => {
                    if let Err(err) =
                        flush(&ctx, &mut session, &mut ws, 0, &channel, version).await
                    {
                        let _ = send(&mut ws, &proto::error_reply("notification", err)).await;
                        session.stopped = true;
                    }
                }
                Some(ControlEvent::Close) | None => {
                    session.stopped = true;
                }
            },
            () = ctx.clock.sleep(hello_remaining), if hello_pending => {
                tracing::warn!("hello timeout; closing socket peer={peer}");
                session.stopped = true;
            }
        }
    }

    if !session.uaid.is_empty() {
        ctx.router.release(&session.uaid, handle.id());
    }
    let _ = ws.close(None).await;
    tracing::debug!("session finished peer={peer} uaid={}", session.uaid);
}

/// Parse and dispatch one inbound text frame. Handler errors are
/// reported to the client and terminate the session; unparsable input
/// terminates it silently.
async fn handle_text<C, S>(
    ctx: &WorkerCtx<C>,
    session: &mut Session,
    ws: &mut WebSocketStream<S>,
    handle: &SessionHandle,
    text: &str,
) where
    C: Clock,
    S: AsyncRead + AsyncWrite + Unpin,
{
    if text.len() > ctx.max_frame_bytes {
        tracing::debug!("oversized frame peer={} len={}", session.peer, text.len());
        session.stopped = true;
        return;
    }
    let frame = match proto::parse(text) {
        Ok(frame) => frame,
        Err(_) => {
            tracing::debug!("unparsable frame peer={}", session.peer);
            session.stopped = true;
            return;
        }
    };
    let Some(message_type) = proto::message_type(&frame) else {
        let _ = send(ws, &proto::error_reply("", ProtoError::UnknownCommand)).await;
        session.stopped = true;
        return;
    };

    let result = match message_type.as_str() {
        "hello" => handle_hello(ctx, session, ws, handle, &frame).await,
        "register" => handle_register(ctx, session, ws, &frame).await,
        "unregister" => handle_unregister(ctx, session, ws, &frame).await,
        "ack" => handle_ack(ctx, session, ws, &frame).await,
        "ping" => handle_ping(ctx, session, ws).await,
        "purge" => handle_purge(session, ws).await,
        _ => Err(ProtoError::UnknownCommand),
    };
    if let Err(err) = result {
        tracing::debug!(
            "command {message_type} failed peer={} uaid={}: {err}",
            session.peer,
            session.uaid
        );
        let _ = send(ws, &proto::error_reply(&message_type, err)).await;
        session.stopped = true;
    }
}

/// Associate a UAID with this session, register it with the router
/// and flush any backlog.
async fn handle_hello<C, S>(
    ctx: &WorkerCtx<C>,
    session: &mut Session,
    ws: &mut WebSocketStream<S>,
    handle: &SessionHandle,
    frame: &Frame,
) -> Result<(), ProtoError>
where
    C: Clock,
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(redirect) = &ctx.redirect {
        send(ws, &proto::redirect_reply(302, redirect, &session.uaid)).await?;
        session.stopped = true;
        return Ok(());
    }

    let suggested = proto::str_field(frame, "uaid").unwrap_or_default();
    let channel_ids = match frame.get("channelIDs") {
        None | Some(serde_json::Value::Null) => return Err(ProtoError::MissingData),
        Some(serde_json::Value::Array(ids)) => ids,
        Some(_) => return Err(ProtoError::InvalidData),
    };
    if !session.uaid.is_empty() && !suggested.is_empty() && session.uaid != suggested {
        // the session already speaks for another agent
        return Err(ProtoError::InvalidChannel);
    }
    if id::filter_rejects(suggested) {
        return Err(ProtoError::InvalidChannel);
    }

    let mut force_reset = false;
    if session.uaid.is_empty() {
        if suggested.len() > MAX_ID_LEN {
            return Err(ProtoError::InvalidData);
        }
        session.uaid = suggested.to_string();
        if session.uaid.is_empty() {
            force_reset = true;
        } else if ctx.router.collides(&session.uaid) {
            // the UAID is live on another node; the client gets a
            // fresh identity here
            force_reset = true;
        }
        if channel_ids.len() > ctx.store.max_channels() {
            force_reset = true;
        }
        if !channel_ids.is_empty() && !ctx.store.exists(&session.uaid) {
            // the client claims channels for an agent the store has
            // never seen
            force_reset = true;
        }
    }
    if force_reset {
        if !session.uaid.is_empty() {
            tracing::warn!("resetting UAID for device uaid={}", session.uaid);
            if let Err(err) = ctx.store.drop_all(&session.uaid) {
                tracing::warn!("purge failed uaid={}: {err}", session.uaid);
            }
        }
        session.uaid = id::generate();
    }

    if let Some(connect) = frame.get("connect") {
        if !connect.is_null() {
            ctx.router.register_connect(&session.uaid, connect);
        }
    }
    ctx.router
        .claim(&session.uaid, handle.clone())
        .map_err(|_| ProtoError::Server)?;

    send(ws, &proto::hello_reply(200, &session.uaid)).await?;
    session.state = SessionState::Active;
    ctx.metrics.incr("updates.client.hello");
    flush(ctx, session, ws, 0, "", 0).await
}

async fn handle_register<C, S>(
    ctx: &WorkerCtx<C>,
    session: &mut Session,
    ws: &mut WebSocketStream<S>,
    frame: &Frame,
) -> Result<(), ProtoError>
where
    C: Clock,
    S: AsyncRead + AsyncWrite + Unpin,
{
    if session.state != SessionState::Active {
        return Err(ProtoError::InvalidCommand);
    }
    let chid = proto::str_field(frame, "channelID").ok_or(ProtoError::InvalidData)?;
    if chid.is_empty() || chid.len() > MAX_ID_LEN || id::filter_rejects(chid) {
        return Err(ProtoError::InvalidData);
    }
    ctx.store.register(&session.uaid, chid, 0)?;
    let endpoint = ctx
        .router
        .make_endpoint(&session.uaid, chid)
        .ok_or(ProtoError::Server)?;
    send(ws, &proto::register_reply(&session.uaid, chid, &endpoint)).await?;
    ctx.metrics.incr("updates.client.register");
    Ok(())
}

/// Unregistration is advisory: storage failures are logged and the
/// client still sees success.
async fn handle_unregister<C, S>(
    ctx: &WorkerCtx<C>,
    session: &mut Session,
    ws: &mut WebSocketStream<S>,
    frame: &Frame,
) -> Result<(), ProtoError>
where
    C: Clock,
    S: AsyncRead + AsyncWrite + Unpin,
{
    if session.state != SessionState::Active {
        return Err(ProtoError::InvalidCommand);
    }
    let chid = proto::str_field(frame, "channelID").ok_or(ProtoError::MissingData)?;
    if chid.is_empty() {
        return Err(ProtoError::MissingData);
    }
    if let Err(err) = ctx.store.unregister(&session.uaid, chid) {
        tracing::debug!("unregister ignored uaid={} chid={chid}: {err}", session.uaid);
    }
    send(ws, &proto::unregister_reply(chid)).await?;
    ctx.metrics.incr("updates.client.unregister");
    Ok(())
}

/// Retire delivered updates, then re-flush anything that arrived
/// during the client's round-trip.
async fn handle_ack<C, S>(
    ctx: &WorkerCtx<C>,
    session: &mut Session,
    ws: &mut WebSocketStream<S>,
    frame: &Frame,
) -> Result<(), ProtoError>
where
    C: Clock,
    S: AsyncRead + AsyncWrite + Unpin,
{
    if session.state != SessionState::Active {
        return Err(ProtoError::InvalidCommand);
    }
    let raw = match frame.get("updates") {
        None | Some(serde_json::Value::Null) => return Err(ProtoError::MissingData),
        Some(value) => value,
    };
    let updates: Vec<Update> =
        serde_json::from_value(raw.clone()).map_err(|_| ProtoError::InvalidData)?;
    ctx.store.ack(&session.uaid, &updates)?;
    ctx.metrics.incr("updates.client.ack");
    flush(ctx, session, ws, 0, "", 0).await
}

async fn handle_ping<C, S>(
    ctx: &WorkerCtx<C>,
    session: &mut Session,
    ws: &mut WebSocketStream<S>,
) -> Result<(), ProtoError>
where
    C: Clock,
    S: AsyncRead + AsyncWrite + Unpin,
{
    if session.state != SessionState::Active {
        return Err(ProtoError::InvalidCommand);
    }
    let now = ctx.clock.now();
    if !ctx.ping_gate.permits(session.last_ping, now) {
        ctx.metrics.incr("updates.client.too_many_pings");
        return Err(ProtoError::TooManyPings);
    }
    session.last_ping = Some(now);
    send(ws, &proto::ping_reply(ctx.long_pongs)).await?;
    ctx.metrics.incr("updates.client.ping");
    Ok(())
}

/// Testing-only no-op.
async fn handle_purge<S>(
    session: &mut Session,
    ws: &mut WebSocketStream<S>,
) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if session.state != SessionState::Active {
        return Err(ProtoError::InvalidCommand);
    }
    send(ws, &proto::purge_reply()).await
}

/// Deliver pending updates. With an empty `channel` the whole backlog
/// is fetched from storage; otherwise a single synthesized update is
/// written (the router injecting a specific version). Empty results
/// write nothing.
async fn flush<C, S>(
    ctx: &WorkerCtx<C>,
    session: &mut Session,
    ws: &mut WebSocketStream<S>,
    last_accessed: i64,
    channel: &str,
    version: i64,
) -> Result<(), ProtoError>
where
    C: Clock,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let start = ctx.clock.now();
    if session.uaid.is_empty() {
        session.stopped = true;
        return Ok(());
    }
    let (updates, expired) = if channel.is_empty() {
        ctx.store.fetch_all(&session.uaid, last_accessed)?
    } else {
        (
            vec![Update {
                channel_id: channel.to_string(),
                version,
            }],
            Vec::new(),
        )
    };
    if updates.is_empty() && expired.is_empty() {
        return Ok(());
    }
    send(ws, &proto::notification(&updates, &expired)).await?;
    ctx.metrics.add("updates.sent", updates.len() as u64);
    ctx.metrics
        .time("client.flush", ctx.clock.now().duration_since(start));
    Ok(())
}

async fn send<S>(ws: &mut WebSocketStream<S>, text: &str) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ws.send(Message::Text(text.to_string().into()))
        .await
        .map_err(|_| ProtoError::Server)
}

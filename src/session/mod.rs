//! Per-connection session state and the narrow session capability.
//!
//! A `Session` is owned by its worker; nothing else touches it. The
//! rest of the system (the router, peer eviction) holds only a
//! [`SessionHandle`], a push/close capability backed by the worker's
//! control channel.

pub mod worker;

use crate::proto::Update;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;

/// Control-channel depth per session. Updates beyond this are not
/// lost: they stay pending in storage until the next flush.
const CONTROL_QUEUE_DEPTH: usize = 64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, hello not yet accepted.
    Inactive,
    /// Hello accepted; UAID fixed for the session.
    Active,
}

/// Mutable per-connection record, owned by the worker.
#[derive(Debug)]
pub struct Session {
    pub peer: SocketAddr,
    pub born: Instant,
    /// Empty until hello succeeds, then fixed.
    pub uaid: String,
    pub state: SessionState,
    /// Time of the last client-origin ping.
    pub last_ping: Option<Instant>,
    /// One-way flag; once set the session terminates.
    pub stopped: bool,
}

impl Session {
    pub fn new(peer: SocketAddr, born: Instant) -> Self {
        Self {
            peer,
            born,
            uaid: String::new(),
            state: SessionState::Inactive,
            last_ping: None,
            stopped: false,
        }
    }
}

/// Events delivered to a worker from outside its read loop.
#[derive(Debug)]
pub enum ControlEvent {
    /// Deliver one update (or, with an empty channel, re-flush the
    /// whole backlog).
    Flush { channel: String, version: i64 },
    /// Asynchronous termination; idempotent.
    Close,
}

/// Push/close capability for one session. Safe to call from any task;
/// never blocks the caller.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    tx: mpsc::Sender<ControlEvent>,
}

impl SessionHandle {
    /// Create a handle plus the control receiver its worker drains.
    pub fn channel() -> (Self, mpsc::Receiver<ControlEvent>) {
        let (tx, rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let handle = Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        };
        (handle, rx)
    }

    /// Unique id, used to guard registry release against eviction
    /// races.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a single update for delivery. A full queue drops the
    /// wake; the stored version is picked up by the next flush.
    pub fn push(&self, update: Update) {
        let event = ControlEvent::Flush {
            channel: update.channel_id,
            version: update.version,
        };
        if let Err(err) = self.tx.try_send(event) {
            tracing::debug!("session {} wake dropped: {err}", self.id);
        }
    }

    /// Ask the worker to terminate. The close must arrive even when
    /// the queue is full, so a blocked send is retried off-task.
    pub fn close(&self) {
        match self.tx.try_send(ControlEvent::Close) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(event).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_delivers_flush_events() {
        let (handle, mut rx) = SessionHandle::channel();
        handle.push(Update {
            channel_id: "abc123".into(),
            version: 7,
        });
        match rx.recv().await.unwrap() {
            ControlEvent::Flush { channel, version } => {
                assert_eq!(channel, "abc123");
                assert_eq!(version, 7);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_arrives_even_when_queue_is_full() {
        let (handle, mut rx) = SessionHandle::channel();
        for v in 0..(CONTROL_QUEUE_DEPTH as i64 + 8) {
            handle.push(Update {
                channel_id: "abc123".into(),
                version: v,
            });
        }
        handle.close();
        let mut saw_close = false;
        while let Ok(event) = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            rx.recv(),
        )
        .await
        {
            match event {
                Some(ControlEvent::Close) => {
                    saw_close = true;
                    break;
                }
                Some(ControlEvent::Flush { .. }) => {}
                None => break,
            }
        }
        assert!(saw_close);
    }

    #[test]
    fn handles_have_unique_ids() {
        let (a, _rx_a) = SessionHandle::channel();
        let (b, _rx_b) = SessionHandle::channel();
        assert_ne!(a.id(), b.id());
    }
}

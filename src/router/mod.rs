//! Fleet UAID ownership, endpoint minting and update fan-in.
//!
//! The router is the single shared mutable structure between
//! sessions: a registry mapping each UAID to the node that owns its
//! live session and, when owned here, the session's push/close
//! handle. The registry lock is never held across an await.

pub mod peers;

use crate::error::ProtoError;
use crate::ops::metrics::Metrics;
use crate::pinger::Pinger;
use crate::proto::Update;
use crate::session::SessionHandle;
use crate::storage::{self, Store, StoreError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use peers::PeerClient;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Where an ingested update ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Version at or below the stored floor; dropped silently.
    Dropped,
    /// Handed to a local session's worker.
    Delivered,
    /// Forwarded to the owning node.
    Forwarded,
    /// Persisted only; no live session anywhere.
    Stored,
}

pub struct Router {
    node_id: String,
    /// Advertised base URL embedded in minted endpoints.
    endpoint_base: String,
    /// Live local sessions by UAID. Remote ownership lives in the
    /// store's fleet record.
    registry: Mutex<HashMap<String, SessionHandle>>,
    store: Arc<dyn Store>,
    pinger: Arc<dyn Pinger>,
    peers: PeerClient,
    metrics: Arc<Metrics>,
}

impl Router {
    pub fn new(
        node_id: String,
        endpoint_base: String,
        store: Arc<dyn Store>,
        pinger: Arc<dyn Pinger>,
        peers: PeerClient,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            node_id,
            endpoint_base,
            registry: Mutex::new(HashMap::new()),
            store,
            pinger,
            peers,
            metrics,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Record that this node owns the UAID's live session. The most
    /// recent claim wins: a prior local owner is closed, a prior
    /// remote owner is asked (best-effort) to close its session.
    pub fn claim(&self, uaid: &str, handle: SessionHandle) -> Result<(), StoreError> {
        let prior_node = self.store.get_uaid_node(uaid);
        let evicted = self.registry.lock().insert(uaid.to_string(), handle);
        if let Some(prior_handle) = evicted {
            tracing::info!("evicting prior session uaid={uaid}");
            self.metrics.incr("router.evict.local");
            prior_handle.close();
        } else if let Some(node) = prior_node {
            if node != self.node_id {
                self.metrics.incr("router.evict.remote");
                let peers = self.peers.clone();
                let uaid = uaid.to_string();
                tokio::spawn(async move {
                    if let Err(err) = peers.evict(&node, &uaid).await {
                        tracing::warn!("remote evict failed node={node} uaid={uaid}: {err}");
                    }
                });
            }
        }
        self.store.set_uaid_node(uaid, &self.node_id)
    }

    /// Whether a live session owns this UAID on this node.
    pub fn owns_locally(&self, uaid: &str) -> bool {
        self.registry.lock().contains_key(uaid)
    }

    /// Collision check for hello. A session live on another node
    /// forces a reset (the reconnect-elsewhere path) and the stale
    /// owner is asked, best-effort, to close. A local session is not
    /// a collision: the newer claim simply evicts it.
    pub fn collides(&self, uaid: &str) -> bool {
        if self.registry.lock().contains_key(uaid) {
            return false;
        }
        match self.store.get_uaid_node(uaid) {
            Some(node) if node != self.node_id => {
                self.metrics.incr("router.evict.remote");
                let peers = self.peers.clone();
                let uaid = uaid.to_string();
                tokio::spawn(async move {
                    if let Err(err) = peers.evict(&node, &uaid).await {
                        tracing::warn!("remote evict failed node={node} uaid={uaid}: {err}");
                    }
                });
                true
            }
            _ => false,
        }
    }

    /// Remove a session's registry entry on worker exit. Guarded by
    /// the handle id: an evicted worker must not delete its
    /// evictor's entry. The fleet ownership record is cleared with
    /// the same guard.
    pub fn release(&self, uaid: &str, handle_id: u64) {
        let owned_here = {
            let mut registry = self.registry.lock();
            let owned_here = registry
                .get(uaid)
                .map(|handle| handle.id() == handle_id)
                .unwrap_or(false);
            if owned_here {
                registry.remove(uaid);
            }
            owned_here
        };
        if owned_here {
            if let Err(err) = self.store.clear_uaid_node(uaid, &self.node_id) {
                tracing::debug!("ownership record not cleared uaid={uaid}: {err}");
            }
        }
    }

    /// Mint the opaque endpoint URL for a (UAID, CHID) pair.
    pub fn make_endpoint(&self, uaid: &str, chid: &str) -> Option<String> {
        let key = storage::ids_to_key(uaid, chid)?;
        let token = URL_SAFE_NO_PAD.encode(key.as_bytes());
        Some(format!("{}/update/{token}", self.endpoint_base))
    }

    /// Ingest one published update: persist the version, then wake
    /// the owning session, forward to the owning node, or leave it
    /// pending for the next reconnect.
    pub fn submit_update(&self, token: &str, version: i64) -> Result<RouteOutcome, ProtoError> {
        let (uaid, chid, key) = decode_token(token)?;
        let stored = self.store.update(&key, version)?;
        if !stored {
            self.metrics.incr("updates.routed.dropped");
            return Ok(RouteOutcome::Dropped);
        }

        if self.push_local(&uaid, &chid, version) {
            self.metrics.incr("updates.routed.local");
            return Ok(RouteOutcome::Delivered);
        }
        if let Some(node) = self.store.get_uaid_node(&uaid) {
            if node != self.node_id {
                self.metrics.incr("updates.routed.remote");
                let peers = self.peers.clone();
                let token = token.to_string();
                tokio::spawn(async move {
                    if let Err(err) = peers.forward_update(&node, &token, version).await {
                        tracing::warn!("forward failed node={node}: {err}");
                    }
                });
                return Ok(RouteOutcome::Forwarded);
            }
        }
        self.metrics.incr("updates.routed.stored");
        match self.pinger.wake(&uaid, version) {
            Ok(true) => self.metrics.incr("updates.routed.pinged"),
            Ok(false) => {}
            Err(err) => tracing::warn!("{} wake failed uaid={uaid}: {err}", self.pinger.name()),
        }
        Ok(RouteOutcome::Stored)
    }

    /// Terminal delivery of a peer-forwarded update. Never forwards
    /// again, so stale ownership records cannot create routing loops.
    pub fn deliver_forwarded(&self, token: &str, version: i64) -> Result<RouteOutcome, ProtoError> {
        let (uaid, chid, _key) = decode_token(token)?;
        if self.push_local(&uaid, &chid, version) {
            self.metrics.incr("updates.routed.local");
            Ok(RouteOutcome::Delivered)
        } else {
            self.metrics.incr("updates.routed.stored");
            Ok(RouteOutcome::Stored)
        }
    }

    /// Close the local session for a UAID, if any. Used when another
    /// node claims the UAID.
    pub fn evict_local(&self, uaid: &str) {
        let handle = self.registry.lock().remove(uaid);
        if let Some(handle) = handle {
            tracing::info!("evicted by remote claim uaid={uaid}");
            self.metrics.incr("router.evict.local");
            handle.close();
        }
    }

    /// Hand the hello `connect` blob to the pinger and persist it.
    pub fn register_connect(&self, uaid: &str, connect: &Value) {
        let blob = connect.to_string();
        if let Err(err) = self.store.put_ping(uaid, blob.as_bytes()) {
            tracing::warn!("connect blob not stored uaid={uaid}: {err}");
        }
        if let Err(err) = self.pinger.register(uaid, connect) {
            tracing::warn!("{} register failed uaid={uaid}: {err}", self.pinger.name());
        }
    }

    fn push_local(&self, uaid: &str, chid: &str, version: i64) -> bool {
        let registry = self.registry.lock();
        let Some(handle) = registry.get(uaid) else {
            return false;
        };
        handle.push(Update {
            channel_id: chid.to_string(),
            version,
        });
        true
    }
}

fn decode_token(token: &str) -> Result<(String, String, String), ProtoError> {
    let raw = URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| ProtoError::InvalidData)?;
    let key = String::from_utf8(raw).map_err(|_| ProtoError::InvalidData)?;
    let (uaid, chid) = storage::key_to_ids(&key).ok_or(ProtoError::InvalidData)?;
    Ok((uaid, chid, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinger::NoopPinger;
    use crate::session::ControlEvent;
    use crate::storage::MemoryStore;

    fn router_with_store() -> (Arc<Router>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(200));
        let router = Arc::new(Router::new(
            "node-a".to_string(),
            "http://localhost:8081".to_string(),
            store.clone(),
            Arc::new(NoopPinger),
            PeerClient::new(HashMap::new(), std::time::Duration::from_secs(1)),
            Arc::new(Metrics::default()),
        ));
        (router, store)
    }

    fn token_for(router: &Router, uaid: &str, chid: &str) -> String {
        let endpoint = router.make_endpoint(uaid, chid).unwrap();
        endpoint.rsplit('/').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn claim_evicts_prior_local_session() {
        let (router, _store) = router_with_store();
        let (first, mut first_rx) = SessionHandle::channel();
        let (second, _second_rx) = SessionHandle::channel();
        router.claim("uaid-1", first).unwrap();
        router.claim("uaid-1", second).unwrap();
        match first_rx.recv().await {
            Some(ControlEvent::Close) => {}
            other => panic!("expected close, got {other:?}"),
        }
        assert!(router.owns_locally("uaid-1"));
    }

    #[tokio::test]
    async fn release_ignores_evicted_handles() {
        let (router, _store) = router_with_store();
        let (first, _rx1) = SessionHandle::channel();
        let first_id = first.id();
        let (second, _rx2) = SessionHandle::channel();
        router.claim("uaid-1", first).unwrap();
        router.claim("uaid-1", second).unwrap();
        // the evicted worker exits and must not clear the new owner
        router.release("uaid-1", first_id);
        assert!(router.owns_locally("uaid-1"));
    }

    #[tokio::test]
    async fn submit_update_delivers_to_local_owner() {
        let (router, _store) = router_with_store();
        let (handle, mut rx) = SessionHandle::channel();
        router.claim("aabb01", handle).unwrap();
        let token = token_for(&router, "aabb01", "ccdd02");
        let outcome = router.submit_update(&token, 7).unwrap();
        assert_eq!(outcome, RouteOutcome::Delivered);
        match rx.recv().await {
            Some(ControlEvent::Flush { channel, version }) => {
                assert_eq!(channel, "ccdd02");
                assert_eq!(version, 7);
            }
            other => panic!("expected flush, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_update_drops_stale_versions() {
        let (router, _store) = router_with_store();
        let (handle, mut rx) = SessionHandle::channel();
        router.claim("aabb01", handle).unwrap();
        let token = token_for(&router, "aabb01", "ccdd02");
        assert_eq!(router.submit_update(&token, 7).unwrap(), RouteOutcome::Delivered);
        let _ = rx.recv().await;
        assert_eq!(router.submit_update(&token, 5).unwrap(), RouteOutcome::Dropped);
        assert_eq!(router.submit_update(&token, 7).unwrap(), RouteOutcome::Dropped);
        assert_eq!(router.submit_update(&token, 8).unwrap(), RouteOutcome::Delivered);
    }

    #[tokio::test]
    async fn submit_update_without_owner_is_stored() {
        let (router, store) = router_with_store();
        let token = token_for(&router, "aabb01", "ccdd02");
        assert_eq!(router.submit_update(&token, 7).unwrap(), RouteOutcome::Stored);
        let (pending, _) = store.fetch_all("aabb01", 0).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].version, 7);
    }

    #[tokio::test]
    async fn collisions_are_remote_only() {
        let (router, store) = router_with_store();
        // a local session is not a collision; the claim evicts it
        let (handle, _rx) = SessionHandle::channel();
        router.claim("uaid-1", handle).unwrap();
        assert!(!router.collides("uaid-1"));
        // a session recorded on another node is
        store.set_uaid_node("uaid-2", "node-b").unwrap();
        assert!(router.collides("uaid-2"));
        // no record at all means no collision
        assert!(!router.collides("uaid-3"));
    }

    #[tokio::test]
    async fn bad_tokens_are_rejected() {
        let (router, _store) = router_with_store();
        assert!(router.submit_update("%%%", 1).is_err());
        let bare = URL_SAFE_NO_PAD.encode(b"no-dot-in-key");
        assert!(router.submit_update(&bare, 1).is_err());
    }

    #[tokio::test]
    async fn evict_local_closes_the_session() {
        let (router, _store) = router_with_store();
        let (handle, mut rx) = SessionHandle::channel();
        router.claim("uaid-1", handle).unwrap();
        router.evict_local("uaid-1");
        match rx.recv().await {
            Some(ControlEvent::Close) => {}
            other => panic!("expected close, got {other:?}"),
        }
        assert!(!router.owns_locally("uaid-1"));
    }
}

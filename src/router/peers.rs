//! Inter-node forward plane.
//!
//! When an update arrives for a UAID whose live session sits on
//! another node, the router hands it over HTTP to the owner's
//! internal routes. Forwards and evicts are best-effort: the update
//! is already persisted, so a missed wake only delays delivery until
//! the next flush.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct PeerClient {
    /// node-id -> advertised base URL of the node's update listener.
    peers: Arc<HashMap<String, String>>,
    client: reqwest::Client,
}

impl PeerClient {
    pub fn new(peers: HashMap<String, String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            peers: Arc::new(peers),
            client,
        }
    }

    fn base(&self, node_id: &str) -> Result<&str> {
        self.peers
            .get(node_id)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("unknown peer node {node_id}"))
    }

    /// Hand an already-persisted update to the owning node for local
    /// delivery.
    pub async fn forward_update(&self, node_id: &str, token: &str, version: i64) -> Result<()> {
        let base = self.base(node_id)?;
        let url = format!("{base}/fwd/{token}");
        let resp = self
            .client
            .put(&url)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(format!("version={version}"))
            .send()
            .await
            .with_context(|| format!("forward to {node_id}"))?;
        if !resp.status().is_success() {
            return Err(anyhow!("peer {node_id} answered {}", resp.status()));
        }
        Ok(())
    }

    /// Ask a node to close its session for an evicted UAID.
    pub async fn evict(&self, node_id: &str, uaid: &str) -> Result<()> {
        let base = self.base(node_id)?;
        let url = format!("{base}/evict/{uaid}");
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("evict via {node_id}"))?;
        if !resp.status().is_success() {
            return Err(anyhow!("peer {node_id} answered {}", resp.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_peers_are_reported() {
        let client = PeerClient::new(HashMap::new(), Duration::from_millis(100));
        let err = client.forward_update("node-z", "token", 1).await.unwrap_err();
        assert!(err.to_string().contains("node-z"));
    }
}

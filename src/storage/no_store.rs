//! No-op store.
//!
//! Remembers nothing: `exists` is always false, writes succeed and
//! reads come back empty. The service degrades to best-effort
//! delivery for currently-connected clients. Reconnecting clients
//! that claim channels are force-reset, since the store has forgotten
//! their UAID.

use super::{Store, StoreError};
use crate::proto::Update;

pub struct NoStore {
    max_channels: usize,
}

impl NoStore {
    pub fn new(max_channels: usize) -> Self {
        Self { max_channels }
    }
}

impl Store for NoStore {
    fn max_channels(&self) -> usize {
        self.max_channels
    }

    fn exists(&self, _uaid: &str) -> bool {
        false
    }

    fn register(&self, _uaid: &str, _chid: &str, _version: i64) -> Result<(), StoreError> {
        Ok(())
    }

    fn update(&self, _key: &str, _version: i64) -> Result<bool, StoreError> {
        // Nothing persisted, so every version is new and deliverable.
        Ok(true)
    }

    fn unregister(&self, _uaid: &str, _chid: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn drop_channel(&self, _uaid: &str, _chid: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn fetch_all(
        &self,
        _uaid: &str,
        _since: i64,
    ) -> Result<(Vec<Update>, Vec<String>), StoreError> {
        Ok((Vec::new(), Vec::new()))
    }

    fn drop_all(&self, _uaid: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn ack(&self, _uaid: &str, _updates: &[Update]) -> Result<(), StoreError> {
        Ok(())
    }

    fn fetch_ping(&self, _uaid: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }

    fn put_ping(&self, _uaid: &str, _blob: &[u8]) -> Result<(), StoreError> {
        Ok(())
    }

    fn drop_ping(&self, _uaid: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn set_uaid_node(&self, _uaid: &str, _node_id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn get_uaid_node(&self, _uaid: &str) -> Option<String> {
        None
    }

    fn clear_uaid_node(&self, _uaid: &str, _node_id: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

//! In-memory store.
//!
//! Backs a single-node deployment and the test suite with full
//! contract semantics: monotone version floors, tombstoned
//! unregistration, ack retirement and the fleet ownership record.

use super::{ids_to_key, key_to_ids, Store, StoreError};
use crate::proto::Update;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Default)]
struct ChannelState {
    version: i64,
    pending: bool,
    deleted: bool,
    updated_at: i64,
}

#[derive(Debug, Default)]
struct UaidRecord {
    channels: HashMap<String, ChannelState>,
    ping: Option<Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    uaids: HashMap<String, UaidRecord>,
    nodes: HashMap<String, String>,
}

pub struct MemoryStore {
    max_channels: usize,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(max_channels: usize) -> Self {
        Self {
            max_channels,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

impl Store for MemoryStore {
    fn max_channels(&self) -> usize {
        self.max_channels
    }

    fn exists(&self, uaid: &str) -> bool {
        self.inner.lock().uaids.contains_key(uaid)
    }

    fn register(&self, uaid: &str, chid: &str, version: i64) -> Result<(), StoreError> {
        if ids_to_key(uaid, chid).is_none() {
            return Err(StoreError::InvalidKey);
        }
        let mut inner = self.inner.lock();
        let record = inner.uaids.entry(uaid.to_string()).or_default();
        let state = record.channels.entry(chid.to_string()).or_default();
        state.deleted = false;
        if version > state.version {
            state.version = version;
            state.pending = version > 0;
            state.updated_at = Self::now_millis();
        }
        Ok(())
    }

    fn update(&self, key: &str, version: i64) -> Result<bool, StoreError> {
        let (uaid, chid) = key_to_ids(key).ok_or(StoreError::InvalidKey)?;
        let mut inner = self.inner.lock();
        // The publisher holds a minted endpoint, so the channel record
        // is recreated even after a forced reset purged it.
        let record = inner.uaids.entry(uaid).or_default();
        let state = record.channels.entry(chid).or_default();
        if version <= state.version {
            return Ok(false);
        }
        state.version = version;
        state.pending = true;
        state.deleted = false;
        state.updated_at = Self::now_millis();
        Ok(true)
    }

    fn unregister(&self, uaid: &str, chid: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let record = inner.uaids.get_mut(uaid).ok_or(StoreError::NoRecord)?;
        let state = record.channels.get_mut(chid).ok_or(StoreError::NoRecord)?;
        state.deleted = true;
        state.pending = false;
        Ok(())
    }

    fn drop_channel(&self, uaid: &str, chid: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.uaids.get_mut(uaid) {
            record.channels.remove(chid);
        }
        Ok(())
    }

    fn fetch_all(&self, uaid: &str, since: i64) -> Result<(Vec<Update>, Vec<String>), StoreError> {
        let inner = self.inner.lock();
        let Some(record) = inner.uaids.get(uaid) else {
            return Ok((Vec::new(), Vec::new()));
        };
        let mut updates: Vec<Update> = record
            .channels
            .iter()
            .filter(|(_, state)| state.pending && !state.deleted && state.updated_at > since)
            .map(|(chid, state)| Update {
                channel_id: chid.clone(),
                version: state.version,
            })
            .collect();
        updates.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        Ok((updates, Vec::new()))
    }

    fn drop_all(&self, uaid: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.uaids.remove(uaid);
        inner.nodes.remove(uaid);
        Ok(())
    }

    fn ack(&self, uaid: &str, updates: &[Update]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let record = inner.uaids.get_mut(uaid).ok_or(StoreError::NoRecord)?;
        for acked in updates {
            if let Some(state) = record.channels.get_mut(&acked.channel_id) {
                if state.version <= acked.version {
                    state.pending = false;
                }
            }
        }
        Ok(())
    }

    fn fetch_ping(&self, uaid: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .inner
            .lock()
            .uaids
            .get(uaid)
            .and_then(|r| r.ping.clone()))
    }

    fn put_ping(&self, uaid: &str, blob: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.uaids.entry(uaid.to_string()).or_default().ping = Some(blob.to_vec());
        Ok(())
    }

    fn drop_ping(&self, uaid: &str) -> Result<(), StoreError> {
        if let Some(record) = self.inner.lock().uaids.get_mut(uaid) {
            record.ping = None;
        }
        Ok(())
    }

    fn set_uaid_node(&self, uaid: &str, node_id: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .nodes
            .insert(uaid.to_string(), node_id.to_string());
        Ok(())
    }

    fn get_uaid_node(&self, uaid: &str) -> Option<String> {
        self.inner.lock().nodes.get(uaid).cloned()
    }

    fn clear_uaid_node(&self, uaid: &str, node_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.nodes.get(uaid).map(String::as_str) == Some(node_id) {
            inner.nodes.remove(uaid);
        }
        Ok(())
    }
}

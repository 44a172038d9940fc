//! Abstract persistence seam.
//!
//! The core consumes an opaque key/value contract: per-channel
//! version floors, the pending-update set, the fleet ownership record
//! and the pinger blob. Implementations are internally
//! concurrent-safe; all methods take `&self`.

pub mod memory;
pub mod no_store;

pub use memory::MemoryStore;
pub use no_store::NoStore;

use crate::proto::Update;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("channel already exists")]
    ChannelExists,
    #[error("no record found")]
    NoRecord,
    #[error("invalid storage key")]
    InvalidKey,
}

/// Storage contract consumed by the worker and the router.
///
/// A no-op implementation is valid backing: the service then degrades
/// to best-effort delivery for currently-connected clients.
pub trait Store: Send + Sync {
    /// Upper bound on channels per UAID.
    fn max_channels(&self) -> usize;

    /// Whether the UAID has ever been seen by this store.
    fn exists(&self, uaid: &str) -> bool;

    /// Idempotent channel registration with an initial version floor.
    fn register(&self, uaid: &str, chid: &str, version: i64) -> Result<(), StoreError>;

    /// Record a new version for an endpoint key. Versions at or below
    /// the current floor are dropped; returns whether the version was
    /// stored (and is therefore deliverable).
    fn update(&self, key: &str, version: i64) -> Result<bool, StoreError>;

    /// Advisory removal; tombstones the channel but keeps its version
    /// floor so stale publishes cannot resurrect old versions.
    fn unregister(&self, uaid: &str, chid: &str) -> Result<(), StoreError>;

    /// Hard removal; also purges any pending update for the channel.
    fn drop_channel(&self, uaid: &str, chid: &str) -> Result<(), StoreError>;

    /// Pending updates recorded after `since` (milliseconds; 0 fetches
    /// everything), plus the channels whose records have expired.
    fn fetch_all(&self, uaid: &str, since: i64) -> Result<(Vec<Update>, Vec<String>), StoreError>;

    /// Forced-reset cleanup: everything known about the UAID.
    fn drop_all(&self, uaid: &str) -> Result<(), StoreError>;

    /// Retire delivered updates: for each entry, pending versions at
    /// or below the acknowledged version are cleared.
    fn ack(&self, uaid: &str, updates: &[Update]) -> Result<(), StoreError>;

    fn fetch_ping(&self, uaid: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put_ping(&self, uaid: &str, blob: &[u8]) -> Result<(), StoreError>;
    fn drop_ping(&self, uaid: &str) -> Result<(), StoreError>;

    /// Record which node currently owns the UAID's live session.
    fn set_uaid_node(&self, uaid: &str, node_id: &str) -> Result<(), StoreError>;
    fn get_uaid_node(&self, uaid: &str) -> Option<String>;

    /// Drop the ownership record, but only while it still names
    /// `node_id`; a newer claim must not be clobbered.
    fn clear_uaid_node(&self, uaid: &str, node_id: &str) -> Result<(), StoreError>;
}

/// Compose the endpoint storage key for a (UAID, CHID) pair.
pub fn ids_to_key(uaid: &str, chid: &str) -> Option<String> {
    if uaid.is_empty() || chid.is_empty() {
        return None;
    }
    Some(format!("{uaid}.{chid}"))
}

/// Split an endpoint storage key back into (UAID, CHID).
pub fn key_to_ids(key: &str) -> Option<(String, String)> {
    let (uaid, chid) = key.split_once('.')?;
    if uaid.is_empty() || chid.is_empty() {
        return None;
    }
    Some((uaid.to_string(), chid.to_string()))
}

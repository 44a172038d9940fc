//! Proprietary wake-up seam.
//!
//! Devices that disconnect can still be signalled at the OS level
//! through a platform push bridge (APNs, GCM and friends). The core
//! only carries the opaque `connect` blob from hello to the pinger
//! and asks for a wake when an update lands for a UAID with no live
//! session.

use anyhow::Result;
use serde_json::Value;

pub trait Pinger: Send + Sync {
    /// Pinger name, used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Record the client-supplied connect blob for later wakes.
    fn register(&self, uaid: &str, connect: &Value) -> Result<()>;

    /// Attempt an out-of-band wake; returns whether a signal was sent.
    fn wake(&self, uaid: &str, version: i64) -> Result<bool>;
}

/// Default pinger: accepts registrations, never wakes anyone.
#[derive(Default)]
pub struct NoopPinger;

impl Pinger for NoopPinger {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn register(&self, _uaid: &str, _connect: &Value) -> Result<()> {
        Ok(())
    }

    fn wake(&self, _uaid: &str, _version: i64) -> Result<bool> {
        Ok(false)
    }
}

//! EC2 metadata hostname probe.
//!
//! At startup the runtime asks the metadata service for the public
//! hostname to advertise in minted endpoints. Any failure falls back
//! to the configured hostname.

use anyhow::{bail, Result};
use std::time::Duration;

const METADATA_URL: &str = "http://169.254.169.254/latest/meta-data/public-hostname";

/// Fetch the machine's public hostname from the metadata service.
pub async fn public_hostname(timeout: Duration) -> Result<String> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let resp = client.get(METADATA_URL).send().await?;
    if !resp.status().is_success() {
        bail!("bad response from metadata service: {}", resp.status());
    }
    let hostname = resp.text().await?.trim().to_string();
    if hostname.is_empty() {
        bail!("metadata service returned an empty hostname");
    }
    Ok(hostname)
}

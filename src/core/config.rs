use anyhow::{bail, Context, Result};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the pushgate runtime.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// WebSocket listener bind address.
    #[serde(default = "default_ws_bind")]
    pub ws_bind: String,
    /// HTTP update ingress bind address.
    #[serde(default = "default_update_bind")]
    pub update_bind: String,
    /// Scheme advertised in minted endpoints.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Hostname advertised in minted endpoints.
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Probe the EC2 metadata service for the advertised hostname.
    #[serde(default)]
    pub resolve_aws_hostname: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_store_kind")]
    pub store: StoreKind,
    /// Upper bound on channels per UAID.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,
    /// When set, every hello is answered with a 302 to this URL.
    #[serde(default)]
    pub redirect: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Memory,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// Sessions that have not completed hello by this deadline close.
    /// Accepts duration strings such as "5s" or "500ms".
    #[serde(default = "default_hello_timeout", deserialize_with = "duration_str")]
    pub hello_timeout: Duration,
    /// Inbound frames larger than this terminate the session.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Minimum spacing between client pings, in seconds. Zero
    /// disables the limit.
    #[serde(default)]
    pub min_ping_interval: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushConfig {
    /// Reply to client pings with a full frame instead of `{}`.
    #[serde(default)]
    pub long_pongs: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Identity of this node in the fleet ownership record.
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Peer update-ingress base URLs by node id.
    #[serde(default)]
    pub peers: HashMap<String, String>,
    /// Timeout for forwarded updates and evictions.
    #[serde(default = "default_forward_timeout_ms")]
    pub forward_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    pub metrics_bind: Option<String>,
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from the path in PUSHGATE_CONFIG, falling
    /// back to `config/pushgate.toml`. A missing default file yields
    /// the built-in defaults.
    pub fn load_from_env() -> Result<Self> {
        let mut cfg = match std::env::var("PUSHGATE_CONFIG") {
            Ok(path) => Self::load(&path)?,
            Err(_) => {
                let default = Path::new("config/pushgate.toml");
                if default.exists() {
                    Self::load(default)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Load configuration from a specific file (TOML or JSON based on
    /// extension).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let data = fs::read_to_string(path_ref)
            .with_context(|| format!("unable to read config {}", path_ref.display()))?;
        if is_json(path_ref) {
            Ok(serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON config {}", path_ref.display()))?)
        } else {
            Ok(toml::from_str(&data)
                .with_context(|| format!("invalid TOML config {}", path_ref.display()))?)
        }
    }

    /// Validate schema-level invariants before startup.
    pub fn validate(&self) -> Result<()> {
        if self.db.max_channels == 0 {
            bail!("db.max_channels must be > 0");
        }
        if self.socket.hello_timeout.is_zero() {
            bail!("socket.hello_timeout must be > 0");
        }
        if self.socket.max_frame_bytes == 0 {
            bail!("socket.max_frame_bytes must be > 0");
        }
        if self.cluster.node_id.is_empty() {
            bail!("cluster.node_id must be non-empty");
        }
        let binds = self.listener_binds();
        for (i, (key_a, bind_a)) in binds.iter().copied().enumerate() {
            for (key_b, bind_b) in binds[i + 1..].iter().copied() {
                if same_listener_addr(bind_a, bind_b) {
                    bail!("{key_a} conflicts with {key_b} ({bind_a})");
                }
            }
        }
        Ok(())
    }

    /// Every listener this configuration will bind, keyed for error
    /// reporting: the WebSocket listener, the update ingress, and
    /// the telemetry endpoint when enabled.
    fn listener_binds(&self) -> Vec<(&'static str, &str)> {
        let mut binds = vec![
            ("server.ws_bind", self.server.ws_bind.as_str()),
            ("server.update_bind", self.server.update_bind.as_str()),
        ];
        if let Some(metrics) = &self.telemetry.metrics_bind {
            binds.push(("telemetry.metrics_bind", metrics.as_str()));
        }
        binds
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("PUSHGATE_WS_BIND") {
            self.server.ws_bind = bind;
        }
        if let Ok(bind) = std::env::var("PUSHGATE_UPDATE_BIND") {
            self.server.update_bind = bind;
        }
        if let Ok(node_id) = std::env::var("PUSHGATE_NODE_ID") {
            self.cluster.node_id = node_id;
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_bind: default_ws_bind(),
            update_bind: default_update_bind(),
            scheme: default_scheme(),
            hostname: default_hostname(),
            resolve_aws_hostname: false,
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            store: default_store_kind(),
            max_channels: default_max_channels(),
            redirect: None,
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            hello_timeout: default_hello_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            min_ping_interval: 0,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            peers: HashMap::new(),
            forward_timeout_ms: default_forward_timeout_ms(),
        }
    }
}

fn default_ws_bind() -> String {
    "0.0.0.0:8080".into()
}

fn default_update_bind() -> String {
    "0.0.0.0:8081".into()
}

fn default_scheme() -> String {
    "http".into()
}

fn default_hostname() -> String {
    "localhost".into()
}

fn default_store_kind() -> StoreKind {
    StoreKind::Memory
}

fn default_max_channels() -> usize {
    200
}

fn default_hello_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_frame_bytes() -> usize {
    4096
}

fn default_node_id() -> String {
    "local".into()
}

fn default_forward_timeout_ms() -> u64 {
    5_000
}

fn is_json(path: &Path) -> bool {
    matches!(path.extension().and_then(|s| s.to_str()), Some("json"))
}

/// Two listeners collide when they name the same concrete address.
/// Ephemeral ports (`:0`) never collide: the OS hands each bind its
/// own port. Binds that fail to parse are compared as strings, so a
/// duplicated hostname form is still caught here while a genuinely
/// bad address surfaces at bind time.
fn same_listener_addr(a: &str, b: &str) -> bool {
    use std::net::SocketAddr;
    match (a.parse::<SocketAddr>(), b.parse::<SocketAddr>()) {
        (Ok(addr_a), Ok(addr_b)) => match (addr_a.port(), addr_b.port()) {
            (0, _) | (_, 0) => false,
            _ => addr_a == addr_b,
        },
        _ => a == b,
    }
}

/// Parse a duration value: a bare number is seconds, strings accept
/// `ms`, `s` and `m` suffixes.
fn duration_str<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(DeError::custom),
    }
}

fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let (digits, unit): (&str, &str) = match text.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => (&text[..pos], text[pos..].trim()),
        None => (text, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {text:?}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        _ => Err(format!("invalid duration unit {unit:?}")),
    }
}

//! Server configuration: TOML file + CLI overrides.

use crate::hub::HubConfig;
use chathub_core::{generate_secret, HubError, HubResult};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub line: ListenerSection,
    #[serde(default)]
    pub websocket: ListenerSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub auth: AuthSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Seconds between liveness probes.
    #[serde(default = "default_probe_interval")]
    pub probe_interval: u64,
    /// Seconds of silence before a connection is evicted; 0 disables.
    #[serde(default)]
    pub idle_timeout: u64,
    #[serde(default)]
    pub self_echo: bool,
    /// Seconds `stop` waits for connections to flush.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            probe_interval: default_probe_interval(),
            idle_timeout: 0,
            self_echo: false,
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// `[line]` and `[websocket]` sections.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// Defaults to 8080 for `[line]` and 8081 for `[websocket]`.
    #[serde(default)]
    pub port: Option<u16>,
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: None,
        }
    }
}

/// `[monitor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_monitor_interval")]
    pub interval: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_monitor_interval(),
        }
    }
}

/// `[auth]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSection {
    /// Hex-encoded token signing secret.
    #[serde(default)]
    pub secret: Option<String>,
}

fn default_queue_capacity() -> usize {
    256
}
fn default_probe_interval() -> u64 {
    10
}
fn default_shutdown_grace() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
const DEFAULT_LINE_PORT: u16 = 8080;
const DEFAULT_WS_PORT: u16 = 8081;

fn default_monitor_interval() -> u64 {
    10
}

/// Command-line values that win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub line_port: Option<u16>,
    pub ws_port: Option<u16>,
    pub queue_capacity: Option<usize>,
    pub probe_interval: Option<u64>,
    pub monitor: bool,
    pub self_echo: bool,
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hub: HubConfig,
    /// Decoded token secret, if one was configured.
    pub secret: Option<Vec<u8>>,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    ///
    /// A missing file means defaults.
    pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> HubResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| HubError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, overrides)
    }

    fn resolve(file: ConfigFile, overrides: &Overrides) -> HubResult<Self> {
        let queue_capacity = overrides
            .queue_capacity
            .unwrap_or(file.server.queue_capacity);
        let probe_interval = overrides
            .probe_interval
            .unwrap_or(file.server.probe_interval);

        let mut hub = HubConfig::new(queue_capacity, Duration::from_secs(probe_interval));
        if file.line.enabled {
            let port = overrides
                .line_port
                .or(file.line.port)
                .unwrap_or(DEFAULT_LINE_PORT);
            hub = hub.with_line(SocketAddr::new(file.line.bind, port));
        }
        if file.websocket.enabled {
            let port = overrides
                .ws_port
                .or(file.websocket.port)
                .unwrap_or(DEFAULT_WS_PORT);
            hub = hub.with_websocket(SocketAddr::new(file.websocket.bind, port));
        }
        hub.idle_timeout =
            (file.server.idle_timeout > 0).then(|| Duration::from_secs(file.server.idle_timeout));
        hub.self_echo = overrides.self_echo || file.server.self_echo;
        hub.shutdown_grace = Duration::from_secs(file.server.shutdown_grace);
        if overrides.monitor || file.monitor.enabled {
            hub.monitor_interval = Some(Duration::from_secs(file.monitor.interval.max(1)));
        }

        let secret = match file.auth.secret.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(encoded) => Some(
                hex::decode(encoded)
                    .map_err(|e| HubError::Config(format!("auth secret is not hex: {e}")))?,
            ),
        };

        Ok(Self { hub, secret })
    }
}

/// Where the token signing secret came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningSecret {
    Configured(Vec<u8>),
    /// Random, valid for this process only. The caller decides how to
    /// hand it to the operator; it is never logged.
    Generated(Vec<u8>),
}

impl ServerConfig {
    /// The configured secret, or a freshly generated one.
    pub fn signing_secret(&self) -> SigningSecret {
        match &self.secret {
            Some(secret) => SigningSecret::Configured(secret.clone()),
            None => SigningSecret::Generated(generate_secret()),
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`murmur.toml`, `/etc/murmur/murmur.toml`,
//!   `~/.config/murmur/murmur.toml`)
//! - Environment variables (`MURMUR__PORT`, `MURMUR__PRESENCE__GRACE_PERIOD_MS`, ...)

use anyhow::{ensure, Context, Result};
use murmur_core::HubConfig;
use murmur_protocol::{ConversationId, UserId};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::store::Conversation;

/// Files searched by [`Config::load`], first match wins.
const CONFIG_PATHS: [&str; 3] = [
    "murmur.toml",
    "/etc/murmur/murmur.toml",
    "~/.config/murmur/murmur.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Endpoint paths.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Presence configuration.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Receipt policy.
    #[serde(default)]
    pub receipts: ReceiptsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Bundled token verifier.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Conversations loaded into the in-memory store.
    #[serde(default)]
    pub seed: SeedConfig,
}

/// Endpoint paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Chat socket path; the conversation id is appended as a segment.
    #[serde(default = "default_chat_path")]
    pub chat_path: String,

    /// Notification socket path.
    #[serde(default = "default_notifications_path")]
    pub notifications_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound frames queued per connection before it counts as dead.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Close a connection after this long without inbound traffic.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Presence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Grace window before an offline transition is broadcast.
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,
}

/// Receipt policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptsConfig {
    /// Only the receiver of a message may mark it read.
    #[serde(default = "default_true")]
    pub read_requires_receiver: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Static bearer tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

/// One bearer token and the user it authenticates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub user_id: UserId,
}

/// Seed data for the in-memory store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub conversations: Vec<SeedConversation>,
}

/// A seeded two-party conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConversation {
    pub id: ConversationId,
    pub user1_id: UserId,
    pub user2_id: UserId,
}

impl From<&SeedConversation> for Conversation {
    fn from(seed: &SeedConversation) -> Self {
        Conversation::new(seed.id, seed.user1_id, seed.user2_id)
    }
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_chat_path() -> String {
    "/ws/chat".to_string()
}

fn default_notifications_path() -> String {
    "/ws/notifications".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_grace_period() -> u64 {
    4_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            presence: PresenceConfig::default(),
            receipts: ReceiptsConfig::default(),
            metrics: MetricsConfig::default(),
            auth: AuthConfig::default(),
            seed: SeedConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chat_path: default_chat_path(),
            notifications_path: default_notifications_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period(),
        }
    }
}

impl Default for ReceiptsConfig {
    fn default() -> Self {
        Self {
            read_requires_receiver: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, with
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let found = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        Self::load_from(found.as_deref().map(Path::new))
    }

    /// Load configuration from an optional file, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            let name = path
                .to_str()
                .with_context(|| format!("Config path is not UTF-8: {}", path.display()))?;
            builder = builder.add_source(config::File::new(name, config::FileFormat::Toml));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("MURMUR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize::<Config>()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first zero interval, window or size.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("heartbeat.interval_ms", self.heartbeat.interval_ms),
            ("heartbeat.timeout_ms", self.heartbeat.timeout_ms),
            ("presence.grace_period_ms", self.presence.grace_period_ms),
            ("limits.outbound_buffer", self.limits.outbound_buffer as u64),
            ("limits.max_message_size", self.limits.max_message_size as u64),
        ];
        for (key, value) in nonzero {
            ensure!(value > 0, "{} must be greater than zero", key);
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }

    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.timeout_ms)
    }

    /// Hub settings derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            grace_period: Duration::from_millis(self.presence.grace_period_ms),
        }
    }

    /// Conversations to seed the in-memory store with.
    #[must_use]
    pub fn seed_conversations(&self) -> Vec<Conversation> {
        self.seed.conversations.iter().map(Conversation::from).collect()
    }
}

//! Server configuration.
//!
//! Settings are layered, later sources winning:
//! 1. built-in defaults
//! 2. an optional TOML file (`--config` / `MURMUR_CONFIG`)
//! 3. `MURMUR__<SECTION>__<KEY>` environment variables,
//!    e.g. `MURMUR__SERVER__BIND_ADDR=127.0.0.1:4000`
//!
//! Command-line flags are applied on top by `main`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// HTTP/WebSocket listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listen address
    pub bind_addr: String,
    /// Seconds a new connection has to send its `auth` frame
    pub auth_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            auth_timeout_secs: 10,
        }
    }
}

/// Connection registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Frames buffered per connection before sends report it unreachable
    pub outbound_capacity: usize,
    /// Seconds between sweeps for connections whose writer is gone
    pub cleanup_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: murmur_core::registry::DEFAULT_OUTBOUND_CAPACITY,
            cleanup_interval_secs: 60,
        }
    }
}

/// Typing indicator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    /// Milliseconds after which an unrefreshed indicator is cleared
    pub expiry_ms: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            expiry_ms: murmur_core::typing::DEFAULT_TYPING_EXPIRY.as_millis() as u64,
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpConfig,
    pub registry: RegistryConfig,
    pub typing: TypingConfig,
}

impl ServerConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&ServerConfig::default())
                .context("Failed to build default configuration")?,
        );

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: ServerConfig = builder
            .add_source(
                config::Environment::with_prefix("MURMUR")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        if let Some(path) = path {
            info!("Loaded configuration from {:?}", path);
        }
        Ok(config)
    }

    /// Log the effective configuration.
    pub fn log_config(&self) {
        info!("Bind address: {}", self.server.bind_addr);
        info!("Auth timeout: {}s", self.server.auth_timeout_secs);
        info!("Outbound queue capacity: {}", self.registry.outbound_capacity);
        info!("Typing expiry: {}ms", self.typing.expiry_ms);
    }
}

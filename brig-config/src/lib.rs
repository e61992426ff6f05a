//! Configuration management for agents.
//!
//! Every field is optional in the serialized form; missing values fall back to
//! the defaults below.
//!
//! ```json
//! {
//!   "identity": { "id": "island-1", "name": "Tortuga" },
//!   "client": { "call_timeout_ms": 30000, "discovery_window_ms": 1000 },
//!   "telemetry": { "filter": "brig=debug" }
//! }
//! ```

#![warn(missing_docs, clippy::pedantic)]

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use brig_primitives::PeerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use brig_telemetry::TelemetryConfig;

const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_DISCOVERY_WINDOW_MS: u64 = 1_000;
const DEFAULT_MAX_CONCURRENT_DISPATCHES: usize = 32;

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value was out of range.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
    /// The configured identity is not a valid peer id.
    #[error(transparent)]
    Identity(#[from] brig_primitives::Error),
    /// The document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Who this agent is on the channel.
    pub identity: IdentityConfig,
    /// Call and dispatch tuning.
    pub client: ClientConfig,
    /// Log subscriber settings.
    pub telemetry: TelemetryConfig,
}

impl AgentConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed input or the validation
    /// error of the first invalid section.
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise the
    /// errors of [`from_json_str`](Self::from_json_str).
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loaded agent configuration");
        Self::from_json_str(&raw)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> ConfigResult<()> {
        self.identity.validate()?;
        self.client.validate()
    }
}

/// Identity presented to the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Fixed peer id; a random one is generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name; defaults to the id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form description of the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl IdentityConfig {
    /// Returns the configured id, or a freshly generated one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Identity`] when the configured id is invalid.
    pub fn resolve_id(&self) -> ConfigResult<PeerId> {
        match &self.id {
            Some(id) => Ok(PeerId::new(id.clone())?),
            None => Ok(PeerId::random()),
        }
    }

    /// Returns the display name, falling back to `id`.
    #[must_use]
    pub fn display_name(&self, id: &PeerId) -> String {
        self.name.clone().unwrap_or_else(|| id.to_string())
    }

    fn validate(&self) -> ConfigResult<()> {
        if let Some(id) = &self.id {
            PeerId::new(id.clone())?;
        }
        Ok(())
    }
}

/// Client tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Default deadline for peer tool calls, in milliseconds.
    pub call_timeout_ms: u64,
    /// How long `discover_peers` waits for replies, in milliseconds.
    pub discovery_window_ms: u64,
    /// Upper bound on concurrently running tool handlers.
    pub max_concurrent_dispatches: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            discovery_window_ms: DEFAULT_DISCOVERY_WINDOW_MS,
            max_concurrent_dispatches: DEFAULT_MAX_CONCURRENT_DISPATCHES,
        }
    }
}

impl ClientConfig {
    /// Sets the default call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = duration_millis(timeout);
        self
    }

    /// Sets the discovery settling window.
    #[must_use]
    pub fn with_discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window_ms = duration_millis(window);
        self
    }

    /// Sets the dispatch concurrency limit.
    #[must_use]
    pub fn with_max_concurrent_dispatches(mut self, limit: NonZeroUsize) -> Self {
        self.max_concurrent_dispatches = limit.get();
        self
    }

    /// Default deadline for peer tool calls.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Settling window used by peer discovery.
    #[must_use]
    pub const fn discovery_window(&self) -> Duration {
        Duration::from_millis(self.discovery_window_ms)
    }

    /// Dispatch concurrency limit, clamped to at least one.
    #[must_use]
    pub fn max_concurrent_dispatches(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_concurrent_dispatches).unwrap_or(NonZeroUsize::MIN)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the call timeout or the dispatch
    /// limit is zero.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "call timeout must be greater than zero",
            ));
        }
        if self.max_concurrent_dispatches == 0 {
            return Err(ConfigError::Invalid(
                "max concurrent dispatches must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

//! RPC client and server configuration.

use serde::{Deserialize, Serialize};
use shared_bus::{ExchangeKind, DEFAULT_EXCHANGE};
use shared_types::config::{duration_serde, env_duration, env_override, load_toml};
use shared_types::ConfigError;
use std::path::Path;
use std::time::Duration;

/// Where requests go and how long callers wait by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcClientConfig {
    /// Well-known request exchange. Empty means the default exchange.
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    /// Routing key of the request destination.
    pub routing_key: String,
    /// Used by `RpcClient::request`.
    #[serde(with = "duration_serde")]
    pub default_timeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            exchange: "ipc:rpc".to_string(),
            exchange_kind: ExchangeKind::Direct,
            routing_key: "rpc.requests".to_string(),
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl RpcClientConfig {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            ..Self::default()
        }
    }

    /// Read from TOML, apply `SY_RPC_*` overrides, validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config: Self = load_toml(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(exchange) = env_override::<String>("RPC_EXCHANGE")? {
            self.exchange = exchange;
        }
        if let Some(routing_key) = env_override::<String>("RPC_ROUTING_KEY")? {
            self.routing_key = routing_key;
        }
        if let Some(timeout) = env_duration("RPC_TIMEOUT")? {
            self.default_timeout = timeout;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange == DEFAULT_EXCHANGE && self.routing_key.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "routing_key",
                reason: "required when publishing to the default exchange".into(),
            });
        }

        if self.default_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "default_timeout",
                reason: "cannot be 0".into(),
            });
        }

        Ok(())
    }
}

/// Where a responder listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcServerConfig {
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    /// Request queue, shared by every server instance.
    pub queue: String,
    /// Binding key between exchange and queue.
    pub routing_key: String,
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            exchange: "ipc:rpc".to_string(),
            exchange_kind: ExchangeKind::Direct,
            queue: "rpc.requests".to_string(),
            routing_key: "rpc.requests".to_string(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl RpcServerConfig {
    /// Listen on `queue`, bound to `exchange` under the queue's name.
    pub fn new(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        let queue = queue.into();
        Self {
            exchange: exchange.into(),
            routing_key: queue.clone(),
            queue,
            ..Self::default()
        }
    }

    /// Read from TOML, apply `SY_RPC_SERVER_*` overrides, validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config: Self = load_toml(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(exchange) = env_override::<String>("RPC_SERVER_EXCHANGE")? {
            self.exchange = exchange;
        }
        if let Some(queue) = env_override::<String>("RPC_SERVER_QUEUE")? {
            self.queue = queue;
        }
        if let Some(poll_interval) = env_duration("RPC_SERVER_POLL_INTERVAL")? {
            self.poll_interval = poll_interval;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "queue",
                reason: "cannot be empty".into(),
            });
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "poll_interval",
                reason: "cannot be 0".into(),
            });
        }

        Ok(())
    }
}

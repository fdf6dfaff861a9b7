//! Consumer configuration.

use serde::{Deserialize, Serialize};
use shared_bus::{ExchangeKind, DEFAULT_EXCHANGE};
use shared_types::config::{duration_serde, env_duration, env_override, load_toml};
use shared_types::ConfigError;
use std::path::Path;
use std::time::Duration;

/// Where a consumer reads from and how it treats failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Exchange the queue is bound to.
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    /// Queue the workers pull from. Shared by every worker.
    pub queue: String,
    /// Binding key. Ignored by fanout exchanges.
    pub routing_key: String,
    pub durable: bool,
    /// Number of concurrent workers, each with its own connection.
    pub workers: usize,
    /// How long one `check_for_message` waits before looping.
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
    /// Bound on waiting for the per-message ledger lock.
    #[serde(with = "duration_serde")]
    pub lock_timeout: Duration,
    /// Requeue deliveries whose decode or handler failed.
    pub requeue_on_failure: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            exchange: "ipc:events".to_string(),
            exchange_kind: ExchangeKind::Fanout,
            queue: "switchyard.consumer".to_string(),
            routing_key: String::new(),
            durable: true,
            workers: 4,
            poll_interval: Duration::from_secs(1),
            lock_timeout: Duration::from_secs(5),
            requeue_on_failure: true,
        }
    }
}

impl ConsumerConfig {
    /// Config for one exchange/queue pair, defaults elsewhere.
    pub fn new(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            ..Self::default()
        }
    }

    /// Read from TOML, apply `SY_CONSUMER_*` overrides, validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config: Self = load_toml(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Patch fields from `SY_CONSUMER_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(exchange) = env_override::<String>("CONSUMER_EXCHANGE")? {
            self.exchange = exchange;
        }
        if let Some(queue) = env_override::<String>("CONSUMER_QUEUE")? {
            self.queue = queue;
        }
        if let Some(workers) = env_override::<usize>("CONSUMER_WORKERS")? {
            self.workers = workers;
        }
        if let Some(poll_interval) = env_duration("CONSUMER_POLL_INTERVAL")? {
            self.poll_interval = poll_interval;
        }
        if let Some(lock_timeout) = env_duration("CONSUMER_LOCK_TIMEOUT")? {
            self.lock_timeout = lock_timeout;
        }
        if let Some(requeue) = env_override::<bool>("CONSUMER_REQUEUE_ON_FAILURE")? {
            self.requeue_on_failure = requeue;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // The default exchange cannot have bindings
        if self.exchange == DEFAULT_EXCHANGE {
            return Err(ConfigError::Invalid {
                field: "exchange",
                reason: "cannot be empty".into(),
            });
        }

        if self.queue.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "queue",
                reason: "cannot be empty".into(),
            });
        }

        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "workers",
                reason: "at least one worker is required".into(),
            });
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "poll_interval",
                reason: "cannot be 0".into(),
            });
        }

        if self.lock_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "lock_timeout",
                reason: "cannot be 0".into(),
            });
        }

        Ok(())
    }
}

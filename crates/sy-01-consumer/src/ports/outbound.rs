//! Outbound (driven) ports: consumption ledger and time source.

use crate::domain::{
    ConsumedMessage, ConsumptionStatus, LedgerError, MessageKey, NewConsumedMessage, Timestamp,
};
use async_trait::async_trait;
use std::time::Duration;

/// Held per-key lock. Released on drop, on every exit path.
pub struct LedgerLock {
    key: MessageKey,
    _guard: Box<dyn Send + Sync>,
}

impl LedgerLock {
    /// Wrap whatever guard the ledger uses to hold the key.
    pub fn new(key: MessageKey, guard: impl Send + Sync + 'static) -> Self {
        Self {
            key,
            _guard: Box::new(guard),
        }
    }

    pub fn key(&self) -> &MessageKey {
        &self.key
    }
}

impl std::fmt::Debug for LedgerLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerLock").field("key", &self.key).finish()
    }
}

/// Durable keyed store of consumption outcomes with per-key mutual exclusion.
///
/// Shared by every worker (and every consumer) using the same store.
/// Records are never deleted by the dispatch loop.
#[async_trait]
pub trait ConsumptionLedger: Send + Sync {
    /// Existing record for the key, or a new `Pending` one.
    async fn find_or_create(&self, new: NewConsumedMessage)
        -> Result<ConsumedMessage, LedgerError>;

    /// Take the per-key lock, waiting at most `wait`.
    ///
    /// # Errors
    ///
    /// - `LedgerError::LockTimeout` - another holder kept the key past `wait`
    async fn lock(&self, key: &MessageKey, wait: Duration) -> Result<LedgerLock, LedgerError>;

    /// Durable write. Stamps `updated_at`.
    async fn persist(&self, record: &ConsumedMessage) -> Result<(), LedgerError>;

    async fn get(&self, key: &MessageKey) -> Result<Option<ConsumedMessage>, LedgerError>;

    /// All records, oldest first.
    async fn records(&self) -> Result<Vec<ConsumedMessage>, LedgerError>;

    async fn count_by_status(&self, status: ConsumptionStatus) -> Result<usize, LedgerError>;
}

/// Time source for record timestamps.
pub trait TimeSource: Send + Sync {
    /// Current time in unix milliseconds.
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

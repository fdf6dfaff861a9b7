//! In-memory consumption ledger.
//!
//! Records live in a `DashMap`; the per-key lock is a `tokio::sync::Mutex`
//! per key, held through an owned guard so it can outlive the borrow of the
//! lock table. Records are kept forever; a lock entry is dropped from the
//! table once its last holder releases it and nobody is waiting.

use crate::domain::{ConsumedMessage, ConsumptionStatus, LedgerError, MessageKey, NewConsumedMessage};
use crate::ports::{ConsumptionLedger, LedgerLock, SystemTimeSource, TimeSource};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

type LockTable = DashMap<MessageKey, Arc<Mutex<()>>>;

/// Owned per-key guard that prunes its table entry on release.
struct KeyGuard {
    key: MessageKey,
    locks: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release first so our own Arc no longer counts
        self.guard.take();
        // Waiters hold a clone of the Arc, so they keep the entry alive
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Ledger backed by process memory. Clones share state.
#[derive(Clone)]
pub struct InMemoryLedger {
    records: Arc<DashMap<MessageKey, ConsumedMessage>>,
    locks: Arc<LockTable>,
    time: Arc<dyn TimeSource>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::with_time_source(Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(time: Arc<dyn TimeSource>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            time,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsumptionLedger for InMemoryLedger {
    async fn find_or_create(
        &self,
        new: NewConsumedMessage,
    ) -> Result<ConsumedMessage, LedgerError> {
        let now = self.time.now();
        let record = self
            .records
            .entry(new.id.clone())
            .or_insert_with(|| new.into_record(now))
            .clone();
        Ok(record)
    }

    async fn lock(&self, key: &MessageKey, wait: Duration) -> Result<LedgerLock, LedgerError> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let acquired = tokio::time::timeout(wait, mutex.clone().lock_owned()).await;
        match acquired {
            Ok(guard) => {
                debug!(message_key = %key, "Ledger lock acquired");
                let guard = KeyGuard {
                    key: key.clone(),
                    locks: self.locks.clone(),
                    guard: Some(guard),
                };
                Ok(LedgerLock::new(key.clone(), guard))
            }
            Err(_) => {
                drop(mutex);
                self.locks
                    .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
                warn!(
                    message_key = %key,
                    waited_ms = wait.as_millis() as u64,
                    "Ledger lock timed out"
                );
                Err(LedgerError::LockTimeout {
                    key: key.to_string(),
                    waited: wait,
                })
            }
        }
    }

    async fn persist(&self, record: &ConsumedMessage) -> Result<(), LedgerError> {
        let mut stored = record.clone();
        stored.updated_at = self.time.now();
        self.records.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn get(&self, key: &MessageKey) -> Result<Option<ConsumedMessage>, LedgerError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn records(&self) -> Result<Vec<ConsumedMessage>, LedgerError> {
        let mut records: Vec<ConsumedMessage> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn count_by_status(&self, status: ConsumptionStatus) -> Result<usize, LedgerError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.value().status == status)
            .count())
    }
}

//! # In-Memory Broker
//!
//! Reference implementation of the transport ports.
//!
//! Suitable for single-process operation and tests; deployments against a
//! real broker provide their own [`Broker`] implementation. Models the parts
//! of AMQP the messaging layer relies on:
//!
//! - fanout/direct exchanges plus the default exchange,
//! - exclusive and auto-delete queues bound to the declaring connection,
//! - per-connection unacknowledged deliveries, requeued when the
//!   connection goes away,
//! - fault injection: unreachable broker, severed connections.

use crate::errors::TransportError;
use crate::transport::{
    Acknowledger, Broker, Connection, Delivery, DeliveryMeta, ExchangeKind, PublishProperties,
    QueueOptions, DEFAULT_EXCHANGE,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

struct QueueState {
    name: String,
    /// Connection that declared an exclusive queue.
    owner: Option<u64>,
    ready: Mutex<VecDeque<Delivery>>,
    notify: Notify,
    deleted: AtomicBool,
}

impl QueueState {
    fn new(name: String, owner: Option<u64>) -> Self {
        Self {
            name,
            owner,
            ready: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            deleted: AtomicBool::new(false),
        }
    }

    fn push_back(&self, delivery: Delivery) {
        self.ready.lock().push_back(delivery);
        self.notify.notify_waiters();
    }

    fn push_front(&self, delivery: Delivery) {
        self.ready.lock().push_front(delivery);
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<Delivery> {
        self.ready.lock().pop_front()
    }

    fn depth(&self) -> usize {
        self.ready.lock().len()
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

struct Binding {
    queue: String,
    routing_key: String,
}

struct ExchangeState {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

#[derive(Default)]
struct BrokerInner {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, Arc<QueueState>>,
    connections: HashMap<u64, Weak<ConnectionCore>>,
}

struct BrokerState {
    inner: Mutex<BrokerInner>,
    reachable: AtomicBool,
    next_connection_id: AtomicU64,
    next_delivery_tag: AtomicU64,
    published: AtomicU64,
}

impl BrokerState {
    fn queue(&self, name: &str) -> Option<Arc<QueueState>> {
        self.inner.lock().queues.get(name).cloned()
    }

    fn delete_queue(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(queue) = inner.queues.remove(name) {
            queue.mark_deleted();
        }
        for exchange in inner.exchanges.values_mut() {
            exchange.bindings.retain(|b| b.queue != name);
        }
        debug!(queue = name, "Queue deleted");
    }

    /// Queues a publish to (`exchange`, `routing_key`) reaches.
    fn route(
        &self,
        exchange: &str,
        routing_key: &str,
    ) -> Result<Vec<Arc<QueueState>>, TransportError> {
        let inner = self.inner.lock();

        if exchange == DEFAULT_EXCHANGE {
            return Ok(inner.queues.get(routing_key).cloned().into_iter().collect());
        }

        let state = inner
            .exchanges
            .get(exchange)
            .ok_or_else(|| TransportError::ExchangeNotFound(exchange.to_string()))?;

        let mut targets: Vec<Arc<QueueState>> = state
            .bindings
            .iter()
            .filter(|b| state.kind == ExchangeKind::Fanout || b.routing_key == routing_key)
            .filter_map(|b| inner.queues.get(&b.queue).cloned())
            .collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        targets.dedup_by(|a, b| a.name == b.name);
        Ok(targets)
    }
}

/// Connection state shared between the handle and the broker (for severing).
struct ConnectionCore {
    id: u64,
    open: AtomicBool,
    closed: Notify,
    unacked: Mutex<HashMap<u64, (Arc<QueueState>, Delivery)>>,
    /// Exclusive / auto-delete queues that die with this connection.
    owned_queues: Mutex<Vec<String>>,
}

impl ConnectionCore {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self, broker: &BrokerState) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut unacked: Vec<(u64, (Arc<QueueState>, Delivery))> =
            self.unacked.lock().drain().collect();
        // push_front in reverse tag order keeps the original order
        unacked.sort_by(|a, b| b.0.cmp(&a.0));
        let requeued = unacked.len();
        for (_, (queue, mut delivery)) in unacked {
            if !queue.is_deleted() {
                delivery.meta.redelivered = true;
                queue.push_front(delivery);
            }
        }

        let owned = std::mem::take(&mut *self.owned_queues.lock());
        for name in &owned {
            broker.delete_queue(name);
        }

        broker.inner.lock().connections.remove(&self.id);
        self.closed.notify_waiters();

        debug!(
            connection = self.id,
            requeued = requeued,
            deleted_queues = owned.len(),
            "Connection closed"
        );
    }
}

/// One connection to an [`InMemoryBroker`]. Closing or dropping it releases
/// its exclusive queues and requeues its unacknowledged deliveries.
pub struct InMemoryConnection {
    core: Arc<ConnectionCore>,
    broker: Arc<BrokerState>,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.core.is_open() {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }

    fn consumable_queue(&self, name: &str) -> Result<Arc<QueueState>, TransportError> {
        let queue = self
            .broker
            .queue(name)
            .ok_or_else(|| TransportError::QueueNotFound(name.to_string()))?;

        match queue.owner {
            Some(owner) if owner != self.core.id => {
                Err(TransportError::ExclusiveQueueLocked(name.to_string()))
            }
            _ => Ok(queue),
        }
    }

    fn take_delivery(&self, queue: &Arc<QueueState>) -> Option<Delivery> {
        let mut delivery = queue.pop()?;
        let tag = self.broker.next_delivery_tag.fetch_add(1, Ordering::Relaxed) + 1;
        delivery.meta.delivery_tag = tag;
        self.core
            .unacked
            .lock()
            .insert(tag, (queue.clone(), delivery.clone()));
        Some(delivery)
    }

    fn settle(&self, delivery_tag: u64) -> Result<(Arc<QueueState>, Delivery), TransportError> {
        self.core
            .unacked
            .lock()
            .remove(&delivery_tag)
            .ok_or(TransportError::UnknownDelivery(delivery_tag))
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.core.close(&self.broker);
    }
}

#[async_trait]
impl Acknowledger for InMemoryConnection {
    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.settle(delivery_tag)?;
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError> {
        self.ensure_open()?;
        let (queue, mut delivery) = self.settle(delivery_tag)?;

        if requeue && !queue.is_deleted() {
            delivery.meta.redelivered = true;
            queue.push_front(delivery);
        } else {
            debug!(
                queue = %queue.name,
                delivery_tag = delivery_tag,
                "Delivery discarded"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    fn id(&self) -> u64 {
        self.core.id
    }

    fn is_open(&self) -> bool {
        self.core.is_open()
    }

    async fn create_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), TransportError> {
        self.ensure_open()?;
        if name == DEFAULT_EXCHANGE {
            return Ok(());
        }

        let mut inner = self.broker.inner.lock();
        match inner.exchanges.get(name) {
            Some(existing) if existing.kind != kind => Err(TransportError::ExchangeKindMismatch {
                name: name.to_string(),
                existing: existing.kind.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                inner.exchanges.insert(
                    name.to_string(),
                    ExchangeState {
                        kind,
                        bindings: Vec::new(),
                    },
                );
                debug!(exchange = name, kind = %kind, "Exchange declared");
                Ok(())
            }
        }
    }

    async fn create_queue(&self, options: QueueOptions) -> Result<String, TransportError> {
        self.ensure_open()?;

        let name = if options.name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            options.name.clone()
        };

        {
            let mut inner = self.broker.inner.lock();
            if let Some(existing) = inner.queues.get(&name) {
                return match existing.owner {
                    Some(owner) if owner != self.core.id => {
                        Err(TransportError::ExclusiveQueueLocked(name))
                    }
                    _ => Ok(name),
                };
            }

            let owner = options.exclusive.then_some(self.core.id);
            inner
                .queues
                .insert(name.clone(), Arc::new(QueueState::new(name.clone(), owner)));
        }

        if options.exclusive || options.auto_delete {
            self.core.owned_queues.lock().push(name.clone());
        }

        debug!(
            queue = %name,
            connection = self.core.id,
            durable = options.durable,
            exclusive = options.exclusive,
            auto_delete = options.auto_delete,
            "Queue declared"
        );
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;

        let mut inner = self.broker.inner.lock();
        if !inner.queues.contains_key(queue) {
            return Err(TransportError::QueueNotFound(queue.to_string()));
        }
        let state = inner
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| TransportError::ExchangeNotFound(exchange.to_string()))?;

        let already_bound = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.routing_key == routing_key);
        if !already_bound {
            state.bindings.push(Binding {
                queue: queue.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: PublishProperties,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;

        let targets = self.broker.route(exchange, routing_key)?;
        self.broker.published.fetch_add(1, Ordering::Relaxed);

        if targets.is_empty() {
            warn!(
                exchange = exchange,
                routing_key = routing_key,
                "Message dropped (no bound queues)"
            );
            return Ok(());
        }

        for queue in &targets {
            queue.push_back(Delivery {
                meta: DeliveryMeta {
                    delivery_tag: 0,
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    queue: queue.name.clone(),
                    redelivered: false,
                    properties: properties.clone(),
                },
                body: body.clone(),
            });
        }

        debug!(
            exchange = exchange,
            routing_key = routing_key,
            queues = targets.len(),
            "Message published"
        );
        Ok(())
    }

    async fn check_for_message(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Delivery, TransportError> {
        self.ensure_open()?;
        let state = self.consumable_queue(queue)?;
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a publish in between is not missed.
            let arrived = state.notify.notified();
            let closed = self.core.closed.notified();
            tokio::pin!(arrived);
            tokio::pin!(closed);
            arrived.as_mut().enable();
            closed.as_mut().enable();

            self.ensure_open()?;
            if state.is_deleted() {
                return Err(TransportError::QueueNotFound(queue.to_string()));
            }
            if let Some(delivery) = self.take_delivery(&state) {
                return Ok(delivery);
            }

            tokio::select! {
                _ = &mut arrived => {}
                _ = &mut closed => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(TransportError::Timeout(timeout));
                }
            }
        }
    }

    async fn disconnect(&self) {
        self.core.close(&self.broker);
    }
}

/// In-memory broker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// Create an empty, reachable broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                inner: Mutex::new(BrokerInner::default()),
                reachable: AtomicBool::new(true),
                next_connection_id: AtomicU64::new(0),
                next_delivery_tag: AtomicU64::new(0),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Make subsequent `connect` calls fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Close every open connection as if the broker dropped them.
    ///
    /// Returns the number of connections severed.
    pub fn sever_connections(&self) -> usize {
        let cores: Vec<Arc<ConnectionCore>> = self
            .state
            .inner
            .lock()
            .connections
            .values()
            .filter_map(Weak::upgrade)
            .collect();

        for core in &cores {
            core.close(&self.state);
        }
        warn!(severed = cores.len(), "Connections severed");
        cores.len()
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.state.inner.lock().queues.contains_key(name)
    }

    pub fn exchange_exists(&self, name: &str) -> bool {
        self.state.inner.lock().exchanges.contains_key(name)
    }

    /// Ready (not yet delivered) messages in a queue.
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.state.queue(name).map(|q| q.depth())
    }

    /// All queue names, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.inner.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total publishes accepted, routed or not.
    pub fn published_count(&self) -> u64 {
        self.state.published.load(Ordering::Relaxed)
    }

    pub fn open_connections(&self) -> usize {
        self.state
            .inner
            .lock()
            .connections
            .values()
            .filter(|c| c.upgrade().is_some_and(|c| c.is_open()))
            .count()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn Connection>, TransportError> {
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("broker unreachable".into()));
        }

        let id = self.state.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        let core = Arc::new(ConnectionCore {
            id,
            open: AtomicBool::new(true),
            closed: Notify::new(),
            unacked: Mutex::new(HashMap::new()),
            owned_queues: Mutex::new(Vec::new()),
        });
        self.state
            .inner
            .lock()
            .connections
            .insert(id, Arc::downgrade(&core));

        debug!(connection = id, "Connection opened");
        Ok(Arc::new(InMemoryConnection {
            core,
            broker: self.state.clone(),
        }))
    }
}

//! # Consumer Flows
//!
//! Events published through `Publisher` and consumed by a `WorkerPool`,
//! with the `InMemoryLedger` as the shared consumption record.
//!
//! ## Flows Tested
//!
//! 1. **Fan-out**: every bound consumer group sees every event once
//! 2. **Redelivery**: a duplicated delivery never re-runs a successful handler
//! 3. **Retry**: a failed handler is retried via broker requeue until success
//! 4. **Poison**: malformed and unknown deliveries do not stop the workers

#[cfg(test)]
mod tests {
    use crate::fixtures::{Billing, Inventory, OrderPlaced, StockAdjusted};
    use crate::init_tracing;
    use shared_bus::{
        Broker, Connection, ExchangeKind, InMemoryBroker, PublishProperties, Publisher,
    };
    use shared_types::{encode, Envelope};
    use std::sync::Arc;
    use std::time::Duration;
    use sy_01_consumer::{
        ConsumerConfig, ConsumptionLedger, ConsumptionStatus, Consumer, InMemoryLedger, MessageKey,
        WorkerPool,
    };
    use tokio::sync::watch;

    const EXCHANGE: &str = "ipc:orders";

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn config(queue: &str, workers: usize) -> ConsumerConfig {
        ConsumerConfig {
            workers,
            poll_interval: Duration::from_millis(20),
            lock_timeout: Duration::from_secs(2),
            ..ConsumerConfig::new(EXCHANGE, queue)
        }
    }

    struct Group {
        ledger: Arc<InMemoryLedger>,
        billing: Arc<Billing>,
        inventory: Arc<Inventory>,
        pool: WorkerPool,
    }

    /// Declare the group's queue up front, then start its workers.
    async fn start_group(
        broker: &InMemoryBroker,
        queue: &str,
        workers: usize,
        billing: Billing,
        shutdown: watch::Receiver<bool>,
    ) -> Group {
        let ledger = Arc::new(InMemoryLedger::new());
        let billing = Arc::new(billing);
        let inventory = Arc::new(Inventory::default());

        let mut consumer = Consumer::new(config(queue, workers), ledger.clone());
        consumer
            .register::<OrderPlaced, _>(billing.clone())
            .unwrap();
        consumer
            .register::<StockAdjusted, _>(inventory.clone())
            .unwrap();

        let setup = broker.connect().await.unwrap();
        consumer.declare(setup.as_ref()).await.unwrap();
        setup.disconnect().await;

        let pool = WorkerPool::spawn(Arc::new(consumer), Arc::new(broker.clone()), shutdown);
        Group {
            ledger,
            billing,
            inventory,
            pool,
        }
    }

    async fn wait_for(ledger: &InMemoryLedger, status: ConsumptionStatus, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let count = ledger.count_by_status(status).await.unwrap();
            if count >= expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {expected} {status} records, have {count}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    // =============================================================================
    // FAN-OUT
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fanout_reaches_every_group_once() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let billing =
            start_group(&broker, "orders.billing", 3, Billing::default(), shutdown_rx.clone())
                .await;
        let audit = start_group(&broker, "orders.audit", 2, Billing::default(), shutdown_rx).await;

        let publisher = Publisher::connect(&broker, EXCHANGE, ExchangeKind::Fanout)
            .await
            .unwrap();
        for order_id in 1..=20 {
            publisher.publish(&OrderPlaced::new(order_id)).await.unwrap();
        }
        publisher
            .publish(&StockAdjusted {
                sku: "SKU-1".into(),
                delta: -2,
            })
            .await
            .unwrap();

        wait_for(&billing.ledger, ConsumptionStatus::Success, 21).await;
        wait_for(&audit.ledger, ConsumptionStatus::Success, 21).await;

        for group in [&billing, &audit] {
            assert_eq!(group.billing.calls(), 20);
            assert_eq!(group.inventory.calls(), 1);
            assert!((1..=20).all(|id| group.billing.times_seen(id) == 1));
        }

        shutdown_tx.send(true).unwrap();
        billing.pool.join().await;
        audit.pool.join().await;
        assert_eq!(broker.queue_depth("orders.billing"), Some(0));
        assert_eq!(broker.queue_depth("orders.audit"), Some(0));
    }

    // =============================================================================
    // REDELIVERY
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_duplicate_delivery_runs_handler_once() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let group = start_group(&broker, "orders.billing", 4, Billing::default(), shutdown_rx).await;

        // Same message id published five times, as an at-least-once broker may
        let order = OrderPlaced::new(42);
        let body = encode(&order).unwrap();
        let raw = broker.connect().await.unwrap();
        for _ in 0..5 {
            raw.publish(
                EXCHANGE,
                "",
                body.clone(),
                PublishProperties {
                    message_id: Some("order-42".into()),
                    ..PublishProperties::default()
                },
            )
            .await
            .unwrap();
        }

        wait_for(&group.ledger, ConsumptionStatus::Success, 1).await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while broker.queue_depth("orders.billing") != Some(0) {
            assert!(tokio::time::Instant::now() < deadline, "queue never drained");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(true).unwrap();
        group.pool.join().await;

        assert_eq!(group.billing.calls(), 1);
        assert_eq!(group.ledger.len(), 1);
        let record = group
            .ledger
            .get(&MessageKey::new("order-42"))
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_consumed());
        assert_eq!(record.attempts, 1);
        assert_eq!(record.encoded_message, Envelope::decode(&body).unwrap().message);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_content_hash_key_deduplicates_uuidless_events() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let group = start_group(&broker, "orders.billing", 2, Billing::default(), shutdown_rx).await;

        let event = StockAdjusted {
            sku: "SKU-9".into(),
            delta: 5,
        };
        let raw = broker.connect().await.unwrap();
        for _ in 0..3 {
            raw.publish(
                EXCHANGE,
                "",
                encode(&event).unwrap(),
                PublishProperties::default(),
            )
            .await
            .unwrap();
        }

        wait_for(&group.ledger, ConsumptionStatus::Success, 1).await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while broker.queue_depth("orders.billing") != Some(0) {
            assert!(tokio::time::Instant::now() < deadline, "queue never drained");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(true).unwrap();
        group.pool.join().await;

        assert_eq!(group.inventory.calls(), 1);
        let records = group.ledger.records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].id.as_str().starts_with("sha256:"));
    }

    // =============================================================================
    // RETRY
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_handler_retried_until_success() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let group = start_group(
            &broker,
            "orders.billing",
            2,
            Billing::failing_first(2),
            shutdown_rx,
        )
        .await;

        let publisher = Publisher::connect(&broker, EXCHANGE, ExchangeKind::Fanout)
            .await
            .unwrap();
        let order = OrderPlaced::new(7);
        publisher.publish(&order).await.unwrap();

        wait_for(&group.ledger, ConsumptionStatus::Success, 1).await;
        shutdown_tx.send(true).unwrap();
        group.pool.join().await;

        let record = group
            .ledger
            .get(&MessageKey::new(order.uuid.to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.attempts, 3);
        assert_eq!(record.last_error, None);
        assert_eq!(group.billing.times_seen(7), 1);
    }

    // =============================================================================
    // POISON
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_poison_and_unknown_deliveries_do_not_stop_workers() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let group = start_group(&broker, "orders.billing", 2, Billing::default(), shutdown_rx).await;

        let raw = broker.connect().await.unwrap();
        raw.publish(
            EXCHANGE,
            "",
            b"\x00\x01 not an envelope".to_vec(),
            PublishProperties::default(),
        )
        .await
        .unwrap();
        let unknown = Envelope::new("Events::Refunded", br#"{"order_id": 3}"#.to_vec())
            .to_bytes()
            .unwrap();
        raw.publish(EXCHANGE, "", unknown, PublishProperties::default())
            .await
            .unwrap();

        let publisher = Publisher::connect(&broker, EXCHANGE, ExchangeKind::Fanout)
            .await
            .unwrap();
        for order_id in 1..=5 {
            publisher.publish(&OrderPlaced::new(order_id)).await.unwrap();
        }

        wait_for(&group.ledger, ConsumptionStatus::Success, 5).await;
        wait_for(&group.ledger, ConsumptionStatus::UnknownType, 1).await;
        shutdown_tx.send(true).unwrap();
        group.pool.join().await;

        assert_eq!(group.billing.calls(), 5);
        let unknown = group
            .ledger
            .records()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.status == ConsumptionStatus::UnknownType)
            .unwrap();
        assert_eq!(unknown.message_type, "Events::Refunded");
        assert_eq!(unknown.attempts, 0);
        assert_eq!(broker.queue_depth("orders.billing"), Some(0));
    }
}

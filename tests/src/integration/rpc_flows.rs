//! # RPC Flows
//!
//! `RpcClient` and `RpcServer` talking over one `InMemoryBroker`.
//!
//! ## Flows Tested
//!
//! 1. **Round trip**: reply decoded, reply queue released
//! 2. **Domain error**: responder error comes back as `success = false`
//! 3. **Deadline**: no responder, slow responder, late replies
//! 4. **Scale-out**: several servers on one request queue
//! 5. **Contract mismatch**: reply type unknown to the client
//! 6. **Shared broker**: consumer workers and RPC traffic side by side

#[cfg(test)]
mod tests {
    use crate::fixtures::{Billing, GetQuote, OrderPlaced, PriceList, Quote};
    use crate::init_tracing;
    use async_trait::async_trait;
    use shared_bus::{Broker, ExchangeKind, InMemoryBroker, Publisher};
    use shared_types::{ErrorMessage, Message};
    use std::sync::Arc;
    use std::time::Duration;
    use sy_01_consumer::{
        ConsumerConfig, ConsumptionLedger, ConsumptionStatus, Consumer, InMemoryLedger,
        WorkerPool,
    };
    use sy_02_rpc::{
        Responder, RpcClient, RpcClientConfig, RpcError, RpcServer, RpcServerConfig,
    };
    use tokio::sync::watch;
    use tokio::time::Instant;

    const REQUESTS: &str = "pricing.rpc";

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Answers after `delay`.
    struct SlowPriceList {
        delay: Duration,
    }

    #[async_trait]
    impl Responder<GetQuote> for SlowPriceList {
        type Reply = Quote;

        async fn respond(&self, request: GetQuote) -> Result<Quote, ErrorMessage> {
            tokio::time::sleep(self.delay).await;
            PriceList.respond(request).await
        }
    }

    fn client_config() -> RpcClientConfig {
        RpcClientConfig {
            default_timeout: Duration::from_secs(2),
            ..RpcClientConfig::new("ipc:rpc", REQUESTS)
        }
    }

    fn client(broker: &InMemoryBroker) -> RpcClient {
        let mut client = RpcClient::new(Arc::new(broker.clone()), client_config());
        client.register_response_type::<Quote>().unwrap();
        client
    }

    fn server_config() -> RpcServerConfig {
        RpcServerConfig {
            poll_interval: Duration::from_millis(20),
            ..RpcServerConfig::new("ipc:rpc", REQUESTS)
        }
    }

    /// Declare the request queue, then serve it with `responder` until shutdown.
    async fn start_server<R>(
        broker: &InMemoryBroker,
        responder: R,
        shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()>
    where
        R: Responder<GetQuote> + 'static,
    {
        let mut server = RpcServer::new(server_config());
        server.register::<GetQuote, _>(responder).unwrap();

        let setup = broker.connect().await.unwrap();
        server.declare(setup.as_ref()).await.unwrap();
        setup.disconnect().await;

        let broker = broker.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run(&broker, shutdown).await {
                panic!("server stopped: {e}");
            }
        })
    }

    fn reply_queues(broker: &InMemoryBroker) -> usize {
        broker
            .queue_names()
            .iter()
            .filter(|name| name.starts_with("amq.gen"))
            .count()
    }

    // =============================================================================
    // ROUND TRIP
    // =============================================================================

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = start_server(&broker, PriceList, shutdown_rx).await;

        let response = client(&broker)
            .request(GetQuote::new("SKU-1", 4))
            .await
            .unwrap();

        assert!(response.is_success());
        let quote: Quote = response.into_message().unwrap();
        assert_eq!(quote.sku, "SKU-1");
        assert_eq!(quote.total_cents, 1000);
        assert_eq!(reply_queues(&broker), 0);
        assert_eq!(broker.open_connections(), 1);

        shutdown_tx.send(true).unwrap();
        server.await.unwrap();
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_domain_error_is_failed_response() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _server = start_server(&broker, PriceList, shutdown_rx).await;

        let response = client(&broker)
            .request(GetQuote::new("missing", 1))
            .await
            .unwrap();

        assert!(!response.is_success());
        assert_eq!(response.type_tag(), ErrorMessage::TYPE);
        let error = response.error_message().unwrap();
        assert_eq!(error.code(), Some("unknown_sku"));
        assert_eq!(reply_queues(&broker), 0);
    }

    // =============================================================================
    // DEADLINE
    // =============================================================================

    #[tokio::test]
    async fn test_no_responder_times_out_within_bound() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let timeout = Duration::from_millis(250);

        let started = Instant::now();
        let response = client(&broker)
            .request_with_timeout(GetQuote::new("SKU-1", 1), timeout)
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= timeout, "returned early after {elapsed:?}");
        assert!(
            elapsed < timeout + Duration::from_millis(500),
            "overran by {:?}",
            elapsed - timeout
        );
        assert!(!response.is_success());
        assert_eq!(response.error_message().unwrap().code(), Some("timeout"));
        assert_eq!(reply_queues(&broker), 0);
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_late_reply_never_reaches_a_later_call() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _server = start_server(
            &broker,
            SlowPriceList {
                delay: Duration::from_millis(300),
            },
            shutdown_rx,
        )
        .await;
        let client = client(&broker);

        let first = client
            .request_with_timeout(GetQuote::new("SKU-late", 1), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(!first.is_success());
        assert_eq!(reply_queues(&broker), 0);

        let second = client
            .request_with_timeout(GetQuote::new("SKU-fresh", 2), Duration::from_secs(2))
            .await
            .unwrap();
        let quote: Quote = second.into_message().unwrap();
        assert_eq!(quote.sku, "SKU-fresh");
        assert_eq!(reply_queues(&broker), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_call_does_not_block_fast_calls() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _server = start_server(&broker, PriceList, shutdown_rx).await;
        let client = Arc::new(client(&broker));

        // Goes to a routing key nobody serves, so it can only time out
        let mut stranded_client = RpcClient::new(
            Arc::new(broker.clone()),
            RpcClientConfig::new("ipc:rpc", "nobody.rpc"),
        );
        stranded_client.register_response_type::<Quote>().unwrap();
        let stranded = tokio::spawn(async move {
            stranded_client
                .request_with_timeout(GetQuote::new("SKU-1", 1), Duration::from_secs(1))
                .await
        });

        let started = Instant::now();
        for n in 1..=5 {
            let response = client.request(GetQuote::new("SKU-2", n)).await.unwrap();
            assert!(response.is_success());
        }
        assert!(started.elapsed() < Duration::from_millis(900));

        let stranded = stranded.await.unwrap().unwrap();
        assert_eq!(stranded.error_message().unwrap().code(), Some("timeout"));
    }

    // =============================================================================
    // SCALE-OUT
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_servers_share_request_queue() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let servers = vec![
            start_server(&broker, PriceList, shutdown_rx.clone()).await,
            start_server(&broker, PriceList, shutdown_rx.clone()).await,
            start_server(&broker, PriceList, shutdown_rx).await,
        ];
        let client = Arc::new(client(&broker));

        let calls: Vec<_> = (1..=24u32)
            .map(|quantity| {
                let client = client.clone();
                tokio::spawn(async move {
                    let response = client
                        .request(GetQuote::new(format!("SKU-{quantity}"), quantity))
                        .await
                        .unwrap();
                    (quantity, response.into_message::<Quote>().unwrap())
                })
            })
            .collect();

        for call in calls {
            let (quantity, quote) = call.await.unwrap();
            assert_eq!(quote.sku, format!("SKU-{quantity}"));
            assert_eq!(quote.total_cents, u64::from(quantity) * 250);
        }
        assert_eq!(reply_queues(&broker), 0);

        shutdown_tx.send(true).unwrap();
        for server in servers {
            server.await.unwrap();
        }
    }

    // =============================================================================
    // CONTRACT MISMATCH
    // =============================================================================

    #[tokio::test]
    async fn test_unregistered_reply_type_raises_with_tag() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _server = start_server(&broker, PriceList, shutdown_rx).await;

        // Knows nothing about Quote
        let client = RpcClient::new(Arc::new(broker.clone()), client_config());
        let result = client.request(GetQuote::new("SKU-1", 1)).await;

        match result {
            Err(RpcError::UnhandledMessage { type_tag, .. }) => {
                assert_eq!(type_tag, Quote::TYPE);
            }
            other => panic!("expected UnhandledMessage, got {other:?}"),
        }
        assert_eq!(reply_queues(&broker), 0);
    }

    #[tokio::test]
    async fn test_unreachable_broker_raises_before_publishing() {
        init_tracing();
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);

        let result = client(&broker).request(GetQuote::new("SKU-1", 1)).await;

        assert!(matches!(result, Err(RpcError::Connection(_))));
        assert_eq!(broker.published_count(), 0);
    }

    // =============================================================================
    // SHARED BROKER
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_consumer_and_rpc_share_broker() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = start_server(&broker, PriceList, shutdown_rx.clone()).await;

        let ledger = Arc::new(InMemoryLedger::new());
        let billing = Arc::new(Billing::default());
        let mut consumer = Consumer::new(
            ConsumerConfig {
                workers: 2,
                poll_interval: Duration::from_millis(20),
                ..ConsumerConfig::new("ipc:orders", "orders.billing")
            },
            ledger.clone(),
        );
        consumer
            .register::<OrderPlaced, _>(billing.clone())
            .unwrap();
        let setup = broker.connect().await.unwrap();
        consumer.declare(setup.as_ref()).await.unwrap();
        setup.disconnect().await;
        let pool = WorkerPool::spawn(Arc::new(consumer), Arc::new(broker.clone()), shutdown_rx);

        let publisher = Publisher::connect(&broker, "ipc:orders", ExchangeKind::Fanout)
            .await
            .unwrap();
        let client = client(&broker);
        for order_id in 1..=5 {
            publisher.publish(&OrderPlaced::new(order_id)).await.unwrap();
            let response = client
                .request(GetQuote::new("SKU-1", order_id as u32))
                .await
                .unwrap();
            assert!(response.is_success());
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while ledger
            .count_by_status(ConsumptionStatus::Success)
            .await
            .unwrap()
            < 5
        {
            assert!(Instant::now() < deadline, "consumer stalled");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(billing.calls(), 5);
        // RPC replies never leak into the consumer's ledger
        assert!(ledger
            .records()
            .await
            .unwrap()
            .iter()
            .all(|r| r.message_type == OrderPlaced::TYPE));

        shutdown_tx.send(true).unwrap();
        pool.join().await;
        server.await.unwrap();
        assert_eq!(broker.open_connections(), 1);
    }
}

//! # Switchyard Messaging Benchmarks
//!
//! | Path | Measured |
//! |------|----------|
//! | Envelope codec | encode / decode of one framed message |
//! | Type registry | lookup hit and miss |
//! | Consumer dispatch | `handle_delivery` end to end against the in-memory ledger |
//! | Consumer dispatch | redelivery of an already consumed key |

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use shared_bus::{Acknowledger, DeliveryMeta, PublishProperties, TransportError};
use shared_types::{encode, Envelope, Message, TypeRegistry};
use std::sync::Arc;
use std::time::Duration;
use sy_01_consumer::{Consumer, ConsumerConfig, HandlerFault, InMemoryLedger, MessageHandler};
use sy_tests::fixtures::{GetQuote, OrderPlaced};

/// Accepts every settlement.
struct NullAcker;

#[async_trait]
impl Acknowledger for NullAcker {
    async fn ack(&self, _delivery_tag: u64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn nack(&self, _delivery_tag: u64, _requeue: bool) -> Result<(), TransportError> {
        Ok(())
    }
}

struct Noop;

#[async_trait]
impl MessageHandler<OrderPlaced> for Noop {
    async fn handle(&self, message: OrderPlaced) -> Result<(), HandlerFault> {
        black_box(message);
        Ok(())
    }
}

fn meta(message_id: Option<String>) -> DeliveryMeta {
    DeliveryMeta {
        delivery_tag: 1,
        exchange: "ipc:orders".into(),
        routing_key: String::new(),
        queue: "orders.billing".into(),
        redelivered: false,
        properties: PublishProperties {
            message_id,
            ..PublishProperties::default()
        },
    }
}

// ============================================================================
// Envelope codec
// ============================================================================

fn bench_envelope_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");

    let order = OrderPlaced::new(42);
    let framed = encode(&order).unwrap();

    group.bench_function("encode", |b| b.iter(|| encode(black_box(&order)).unwrap()));
    group.bench_function("decode", |b| {
        b.iter(|| Envelope::decode(black_box(&framed)).unwrap())
    });
    group.bench_function("decode_and_decode_inner", |b| {
        b.iter(|| {
            let envelope = Envelope::decode(black_box(&framed)).unwrap();
            OrderPlaced::decode(&envelope.message).unwrap()
        })
    });

    group.finish();
}

// ============================================================================
// Type registry
// ============================================================================

fn bench_registry_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    let mut registry: TypeRegistry = TypeRegistry::new("bench");
    registry.register_type::<OrderPlaced>(None).unwrap();
    registry.register_type::<GetQuote>(None).unwrap();

    group.bench_function("lookup_hit", |b| {
        b.iter(|| registry.lookup(black_box(OrderPlaced::TYPE)).is_matched())
    });
    group.bench_function("lookup_miss", |b| {
        b.iter(|| registry.lookup(black_box("Events::Unknown")).is_matched())
    });

    group.finish();
}

// ============================================================================
// Consumer dispatch
// ============================================================================

fn bench_handle_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("consumer");
    group.measurement_time(Duration::from_secs(10));

    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut consumer = Consumer::new(
        ConsumerConfig::new("ipc:orders", "orders.billing"),
        Arc::new(InMemoryLedger::new()),
    );
    consumer.register::<OrderPlaced, _>(Noop).unwrap();

    for batch in [1usize, 64, 512] {
        let bodies: Vec<Vec<u8>> = (0..batch)
            .map(|_| {
                let order_id = rand::thread_rng().gen_range(1..1_000_000);
                encode(&OrderPlaced::new(order_id)).unwrap()
            })
            .collect();

        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("fresh_keys", batch), &bodies, |b, bodies| {
            b.iter(|| {
                rt.block_on(async {
                    for body in bodies {
                        // New key every time so the handler always runs
                        let fresh = meta(Some(uuid::Uuid::new_v4().to_string()));
                        consumer
                            .handle_delivery(&NullAcker, body, &fresh)
                            .await
                            .unwrap();
                    }
                })
            })
        });
    }

    let body = encode(&OrderPlaced::new(1)).unwrap();
    let consumed = meta(Some("order-1".into()));
    rt.block_on(consumer.handle_delivery(&NullAcker, &body, &consumed))
        .unwrap();

    group.bench_function("already_consumed", |b| {
        b.iter(|| {
            rt.block_on(consumer.handle_delivery(&NullAcker, black_box(&body), &consumed))
                .unwrap()
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_envelope_codec,
    bench_registry_lookup,
    bench_handle_delivery
);
criterion_main!(benches);

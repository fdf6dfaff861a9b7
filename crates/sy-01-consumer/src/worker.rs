//! Worker pool running the dispatch loop.
//!
//! Each worker owns one connection and pulls from the shared queue. A
//! failed delivery never stops a worker; only the shutdown signal or a lost
//! connection does.

use crate::service::Consumer;
use shared_bus::{Broker, Connection, TransportError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to the spawned workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `consumer.config().workers` workers.
    ///
    /// Send `true` on the watch channel (or drop its sender) to stop them.
    pub fn spawn(
        consumer: Arc<Consumer>,
        broker: Arc<dyn Broker>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let count = consumer.config().workers;
        let handles = (0..count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    consumer.clone(),
                    broker.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(
            workers = count,
            queue = %consumer.config().queue,
            "Consumer workers started"
        );
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Consumer worker panicked");
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    consumer: Arc<Consumer>,
    broker: Arc<dyn Broker>,
    mut shutdown: watch::Receiver<bool>,
) {
    let connection = match broker.connect().await {
        Ok(connection) => connection,
        Err(e) => {
            error!(worker = worker_id, error = %e, "Worker failed to connect");
            return;
        }
    };

    if let Err(e) = consumer.declare(connection.as_ref()).await {
        error!(worker = worker_id, error = %e, "Worker failed to declare topology");
        connection.disconnect().await;
        return;
    }

    let queue = consumer.config().queue.clone();
    let poll_interval = consumer.config().poll_interval;
    debug!(worker = worker_id, queue = %queue, "Worker polling");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            result = connection.check_for_message(&queue, poll_interval) => match result {
                Ok(delivery) => {
                    if let Err(e) = consumer
                        .handle_delivery(connection.as_ref(), &delivery.body, &delivery.meta)
                        .await
                    {
                        warn!(
                            worker = worker_id,
                            queue = %queue,
                            delivery_tag = delivery.meta.delivery_tag,
                            error = %e,
                            "Delivery not consumed"
                        );
                    }
                }
                Err(TransportError::Timeout(_)) => {}
                Err(e) if e.is_fatal() => {
                    warn!(worker = worker_id, error = %e, "Worker lost its connection");
                    break;
                }
                Err(e) => {
                    warn!(worker = worker_id, error = %e, "Polling failed");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    connection.disconnect().await;
    debug!(worker = worker_id, "Worker stopped");
}

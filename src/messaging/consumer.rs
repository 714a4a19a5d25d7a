use actix::Addr;
use futures_util::{future, StreamExt};
use rdkafka::{
    config::ClientConfig,
    consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer},
    error::KafkaResult,
    message::OwnedMessage,
    ClientContext, Message, Offset, TopicPartitionList,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::watch;

use super::offsets::OffsetTracker;
use crate::actors::{AddToDlq, DlqActor};
use crate::config::KafkaSettings;
use crate::ingest::{IngestError, OrderIngestor};
use crate::metrics::Metrics;
use crate::utils::RetryConfig;

// ============================================================================
// Order Consumer
// ============================================================================
//
// Durable subscriber on the orders topic. The consumer group id is the
// durable subscription name, so delivery resumes from the last committed
// offset after a restart (at-least-once).
//
// Acknowledgement rules:
// - persisted (inserted or duplicate)  -> ack
// - malformed / invalid (poison)       -> dead-letter, then ack
// - persistence failure after retries  -> no ack; re-driven with backoff
//
// An ack marks the offset complete in the OffsetTracker; the commit only
// moves past offsets that are complete. A message still failing at shutdown
// stays uncommitted and is delivered again on the next start.
//
// ============================================================================

/// A received message, detached from the consumer's buffers.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

impl From<OwnedMessage> for InboundMessage {
    fn from(message: OwnedMessage) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}

/// Decides the fate of a single message; independent of the broker client.
#[derive(Clone)]
pub struct DeliveryHandler {
    ingestor: Arc<OrderIngestor>,
    dlq: Addr<DlqActor>,
    metrics: Arc<Metrics>,
}

impl DeliveryHandler {
    pub fn new(ingestor: Arc<OrderIngestor>, dlq: Addr<DlqActor>, metrics: Arc<Metrics>) -> Self {
        Self {
            ingestor,
            dlq,
            metrics,
        }
    }

    pub async fn handle(&self, message: &InboundMessage) -> Disposition {
        let started = Instant::now();
        let result = self.ingestor.ingest(&message.payload).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(outcome) => {
                self.metrics.record_ingest(outcome.as_str(), elapsed);
                Disposition::Ack
            }
            Err(err) if err.is_poison() => {
                self.metrics.record_ingest(err.reason(), elapsed);
                tracing::warn!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "Discarding poison message"
                );
                self.dead_letter(message, &err).await;
                Disposition::Ack
            }
            Err(err) => {
                self.metrics.record_ingest(err.reason(), elapsed);
                tracing::error!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "Order not persisted, leaving message unacknowledged for redelivery"
                );
                Disposition::Nack
            }
        }
    }

    async fn dead_letter(&self, message: &InboundMessage, err: &IngestError) {
        let request = AddToDlq {
            reason: err.reason().to_string(),
            error_message: err.to_string(),
            source_topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            payload: message.payload.clone(),
        };

        // A poison message is acknowledged even when the DLQ is unreachable;
        // redelivering it would fail the same way forever.
        match self.dlq.send(request).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, offset = message.offset, "Dead-letter publish failed"),
            Err(e) => tracing::error!(error = %e, offset = message.offset, "DLQ actor unavailable"),
        }
    }
}

/// Offset bookkeeping shared by the consume loop and the rebalance callback.
type SharedTracker = Arc<Mutex<OffsetTracker>>;

fn lock(tracker: &Mutex<OffsetTracker>) -> MutexGuard<'_, OffsetTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Broker-independent half of the consume loop. A message is handled until it
/// is acknowledged; an unacknowledged one is re-driven with backoff, holding
/// its partition's watermark, until it persists, its partition is revoked, or
/// the service shuts down.
pub struct Acknowledger {
    handler: DeliveryHandler,
    tracker: SharedTracker,
    redelivery: RetryConfig,
    metrics: Arc<Metrics>,
}

impl Acknowledger {
    pub fn new(handler: DeliveryHandler, redelivery: RetryConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            handler,
            tracker: Arc::new(Mutex::new(OffsetTracker::new())),
            redelivery,
            metrics,
        }
    }

    fn tracker(&self) -> MutexGuard<'_, OffsetTracker> {
        lock(&self.tracker)
    }

    /// Register a message. Must be called in delivery order.
    pub fn begin(&self, message: &InboundMessage) {
        self.tracker().begin(message.partition, message.offset);
    }

    /// Process a registered message. Returns the partition's new commit
    /// position when its acknowledgement advanced the watermark.
    pub async fn process(&self, message: &InboundMessage, mut shutdown: watch::Receiver<bool>) -> Option<i64> {
        let mut attempt = 0;

        loop {
            if self.handler.handle(message).await == Disposition::Ack {
                return self.tracker().complete(message.partition, message.offset);
            }
            attempt += 1;

            if !self.tracker().is_pending(message.partition, message.offset) {
                tracing::info!(
                    partition = message.partition,
                    offset = message.offset,
                    "Partition revoked, leaving message to its new owner"
                );
                return None;
            }

            let delay = self.redelivery.delay_after(attempt);
            tracing::warn!(
                partition = message.partition,
                offset = message.offset,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "🔁 Redelivering unacknowledged message"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => {
                    tracing::warn!(
                        partition = message.partition,
                        offset = message.offset,
                        "Shutdown during redelivery, message left uncommitted"
                    );
                    return None;
                }
            }
            self.metrics.record_retry_attempt("redelivery");
        }
    }

    pub fn watermarks(&self) -> Vec<(i32, i64)> {
        self.tracker().watermarks()
    }

    pub fn in_flight(&self) -> usize {
        self.tracker().in_flight()
    }
}

/// Commits what was acknowledged on revoked partitions, then forgets them so
/// neither a stale pending offset nor a partition owned by another member is
/// ever committed from here.
pub struct RebalanceContext {
    topic: String,
    tracker: SharedTracker,
    metrics: Arc<Metrics>,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        let Rebalance::Revoke(revoked) = rebalance else {
            return;
        };

        let positions: Vec<(i32, i64)> = {
            let mut tracker = lock(&self.tracker);
            revoked
                .elements_for_topic(&self.topic)
                .iter()
                .filter_map(|elem| {
                    let partition = elem.partition();
                    tracker.revoke(partition).map(|next| (partition, next))
                })
                .collect()
        };

        tracing::info!(revoked = ?positions, "Partitions revoked");
        if !positions.is_empty() {
            commit_positions(consumer, &self.topic, &positions, CommitMode::Sync, &self.metrics);
        }
    }
}

fn commit_positions(
    consumer: &impl Consumer<RebalanceContext>,
    topic: &str,
    positions: &[(i32, i64)],
    mode: CommitMode,
    metrics: &Metrics,
) {
    let mut list = TopicPartitionList::new();
    for &(partition, next) in positions {
        if let Err(e) = list.add_partition_offset(topic, partition, Offset::Offset(next)) {
            tracing::error!(error = %e, partition, next, "Invalid commit position");
            return;
        }
    }

    match consumer.commit(&list, mode) {
        Ok(()) => {
            metrics.record_offset_commit(true);
            tracing::debug!(positions = ?positions, "Committed offsets");
        }
        Err(e) => {
            metrics.record_offset_commit(false);
            tracing::warn!(error = %e, positions = ?positions, "Offset commit failed");
        }
    }
}

pub struct OrderConsumer {
    consumer: StreamConsumer<RebalanceContext>,
    topic: String,
    acknowledger: Acknowledger,
    metrics: Arc<Metrics>,
    max_in_flight: usize,
}

impl OrderConsumer {
    pub fn new(
        settings: &KafkaSettings,
        handler: DeliveryHandler,
        redelivery: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> KafkaResult<Self> {
        let acknowledger = Acknowledger::new(handler, redelivery, metrics.clone());
        let context = RebalanceContext {
            topic: settings.topic.clone(),
            tracker: acknowledger.tracker.clone(),
            metrics: metrics.clone(),
        };

        let consumer: StreamConsumer<RebalanceContext> = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("group.id", &settings.durable_name)
            .set("client.id", &settings.client_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .create_with_context(context)?;

        consumer.subscribe(&[settings.topic.as_str()])?;

        tracing::info!(
            topic = %settings.topic,
            durable_name = %settings.durable_name,
            client_id = %settings.client_id,
            "📡 Subscribed to order topic"
        );

        Ok(Self {
            consumer,
            topic: settings.topic.clone(),
            acknowledger,
            metrics,
            max_in_flight: settings.max_in_flight.max(1),
        })
    }

    /// Consume until `shutdown` flips to true, then drain in-flight messages
    /// and commit the final positions.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mut stop_rx = shutdown.clone();
        let stop = async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
            tracing::info!("Consumer stop requested, no longer pulling messages");
        };

        self.consumer
            .stream()
            .take_until(stop)
            .filter_map(|result| {
                future::ready(match result {
                    Ok(message) => Some(InboundMessage::from(message.detach())),
                    Err(e) => {
                        tracing::error!(error = %e, "Error receiving message");
                        None
                    }
                })
            })
            .map(|message| {
                self.acknowledger.begin(&message);
                message
            })
            .for_each_concurrent(self.max_in_flight, |message| {
                let shutdown = shutdown.clone();
                async move {
                    if let Some(next) = self.acknowledger.process(&message, shutdown).await {
                        self.commit(&[(message.partition, next)], CommitMode::Async);
                    }
                }
            })
            .await;

        let unacknowledged = self.acknowledger.in_flight();
        if unacknowledged > 0 {
            tracing::warn!(unacknowledged, "Stopping with unacknowledged messages; they will be redelivered");
        }
        let watermarks = self.acknowledger.watermarks();
        if !watermarks.is_empty() {
            self.commit(&watermarks, CommitMode::Sync);
        }
        self.consumer.unsubscribe();

        tracing::info!("🛑 Order consumer stopped");
    }

    fn commit(&self, positions: &[(i32, i64)], mode: CommitMode) {
        commit_positions(&self.consumer, &self.topic, positions, mode, &self.metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::RecordingPublisher;
    use crate::cache::OrderCache;
    use crate::models::fixtures::sample_order;
    use crate::store::memory::InMemoryOrderStore;
    use crate::utils::RetryConfig;
    use actix::Actor;
    use std::time::Duration;

    struct Harness {
        handler: DeliveryHandler,
        store: Arc<InMemoryOrderStore>,
        cache: OrderCache,
        dead_letters: Arc<RecordingPublisher>,
    }

    fn harness() -> Harness {
        let metrics = Arc::new(Metrics::new().unwrap());
        let store = Arc::new(InMemoryOrderStore::new());
        let cache = OrderCache::unbounded();
        let retry = RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        };
        let ingestor = Arc::new(OrderIngestor::new(store.clone(), cache.clone(), retry, metrics.clone()));
        let dead_letters = Arc::new(RecordingPublisher::default());
        let dlq = DlqActor::new(dead_letters.clone(), "orders_1.dlq", metrics.clone()).start();

        Harness {
            handler: DeliveryHandler::new(ingestor, dlq, metrics),
            store,
            cache,
            dead_letters,
        }
    }

    fn acknowledger(h: &Harness) -> Acknowledger {
        let redelivery = RetryConfig {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        };
        Acknowledger::new(h.handler.clone(), redelivery, Arc::new(Metrics::new().unwrap()))
    }

    fn inbound(offset: i64, payload: Vec<u8>) -> InboundMessage {
        InboundMessage {
            topic: "orders_1".to_string(),
            partition: 0,
            offset,
            payload,
        }
    }

    #[actix::test]
    async fn test_valid_message_is_acknowledged() {
        let h = harness();
        let payload = serde_json::to_vec(&sample_order("X1")).unwrap();

        assert_eq!(h.handler.handle(&inbound(0, payload)).await, Disposition::Ack);
        assert_eq!(h.store.len(), 1);
        assert!(h.cache.get("X1").await.is_some());
        assert!(h.dead_letters.sent.lock().unwrap().is_empty());
    }

    #[actix::test]
    async fn test_redelivered_message_is_acknowledged_once_stored() {
        let h = harness();
        let payload = serde_json::to_vec(&sample_order("X1")).unwrap();

        assert_eq!(h.handler.handle(&inbound(0, payload.clone())).await, Disposition::Ack);
        assert_eq!(h.handler.handle(&inbound(1, payload)).await, Disposition::Ack);
        assert_eq!(h.store.len(), 1);
    }

    #[actix::test]
    async fn test_invalid_message_is_dead_lettered_and_acknowledged() {
        let h = harness();
        let mut order = sample_order("X2");
        order.delivery.name.clear();
        let payload = serde_json::to_vec(&order).unwrap();

        assert_eq!(h.handler.handle(&inbound(7, payload)).await, Disposition::Ack);
        assert_eq!(h.store.len(), 0);

        let sent = h.dead_letters.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let envelope: serde_json::Value = serde_json::from_slice(&sent[0].2).unwrap();
        assert_eq!(envelope["reason"], "rejected");
        assert!(envelope["error"].as_str().unwrap().contains("delivery.name"));
    }

    #[actix::test]
    async fn test_malformed_message_is_dead_lettered_and_acknowledged() {
        let h = harness();

        assert_eq!(h.handler.handle(&inbound(3, b"\x00\x01".to_vec())).await, Disposition::Ack);

        let sent = h.dead_letters.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "orders_1/0/3");
    }

    #[actix::test]
    async fn test_persistence_failure_is_not_acknowledged() {
        let h = harness();
        h.store.fail_next_puts(5);
        let payload = serde_json::to_vec(&sample_order("X1")).unwrap();

        assert_eq!(h.handler.handle(&inbound(0, payload)).await, Disposition::Nack);
        assert!(h.cache.get("X1").await.is_none());
        assert!(h.dead_letters.sent.lock().unwrap().is_empty());
    }

    #[actix::test]
    async fn test_acknowledged_message_releases_commit() {
        let h = harness();
        let ack = acknowledger(&h);
        let (_tx, shutdown) = watch::channel(false);
        let message = inbound(0, serde_json::to_vec(&sample_order("X1")).unwrap());

        ack.begin(&message);

        assert_eq!(ack.process(&message, shutdown).await, Some(1));
        assert_eq!(ack.watermarks(), vec![(0, 1)]);
        assert_eq!(ack.in_flight(), 0);
    }

    #[actix::test]
    async fn test_commit_waits_for_earlier_offsets() {
        let h = harness();
        let ack = acknowledger(&h);
        let (_tx, shutdown) = watch::channel(false);
        let first = inbound(0, serde_json::to_vec(&sample_order("X1")).unwrap());
        let second = inbound(1, serde_json::to_vec(&sample_order("X2")).unwrap());

        ack.begin(&first);
        ack.begin(&second);

        assert_eq!(ack.process(&second, shutdown.clone()).await, None);
        assert_eq!(ack.watermarks(), vec![(0, 0)]);
        assert_eq!(ack.process(&first, shutdown).await, Some(2));
    }

    #[actix::test]
    async fn test_poison_message_is_committed() {
        let h = harness();
        let ack = acknowledger(&h);
        let (_tx, shutdown) = watch::channel(false);
        let message = inbound(4, b"{not json".to_vec());

        ack.begin(&message);

        assert_eq!(ack.process(&message, shutdown).await, Some(5));
        assert_eq!(h.dead_letters.sent.lock().unwrap().len(), 1);
    }

    #[actix::test]
    async fn test_failed_message_is_redriven_until_stored() {
        let h = harness();
        let ack = acknowledger(&h);
        let (_tx, shutdown) = watch::channel(false);
        // Two store attempts per delivery: the first delivery fails outright,
        // the re-drive fails once more and then succeeds.
        h.store.fail_next_puts(3);
        let message = inbound(0, serde_json::to_vec(&sample_order("X1")).unwrap());

        ack.begin(&message);

        assert_eq!(ack.process(&message, shutdown).await, Some(1));
        assert_eq!(h.store.put_calls(), 4);
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.cache.get("X1").await, Some(sample_order("X1")));
        assert_eq!(ack.watermarks(), vec![(0, 1)]);
    }

    #[actix::test]
    async fn test_shutdown_stops_redelivery_without_commit() {
        let h = harness();
        let ack = acknowledger(&h);
        let (tx, shutdown) = watch::channel(false);
        h.store.fail_next_puts(u32::MAX);
        tx.send(true).unwrap();
        let message = inbound(3, serde_json::to_vec(&sample_order("X1")).unwrap());

        ack.begin(&message);

        assert_eq!(ack.process(&message, shutdown).await, None);
        assert_eq!(ack.watermarks(), vec![(0, 3)]);
        assert_eq!(ack.in_flight(), 1);
        assert_eq!(h.store.len(), 0);
    }

    #[actix::test]
    async fn test_revoked_partition_stops_redelivery() {
        let h = harness();
        let ack = acknowledger(&h);
        let (_tx, shutdown) = watch::channel(false);
        h.store.fail_next_puts(u32::MAX);
        let message = inbound(8, serde_json::to_vec(&sample_order("X1")).unwrap());

        ack.begin(&message);
        ack.tracker().revoke(message.partition);

        assert_eq!(ack.process(&message, shutdown).await, None);
        assert!(ack.watermarks().is_empty());
        assert_eq!(h.store.put_calls(), 2);
    }
}

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    error::KafkaResult,
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use std::time::Duration;

use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

/// Destination for outbound messages (dead letters, the publisher tool).
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> anyhow::Result<()>;
}

pub struct RedpandaProducer {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    send_timeout: Duration,
}

impl RedpandaProducer {
    pub fn new(brokers: &str, client_id: &str) -> KafkaResult<Self> {
        let send_timeout = Duration::from_secs(5);
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", client_id)
            .set("message.timeout.ms", send_timeout.as_millis().to_string())
            .set("enable.idempotence", "true")
            .create()?;

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            send_timeout,
        })
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state().await
    }
}

#[async_trait]
impl MessagePublisher for RedpandaProducer {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> anyhow::Result<()> {
        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(topic).key(key).payload(payload);
                self.producer
                    .send(record, Timeout::After(self.send_timeout))
                    .await
                    .map(|_| ())
                    .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(topic = %topic, key = %key, "Published message");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(topic = %topic, "Circuit breaker open - broker unavailable");
                Err(anyhow::anyhow!("Circuit breaker open for topic {}", topic))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %topic, "Failed to publish message");
                Err(e)
            }
        }
    }
}

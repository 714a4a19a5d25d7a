use actix::prelude::*;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::messaging::MessagePublisher;
use crate::metrics::Metrics;

// ============================================================================
// Dead Letter Queue Actor
// ============================================================================
//
// Receives poison messages (undecodable or invalid orders) from the consumer
// and republishes them to the dead-letter topic with the failure reason, so
// they can be drained from the main topic without being lost.
//
// ============================================================================

pub struct DlqActor {
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
    metrics: Arc<Metrics>,
}

impl DlqActor {
    pub fn new(publisher: Arc<dyn MessagePublisher>, topic: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            metrics,
        }
    }
}

impl Actor for DlqActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(topic = %self.topic, "DlqActor started - Dead Letter Queue ready");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("DlqActor stopped");
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<(), String>")]
pub struct AddToDlq {
    pub reason: String,
    pub error_message: String,
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Envelope written to the dead-letter topic.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub reason: String,
    pub error: String,
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Original message bytes, base64 (standard alphabet).
    pub payload: String,
    pub failed_at: DateTime<Utc>,
}

impl From<AddToDlq> for DeadLetter {
    fn from(msg: AddToDlq) -> Self {
        Self {
            id: Uuid::new_v4(),
            reason: msg.reason,
            error: msg.error_message,
            source_topic: msg.source_topic,
            partition: msg.partition,
            offset: msg.offset,
            payload: STANDARD.encode(&msg.payload),
            failed_at: Utc::now(),
        }
    }
}

impl DeadLetter {
    /// `topic/partition/offset` of the original message.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.source_topic, self.partition, self.offset)
    }
}

/// Stop the actor once the consumer no longer produces dead letters.
#[derive(Message)]
#[rtype(result = "()")]
pub struct StopDlq;

// ============================================================================
// Handlers
// ============================================================================

impl Handler<StopDlq> for DlqActor {
    type Result = ();

    fn handle(&mut self, _: StopDlq, ctx: &mut Self::Context) {
        tracing::info!("DlqActor received stop signal");
        ctx.stop();
    }
}

impl Handler<AddToDlq> for DlqActor {
    type Result = ResponseFuture<Result<(), String>>;

    fn handle(&mut self, msg: AddToDlq, _: &mut Self::Context) -> Self::Result {
        let publisher = self.publisher.clone();
        let topic = self.topic.clone();
        let metrics = self.metrics.clone();

        tracing::warn!(
            reason = %msg.reason,
            error = %msg.error_message,
            source_topic = %msg.source_topic,
            partition = msg.partition,
            offset = msg.offset,
            "💀 Adding message to Dead Letter Queue"
        );

        Box::pin(async move {
            let reason = msg.reason.clone();
            let letter = DeadLetter::from(msg);
            let key = letter.key();
            let body = serde_json::to_vec(&letter)
                .map_err(|e| format!("Failed to encode dead letter: {}", e))?;

            publisher
                .publish(&topic, &key, &body)
                .await
                .map_err(|e| format!("Failed to publish to DLQ: {}", e))?;

            metrics.record_dlq_message(&reason);
            tracing::info!(dead_letter_id = %letter.id, key = %key, "Message stored in DLQ");

            Ok(())
        })
    }
}

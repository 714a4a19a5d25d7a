use std::sync::Arc;

use crate::cache::OrderCache;
use crate::metrics::Metrics;
use crate::models::Order;
use crate::store::{OrderStore, PutOutcome, StoreError};
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};
use crate::validation::{validate, ValidationError};

// ============================================================================
// Order Ingestion Pipeline
// ============================================================================
//
// decode -> validate -> store.put -> cache.set
//
// The cache only ever holds the stored record. An insert caches the order it
// wrote; a duplicate caches the copy read back from the store, never the
// redelivered payload.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored,
    Duplicate,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Stored => "inserted",
            IngestOutcome::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Malformed order payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid order {order_uid:?}: {source}")]
    Validation {
        order_uid: String,
        #[source]
        source: ValidationError,
    },

    #[error("Failed to persist order {order_uid} after {attempts} attempt(s): {source}")]
    Persistence {
        order_uid: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

impl IngestError {
    /// Poison messages can never succeed and must be drained, not retried.
    pub fn is_poison(&self) -> bool {
        matches!(self, IngestError::Decode(_) | IngestError::Validation { .. })
    }

    pub fn reason(&self) -> &'static str {
        match self {
            IngestError::Decode(_) => "malformed",
            IngestError::Validation { .. } => "rejected",
            IngestError::Persistence { .. } => "persistence_failed",
        }
    }
}

pub struct OrderIngestor {
    store: Arc<dyn OrderStore>,
    cache: OrderCache,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl OrderIngestor {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: OrderCache,
        retry: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            cache,
            retry,
            metrics,
        }
    }

    /// Run one raw channel payload through the pipeline.
    pub async fn ingest(&self, payload: &[u8]) -> Result<IngestOutcome, IngestError> {
        let order = Order::from_payload(payload)?;

        validate(&order).map_err(|source| IngestError::Validation {
            order_uid: order.order_uid.clone(),
            source,
        })?;

        self.persist(order).await
    }

    async fn persist(&self, order: Order) -> Result<IngestOutcome, IngestError> {
        let result = retry_on_transient(&self.retry, |attempt| {
            if attempt > 1 {
                self.metrics.record_retry_attempt("order_store_put");
            }
            self.store.put(&order)
        })
        .await;

        let outcome = match result {
            RetryResult::Success(outcome) => outcome,
            RetryResult::Failed { error, attempts }
            | RetryResult::PermanentFailure { error, attempts } => {
                return Err(IngestError::Persistence {
                    order_uid: order.order_uid,
                    attempts,
                    source: error,
                });
            }
        };

        match outcome {
            PutOutcome::Inserted => {
                tracing::info!(order_uid = %order.order_uid, "✅ Order persisted");
                self.cache.set(order.order_uid.clone(), order).await;
                Ok(IngestOutcome::Stored)
            }
            PutOutcome::AlreadyExists => {
                tracing::info!(
                    order_uid = %order.order_uid,
                    "Order already persisted, treating redelivery as success"
                );
                self.cache_stored_copy(&order.order_uid).await;
                Ok(IngestOutcome::Duplicate)
            }
        }
    }

    /// Mirror the record that won the insert, which may differ from the
    /// redelivered payload. A failed read only costs a later read-through.
    async fn cache_stored_copy(&self, order_uid: &str) {
        if self.cache.get(order_uid).await.is_some() {
            return;
        }

        match self.store.get(order_uid).await {
            Ok(Some(stored)) => self.cache.set(order_uid, stored).await,
            Ok(None) => {
                tracing::warn!(order_uid = %order_uid, "Duplicate order missing from store on read-back");
            }
            Err(e) => {
                tracing::warn!(order_uid = %order_uid, error = %e, "Could not read back stored order for cache");
            }
        }
    }
}

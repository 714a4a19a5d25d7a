use std::sync::Arc;

use crate::cache::OrderCache;
use crate::metrics::Metrics;
use crate::models::Order;
use crate::store::{OrderStore, StoreError};

// ============================================================================
// Order Query Service
// ============================================================================
//
// Read path: cache first, then the store. A store hit repopulates the cache,
// so after a restart the cache refills lazily as orders are requested.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Missing order_uid parameter")]
    MissingId,

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Failed to load order: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct OrderQueryService {
    cache: OrderCache,
    store: Arc<dyn OrderStore>,
    metrics: Arc<Metrics>,
}

impl OrderQueryService {
    pub fn new(cache: OrderCache, store: Arc<dyn OrderStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            cache,
            store,
            metrics,
        }
    }

    pub async fn find(&self, order_uid: &str) -> Result<Order, QueryError> {
        if order_uid.is_empty() {
            return Err(QueryError::MissingId);
        }

        if let Some(order) = self.cache.get(order_uid).await {
            self.metrics.record_cache_lookup(true);
            return Ok(order);
        }
        self.metrics.record_cache_lookup(false);

        match self.store.get(order_uid).await? {
            Some(order) => {
                tracing::debug!(order_uid = %order_uid, "Cache miss served from store");
                self.cache.set(order_uid, order.clone()).await;
                Ok(order)
            }
            None => Err(QueryError::NotFound(order_uid.to_string())),
        }
    }

    pub fn cache(&self) -> &OrderCache {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }
}

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::Order;

// ============================================================================
// Order Cache
// ============================================================================
//
// In-memory mirror of the order store, shared by the consumer and the query
// handlers. Readers take the shared lock and never observe a half-written
// entry; writers are exclusive.
//
// Capacity:
// - Unbounded: entries live for the process lifetime.
// - Bounded: the least recently inserted entry is evicted once full. Reads
//   use `peek`, so they never need the write lock.
//
// ============================================================================

#[derive(Clone)]
pub struct OrderCache {
    entries: Arc<RwLock<LruCache<String, Order>>>,
}

impl OrderCache {
    pub fn unbounded() -> Self {
        Self::from_lru(LruCache::unbounded())
    }

    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self::from_lru(LruCache::new(capacity))
    }

    /// Build a cache from an optional capacity; `None` means unbounded.
    pub fn with_capacity(capacity: Option<NonZeroUsize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    fn from_lru(lru: LruCache<String, Order>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(lru)),
        }
    }

    pub async fn get(&self, order_uid: &str) -> Option<Order> {
        self.entries.read().await.peek(order_uid).cloned()
    }

    pub async fn set(&self, order_uid: impl Into<String>, order: Order) {
        let order_uid = order_uid.into();
        let evicted = self.entries.write().await.push(order_uid.clone(), order);

        if let Some((evicted_uid, _)) = evicted {
            if evicted_uid != order_uid {
                tracing::debug!(order_uid = %evicted_uid, "Evicted order from cache");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for OrderCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_order;

    #[tokio::test]
    async fn test_get_miss_then_hit() {
        let cache = OrderCache::unbounded();
        assert!(cache.get("X1").await.is_none());

        cache.set("X1", sample_order("X1")).await;

        assert_eq!(cache.get("X1").await, Some(sample_order("X1")));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_set_same_key_keeps_single_entry() {
        let cache = OrderCache::unbounded();
        cache.set("X1", sample_order("X1")).await;
        cache.set("X1", sample_order("X1")).await;

        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_bounded_cache_evicts_oldest_insert() {
        let cache = OrderCache::bounded(NonZeroUsize::new(2).unwrap());
        cache.set("A", sample_order("A")).await;
        cache.set("B", sample_order("B")).await;
        // Reads do not refresh recency.
        assert!(cache.get("A").await.is_some());
        cache.set("C", sample_order("C")).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("A").await.is_none());
        assert!(cache.get("B").await.is_some());
        assert!(cache.get("C").await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_lose_nothing() {
        let cache = OrderCache::unbounded();

        let handles: Vec<_> = (0..200)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let uid = format!("order-{}", i);
                    cache.set(uid.clone(), sample_order(&uid)).await;
                    cache.get(&uid).await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(cache.len().await, 200);
    }
}

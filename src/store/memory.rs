use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::{OrderStore, PutOutcome, StoreError};
use crate::models::Order;

/// In-memory store for tests. The map's entry API gives the same
/// insert-if-absent atomicity the database constraint provides.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
    failing_puts: AtomicU32,
    failing_gets: AtomicU32,
    put_calls: AtomicU32,
    get_calls: AtomicU32,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `put` fail with a transient error.
    pub fn fail_next_puts(&self, n: u32) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `get` fail with a transient error.
    pub fn fail_next_gets(&self, n: u32) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn put_calls(&self) -> u32 {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn put(&self, order: &Order) -> Result<PutOutcome, StoreError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_puts) {
            return Err(StoreError::Backend(sqlx::Error::PoolTimedOut));
        }

        match self.orders.lock().unwrap().entry(order.order_uid.clone()) {
            Entry::Occupied(_) => Ok(PutOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(PutOutcome::Inserted)
            }
        }
    }

    async fn get(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_gets) {
            return Err(StoreError::Backend(sqlx::Error::PoolTimedOut));
        }

        Ok(self.orders.lock().unwrap().get(order_uid).cloned())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

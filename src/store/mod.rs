// ============================================================================
// Order Store
// ============================================================================
//
// Durable, idempotent persistence keyed by `order_uid`. Uniqueness is owned
// by the storage layer: a duplicate `put` resolves to `AlreadyExists` inside
// the backend's own conflict handling, never through a prior existence check.
//
// ============================================================================

mod postgres;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::models::Order;
use crate::utils::IsTransient;

pub use postgres::PgOrderStore;

/// Outcome of a successful `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The order was written.
    Inserted,
    /// A record with this `order_uid` already exists; nothing was written.
    AlreadyExists,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("Database call exceeded deadline of {0:?}")]
    Timeout(Duration),
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout(_) => true,
            StoreError::Backend(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::Protocol(_) => true,
                // Class 08 connection exceptions, 40001 serialization failure,
                // 40P01 deadlock, 53xxx insufficient resources, 57P0x shutdown.
                sqlx::Error::Database(db) => db.code().is_some_and(|code| {
                    code.starts_with("08")
                        || code.starts_with("53")
                        || code.starts_with("57P0")
                        || code == "40001"
                        || code == "40P01"
                }),
                _ => false,
            },
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist an order unless a record with the same `order_uid` exists.
    async fn put(&self, order: &Order) -> Result<PutOutcome, StoreError>;

    /// Fetch an order by id. `Ok(None)` means no such order.
    async fn get(&self, order_uid: &str) -> Result<Option<Order>, StoreError>;

    /// Cheap round-trip used by the health endpoint.
    async fn health_check(&self) -> Result<(), StoreError>;
}

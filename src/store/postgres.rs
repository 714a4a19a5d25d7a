use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::future::Future;
use std::time::Duration;

use super::{OrderStore, PutOutcome, StoreError};
use crate::models::Order;

// ============================================================================
// PostgreSQL Order Store
// ============================================================================
//
// Table layout (see migrations/):
//   orders (order_uid TEXT PRIMARY KEY, "order" JSONB, created_at)
//
// `put` is a single `INSERT ... ON CONFLICT DO NOTHING`. Zero affected rows
// means another delivery (or a concurrent racer) already stored the order.
//
// ============================================================================

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgOrderStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect(url)
            .await?;

        Ok(Self::new(pool, timeout))
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn with_deadline<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn put(&self, order: &Order) -> Result<PutOutcome, StoreError> {
        let result = self
            .with_deadline(
                sqlx::query(
                    r#"INSERT INTO orders (order_uid, "order") VALUES ($1, $2)
                       ON CONFLICT (order_uid) DO NOTHING"#,
                )
                .bind(&order.order_uid)
                .bind(Json(order))
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                order_uid = %order.order_uid,
                "Order already stored, insert skipped"
            );
            Ok(PutOutcome::AlreadyExists)
        } else {
            tracing::debug!(order_uid = %order.order_uid, "Order inserted");
            Ok(PutOutcome::Inserted)
        }
    }

    async fn get(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        let row: Option<Json<Order>> = self
            .with_deadline(
                sqlx::query_scalar(r#"SELECT "order" FROM orders WHERE order_uid = $1"#)
                    .bind(order_uid)
                    .fetch_optional(&self.pool),
            )
            .await?;

        Ok(row.map(|Json(order)| order))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.with_deadline(sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map(|_| ())
    }
}

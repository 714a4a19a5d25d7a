use actix_web::{http::StatusCode, web, HttpResponse, Responder, ResponseError};
use serde::Deserialize;
use std::sync::Arc;

use crate::messaging::RedpandaProducer;
use crate::metrics::Metrics;
use crate::query::{OrderQueryService, QueryError};
use crate::store::OrderStore;

// ============================================================================
// HTTP API
// ============================================================================
//
// GET /order?order_uid=<id>   200 order JSON | 400 | 404 | 500
// GET /health                 200 | 503
// GET /metrics                Prometheus text format
//
// ============================================================================

pub struct AppState {
    pub orders: OrderQueryService,
    pub metrics: Arc<Metrics>,
    /// Dead-letter producer, reported by the health check when present.
    pub producer: Option<Arc<RedpandaProducer>>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/order", web::get().to(get_order))
        .route("/health", web::get().to(health_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

#[derive(Debug, Deserialize)]
pub struct OrderParams {
    order_uid: Option<String>,
}

async fn get_order(
    state: web::Data<AppState>,
    params: web::Query<OrderParams>,
) -> Result<HttpResponse, QueryError> {
    let order_uid = params.into_inner().order_uid.unwrap_or_default();
    let order = state.orders.find(&order_uid).await?;
    Ok(HttpResponse::Ok().json(order))
}

impl ResponseError for QueryError {
    fn status_code(&self) -> StatusCode {
        match self {
            QueryError::MissingId => StatusCode::BAD_REQUEST,
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            QueryError::Store(e) => tracing::error!(error = %e, "Order lookup failed"),
            QueryError::NotFound(uid) => tracing::debug!(order_uid = %uid, "Order not found"),
            QueryError::MissingId => tracing::debug!("Order lookup without order_uid"),
        }

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string()
        }))
    }
}

async fn health_handler(state: web::Data<AppState>) -> impl Responder {
    let cache_entries = state.orders.cache().len().await;
    let dead_letter_circuit = match &state.producer {
        Some(producer) => Some(producer.circuit_state().await.as_str()),
        None => None,
    };

    match state.orders.store().health_check().await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "healthy",
            "service": "order-ingest",
            "cache_entries": cache_entries,
            "dead_letter_circuit": dead_letter_circuit,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed: order store unreachable");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unhealthy",
                "service": "order-ingest",
                "error": e.to_string(),
            }))
        }
    }
}

async fn metrics_handler(state: web::Data<AppState>) -> impl Responder {
    match state.metrics.render() {
        Ok(buffer) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::OrderCache;
    use crate::ingest::OrderIngestor;
    use crate::models::fixtures::sample_order;
    use crate::models::Order;
    use crate::store::memory::InMemoryOrderStore;
    use crate::utils::RetryConfig;
    use actix_web::{test, App};

    fn state(store: Arc<InMemoryOrderStore>, cache: OrderCache) -> web::Data<AppState> {
        let metrics = Arc::new(Metrics::new().unwrap());
        web::Data::new(AppState {
            orders: OrderQueryService::new(cache, store, metrics.clone()),
            metrics,
            producer: None,
        })
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(App::new().app_data($state).configure(configure)).await
        };
    }

    #[actix_web::test]
    async fn test_ingested_order_is_served() {
        let store = Arc::new(InMemoryOrderStore::new());
        let cache = OrderCache::unbounded();
        let metrics = Arc::new(Metrics::new().unwrap());
        let ingestor = OrderIngestor::new(store.clone(), cache.clone(), RetryConfig::default(), metrics);
        let order = sample_order("X1");
        ingestor.ingest(&serde_json::to_vec(&order).unwrap()).await.unwrap();
        let app = app!(state(store, cache));

        let req = test::TestRequest::get().uri("/order?order_uid=X1").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: Order = test::read_body_json(resp).await;
        assert_eq!(body, order);
    }

    #[actix_web::test]
    async fn test_rejected_order_is_not_found() {
        let store = Arc::new(InMemoryOrderStore::new());
        let cache = OrderCache::unbounded();
        let metrics = Arc::new(Metrics::new().unwrap());
        let ingestor = OrderIngestor::new(store.clone(), cache.clone(), RetryConfig::default(), metrics);
        let payload = br#"{"order_uid":"X2","delivery":{"name":"","phone":"+1000","zip":"90210"}}"#;
        assert!(ingestor.ingest(payload).await.is_err());
        let app = app!(state(store, cache));

        let req = test::TestRequest::get().uri("/order?order_uid=X2").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_missing_parameter_is_bad_request() {
        let app = app!(state(Arc::new(InMemoryOrderStore::new()), OrderCache::unbounded()));

        for uri in ["/order", "/order?order_uid="] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "uri: {}", uri);
        }
    }

    #[actix_web::test]
    async fn test_store_fallback_after_restart() {
        let store = Arc::new(InMemoryOrderStore::new());
        store.put(&sample_order("X1")).await.unwrap();
        let cache = OrderCache::unbounded();
        let app = app!(state(store, cache.clone()));

        let req = test::TestRequest::get().uri("/order?order_uid=X1").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(cache.get("X1").await, Some(sample_order("X1")));
    }

    #[actix_web::test]
    async fn test_store_failure_is_server_error() {
        let store = Arc::new(InMemoryOrderStore::new());
        store.fail_next_gets(1);
        let app = app!(state(store, OrderCache::unbounded()));

        let req = test::TestRequest::get().uri("/order?order_uid=X1").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn test_health_and_metrics_endpoints() {
        let app = app!(state(Arc::new(InMemoryOrderStore::new()), OrderCache::unbounded()));

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["cache_entries"], 0);

        let req = test::TestRequest::get().uri("/order?order_uid=missing").to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body = test::call_and_read_body(&app, req).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("cache_lookups_total"));
    }
}

use actix::prelude::*;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_ingest::actors::{DlqActor, StopDlq};
use order_ingest::api::{self, AppState};
use order_ingest::cache::OrderCache;
use order_ingest::config::Settings;
use order_ingest::ingest::OrderIngestor;
use order_ingest::messaging::{DeliveryHandler, OrderConsumer, RedpandaProducer};
use order_ingest::metrics::Metrics;
use order_ingest::query::OrderQueryService;
use order_ingest::store::{OrderStore, PgOrderStore};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter, e.g. RUST_LOG=debug
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_ingest=debug")),
        )
        .init();

    let settings = Settings::parse();
    tracing::info!("🚀 Starting order ingestion service");

    // === 1. Order store ===
    tracing::info!("Connecting to PostgreSQL...");
    let pg_store = PgOrderStore::connect(
        &settings.database.url,
        settings.database.max_connections,
        settings.database.timeout(),
    )
    .await?;
    pg_store.run_migrations().await?;
    let store: Arc<dyn OrderStore> = Arc::new(pg_store.clone());

    // === 2. Metrics and cache ===
    let metrics = Arc::new(Metrics::new()?);
    let cache = OrderCache::with_capacity(settings.cache_capacity);
    match settings.cache_capacity {
        Some(capacity) => tracing::info!(capacity = capacity.get(), "Order cache bounded"),
        None => tracing::info!("Order cache unbounded"),
    }

    // === 3. Dead letter queue ===
    let producer = Arc::new(RedpandaProducer::new(
        &settings.kafka.brokers,
        &settings.kafka.client_id,
    )?);
    let dlq = DlqActor::new(producer.clone(), settings.kafka.dlq_topic.clone(), metrics.clone()).start();

    // === 4. Consumer ===
    let ingestor = Arc::new(OrderIngestor::new(
        store.clone(),
        cache.clone(),
        settings.retry(),
        metrics.clone(),
    ));
    let handler = DeliveryHandler::new(ingestor, dlq.clone(), metrics.clone());
    let consumer = OrderConsumer::new(&settings.kafka, handler, settings.redelivery(), metrics.clone())?;

    // === 5. HTTP query service ===
    let state = web::Data::new(AppState {
        orders: OrderQueryService::new(cache, store, metrics.clone()),
        metrics,
        producer: Some(producer),
    });

    tracing::info!(addr = %settings.http.listen_addr, "🌐 Starting HTTP server");
    let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(api::configure))
        .disable_signals()
        .shutdown_timeout(settings.shutdown_grace_secs)
        .bind(settings.http.listen_addr)?
        .run();
    let server_handle = server.handle();

    // === 6. Shutdown wiring ===
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    actix::spawn(async move {
        wait_for_signal().await;
        tracing::info!("🛑 Shutdown signal received, draining");
        let _ = shutdown_tx.send(true);
        server_handle.stop(true).await;
    });

    let grace = settings.shutdown_grace();
    let (server_result, ()) = tokio::join!(server, consumer.run(shutdown_rx));
    server_result?;

    // Consumer has drained; close connections.
    dlq.do_send(StopDlq);
    if tokio::time::timeout(grace, pg_store.close()).await.is_err() {
        tracing::warn!("Timed out waiting for database connections to close");
    }

    tracing::info!("👋 Order ingestion service stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM, waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

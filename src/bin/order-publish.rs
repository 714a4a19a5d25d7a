use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_ingest::messaging::{MessagePublisher, RedpandaProducer};
use order_ingest::models::Order;
use order_ingest::utils::{retry_with_backoff, RetryConfig};

/// Publish the contents of a JSON file to the orders topic, unchanged.
#[derive(Debug, Parser)]
#[command(name = "order-publish", version, about)]
struct PublishArgs {
    /// File whose bytes become the message payload.
    #[arg(long, short, default_value = "messages.json")]
    file: PathBuf,

    #[arg(long, env = "KAFKA_BROKERS", default_value = "127.0.0.1:9092")]
    brokers: String,

    #[arg(long, env = "ORDERS_PUBLISHER_CLIENT_ID", default_value = "client-id_1")]
    client_id: String,

    #[arg(long, env = "ORDERS_TOPIC", default_value = "orders_1")]
    topic: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = PublishArgs::parse();
    let payload = tokio::fs::read(&args.file).await?;

    // Key by order id when the file is an order so redeliveries share a
    // partition; anything else is published as-is for the consumer to reject.
    let key = match Order::from_payload(&payload) {
        Ok(order) if !order.order_uid.is_empty() => order.order_uid,
        _ => {
            tracing::warn!(file = %args.file.display(), "Payload is not a keyed order, publishing anyway");
            args.file.display().to_string()
        }
    };

    let producer = RedpandaProducer::new(&args.brokers, &args.client_id)?;
    retry_with_backoff(&RetryConfig::default(), |_attempt| {
        producer.publish(&args.topic, &key, &payload)
    })
    .await
    .into_result()?;

    tracing::info!(topic = %args.topic, key = %key, bytes = payload.len(), "Message sent successfully");
    Ok(())
}

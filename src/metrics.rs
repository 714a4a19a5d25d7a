use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

// ============================================================================
// Metrics
// ============================================================================
//
// Prometheus metrics for the ingestion and query paths, scraped via
// GET /metrics:
// - orders_ingested_total{outcome}  inserted | duplicate | rejected |
//                                   malformed | persistence_failed
// - order_ingest_duration_seconds
// - cache_lookups_total{result}     hit | miss
// - dlq_messages_total{reason}
// - retry_attempts_total{operation}
// - offset_commits_total{result}
//
// ============================================================================

pub struct Metrics {
    registry: Registry,
    pub orders_ingested: IntCounterVec,
    pub ingest_duration: Histogram,
    pub cache_lookups: IntCounterVec,
    pub dlq_messages: IntCounterVec,
    pub retry_attempts: IntCounterVec,
    pub offset_commits: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_ingested = IntCounterVec::new(
            Opts::new("orders_ingested_total", "Inbound order messages by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(orders_ingested.clone()))?;

        let ingest_duration = Histogram::with_opts(
            HistogramOpts::new(
                "order_ingest_duration_seconds",
                "Time from receipt to a final ingestion outcome",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(ingest_duration.clone()))?;

        let cache_lookups = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Order cache lookups by result"),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        let dlq_messages = IntCounterVec::new(
            Opts::new("dlq_messages_total", "Messages routed to the dead letter topic"),
            &["reason"],
        )?;
        registry.register(Box::new(dlq_messages.clone()))?;

        let retry_attempts = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Retries of failed backend operations"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_attempts.clone()))?;

        let offset_commits = IntCounterVec::new(
            Opts::new("offset_commits_total", "Consumer offset commits by result"),
            &["result"],
        )?;
        registry.register(Box::new(offset_commits.clone()))?;

        Ok(Self {
            registry,
            orders_ingested,
            ingest_duration,
            cache_lookups,
            dlq_messages,
            retry_attempts,
            offset_commits,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_ingest(&self, outcome: &str, duration_secs: f64) {
        self.orders_ingested.with_label_values(&[outcome]).inc();
        self.ingest_duration.observe(duration_secs);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    pub fn record_dlq_message(&self, reason: &str) {
        self.dlq_messages.with_label_values(&[reason]).inc();
    }

    pub fn record_retry_attempt(&self, operation: &str) {
        self.retry_attempts.with_label_values(&[operation]).inc();
    }

    pub fn record_offset_commit(&self, success: bool) {
        let result = if success { "ok" } else { "error" };
        self.offset_commits.with_label_values(&[result]).inc();
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> anyhow::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

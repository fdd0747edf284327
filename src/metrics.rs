use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all tracking engine metrics
const PREFIX: &str = "showtracker";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // List Metrics
    pub static ref LIST_MUTATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_list_mutations_total"), "Total list and ranking mutations"),
        &["operation", "outcome"]
    ).expect("Failed to create list_mutations_total metric");

    // Sync Metrics
    pub static ref REMOTE_RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_remote_retries_total"), "Retried record store calls"),
        &["operation"]
    ).expect("Failed to create remote_retries_total metric");

    pub static ref PENDING_SYNC_RECORDS: Gauge = Gauge::new(
        format!("{PREFIX}_pending_sync_records"),
        "Records waiting to be re-sent to the record store"
    ).expect("Failed to create pending_sync_records metric");

    // Completion Metrics
    pub static ref COMPLETIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_completions_total"), "Completion pipeline runs"),
        &["persisted"]
    ).expect("Failed to create completions_total metric");

    pub static ref STATS_RECOMPUTE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_stats_recompute_duration_seconds"),
            "Stats recomputation duration in seconds"
        )
        .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1])
    ).expect("Failed to create stats_recompute_duration_seconds metric");

    // Achievement Metrics
    pub static ref ACHIEVEMENTS_UNLOCKED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_achievements_unlocked_total"), "Achievements unlocked"),
        &["rarity"]
    ).expect("Failed to create achievements_unlocked_total metric");
}

/// Initialize and register all metrics with the global registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(LIST_MUTATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REMOTE_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PENDING_SYNC_RECORDS.clone()));
    let _ = REGISTRY.register(Box::new(COMPLETIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STATS_RECOMPUTE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(ACHIEVEMENTS_UNLOCKED_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record the outcome of a list or ranking mutation
pub fn record_mutation(operation: &str, outcome: &str) {
    LIST_MUTATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn record_completion(persisted: bool) {
    COMPLETIONS_TOTAL
        .with_label_values(&[if persisted { "true" } else { "false" }])
        .inc();
}

pub fn record_stats_recompute(duration: Duration) {
    STATS_RECOMPUTE_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_achievement_unlocked(rarity: &str) {
    ACHIEVEMENTS_UNLOCKED_TOTAL.with_label_values(&[rarity]).inc();
}

pub fn set_pending_sync_records(count: usize) {
    PENDING_SYNC_RECORDS.set(count as f64);
}

/// Renders every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8(buffer).unwrap_or_default(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            String::new()
        }
    }
}

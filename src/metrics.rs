// Prometheus metrics for the throttling gateway
//
// Exposed on the /metrics route:
// - Throttle decisions by plan, window and outcome (counter)
// - Requests rejected for missing organizer identity (counter)
// - Live counters held by the store (gauge)
// - Counters evicted by the sweeper (counter)
// - Abuse log writes by status (counter)
// - Counter store failures (counter)
// - Guard evaluation latency (histogram)

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, Histogram, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref THROTTLE_DECISIONS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("throttle_decisions_total", "Throttle decisions on organizer routes"),
        &["plan", "window", "decision"]
    ).expect("Failed to create throttle decisions metric");

    pub static ref UNAUTHENTICATED_REQUESTS_TOTAL: IntCounter = IntCounter::new(
        "throttle_unauthenticated_requests_total",
        "Requests rejected because no organizer identity was present"
    ).expect("Failed to create unauthenticated requests metric");

    pub static ref ACTIVE_COUNTERS: IntGauge = IntGauge::new(
        "throttle_active_counters",
        "Counters held by the store"
    ).expect("Failed to create active counters metric");

    pub static ref COUNTERS_EVICTED_TOTAL: IntCounter = IntCounter::new(
        "throttle_counters_evicted_total",
        "Expired counters removed by cleanup"
    ).expect("Failed to create evicted counters metric");

    pub static ref ABUSE_LOG_WRITES_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("abuse_log_writes_total", "Abuse log writes"),
        &["status"]
    ).expect("Failed to create abuse log writes metric");

    pub static ref STORE_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "throttle_store_errors_total",
        "Counter store operations that failed"
    ).expect("Failed to create store errors metric");

    pub static ref GUARD_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("throttle_guard_duration_seconds", "Time spent evaluating the throttle guard"),
    ).expect("Failed to create guard duration metric");
}

/// Initialize metrics registry - must be called once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(THROTTLE_DECISIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNAUTHENTICATED_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_COUNTERS.clone()))?;
    REGISTRY.register(Box::new(COUNTERS_EVICTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ABUSE_LOG_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GUARD_DURATION_SECONDS.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

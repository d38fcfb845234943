use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Proxied requests by operation and final status
pub static PROXY_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gateway_proxy_requests_total",
            "Proxied requests by operation and status",
        ),
        &["operation", "status"],
    )
    .unwrap()
});

// Upstream attempts, including retries
pub static UPSTREAM_ATTEMPTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gateway_upstream_attempts_total",
            "Upstream attempts by path and outcome",
        ),
        &["path", "outcome"],
    )
    .unwrap()
});

pub static UPSTREAM_RETRIES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gateway_upstream_retries_total",
        "Upstream attempts that were retries",
    )
    .unwrap()
});

pub static UPSTREAM_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "gateway_upstream_latency_seconds",
            "Upstream call latency across all attempts",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0]),
        &["path"],
    )
    .unwrap()
});

pub static AUTH_REJECTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_auth_rejections_total", "Rejected credentials by reason"),
        &["reason"],
    )
    .unwrap()
});

pub static RATE_LIMITED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gateway_rate_limited_total",
        "Requests denied by the admission limiter",
    )
    .unwrap()
});

/// Register all metrics with the registry
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(PROXY_REQUESTS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(UPSTREAM_ATTEMPTS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(UPSTREAM_RETRIES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(UPSTREAM_LATENCY.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(AUTH_REJECTIONS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(RATE_LIMITED_TOTAL.clone()))
        .unwrap();
}

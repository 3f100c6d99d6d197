use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Histogram, register_counter, register_counter_vec, register_histogram,
};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("gateway_requests_total", "Total number of proxy requests").unwrap();
    pub static ref REJECTED_TOTAL: CounterVec = register_counter_vec!(
        "gateway_rejected_total",
        "Requests answered with a gateway error, by reason",
        &["reason"]
    )
    .unwrap();
    pub static ref UPSTREAM_LATENCY: Histogram = register_histogram!(
        "gateway_upstream_latency_seconds",
        "Time until upstream response headers arrive"
    )
    .unwrap();
    pub static ref TRANSFORM_FAILURES: Counter = register_counter!(
        "gateway_transform_failures_total",
        "Model listings that could not be filtered"
    )
    .unwrap();
}

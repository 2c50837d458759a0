use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

pub static QUERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "docqa_queries_total",
        "Queries handled, by outcome",
        &["outcome"]
    )
    .expect("docqa_queries_total registers once")
});

pub static RETRIEVAL_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "docqa_retrieval_seconds",
        "Latency of embed, select, rerank and assemble for one query"
    )
    .expect("docqa_retrieval_seconds registers once")
});

pub static RERANK_FALLBACKS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "docqa_rerank_fallbacks_total",
        "Rerank failures answered with similarity order instead"
    )
    .expect("docqa_rerank_fallbacks_total registers once")
});

pub static STORE_CHUNKS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("docqa_store_chunks", "Chunks in the current store snapshot")
        .expect("docqa_store_chunks registers once")
});

/// Prometheus text exposition of the default registry.
pub fn render() -> (Vec<u8>, String) {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", err);
    }
    (buffer, encoder.format_type().to_string())
}

//! Retrieval pipeline: embed → cosine top-k → rerank → assemble, plus the
//! generation call that consumes the assembled context.

pub mod assembler;
pub mod embedder;
pub mod generator;
pub mod reranker;
pub mod retriever;
pub mod retry;
pub mod selector;

pub use embedder::{Embedder, OpenAiEmbedder};
pub use generator::{Generator, OpenAiGenerator};
pub use reranker::{CohereReranker, Reranker};
pub use retriever::{RerankFallback, RetrievalSettings, Retriever};
pub use retry::RetryPolicy;

/// Status line plus body of a failed upstream response.
async fn failure_detail(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    format!("{} returned: {}", status, body)
}

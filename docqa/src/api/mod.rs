use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use warp::{Filter, Rejection, Reply};

use crate::error::handle_rejection;
use crate::pipeline::{Generator, RetryPolicy, Retriever};
use crate::store::{StoreHandle, StoreSource};

mod query;
mod reload;

/// Everything a request handler needs; cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StoreHandle>,
    /// Where `/reload` reads from; `None` disables reloading.
    pub source: Option<StoreSource>,
    pub retriever: Arc<Retriever>,
    pub generator: Arc<dyn Generator>,
    pub retry: RetryPolicy,
    pub limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

/// Global token bucket; `None` when either knob is 0.
pub fn rate_limiter(per_minute: u32, burst: u32) -> Option<Arc<DefaultDirectRateLimiter>> {
    let per_minute = NonZeroU32::new(per_minute)?;
    let burst = NonZeroU32::new(burst)?;
    Some(Arc::new(RateLimiter::direct(
        Quota::per_minute(per_minute).allow_burst(burst),
    )))
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let api = warp::path("api").and(warp::path("v1"));

    let query_route = api
        .and(warp::path("query"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(64 * 1024))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(query::handle_query);

    let reload_route = api
        .and(warp::path("reload"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_state(state))
        .and_then(reload::handle_reload);

    query_route.or(reload_route).recover(handle_rejection)
}

fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use warp::http::StatusCode;

    use super::*;
    use crate::models::{QueryResponse, ReloadResponse};
    use crate::pipeline::embedder::Embedder;
    use crate::pipeline::{RerankFallback, RetrievalSettings};
    use crate::store::ChunkStore;
    use crate::testing::{
        capital_corpus, CannedGenerator, FailingEmbedder, OverlapReranker, VocabEmbedder,
    };

    fn state_with(embedder: Arc<dyn Embedder>, store: ChunkStore) -> AppState {
        AppState {
            store: Arc::new(StoreHandle::new(store)),
            source: None,
            retriever: Arc::new(Retriever::new(
                embedder,
                Arc::new(OverlapReranker::default()),
                RetrievalSettings {
                    top_k: 2,
                    top_n: 1,
                    fallback: RerankFallback::Fail,
                },
            )),
            generator: Arc::new(CannedGenerator("Paris.")),
            retry: RetryPolicy::none(),
            limiter: None,
        }
    }

    fn capitals() -> ChunkStore {
        capital_corpus(&[
            ("Paris is the capital of France.", "url1"),
            ("Berlin is the capital of Germany.", "url2"),
        ])
    }

    async fn post(state: AppState, path: &str, body: Value) -> (StatusCode, Value) {
        let filter = routes(state);
        let resp = warp::test::request()
            .method("POST")
            .path(path)
            .json(&body)
            .reply(&filter)
            .await;
        let body = serde_json::from_slice(resp.body()).unwrap_or(Value::Null);
        (resp.status(), body)
    }

    #[tokio::test]
    async fn query_returns_answer_with_aligned_sources() {
        let state = state_with(Arc::new(VocabEmbedder::default()), capitals());
        let (status, body) = post(
            state,
            "/api/v1/query",
            json!({"query": "What is the capital of France?"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let response: QueryResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.answer, "Paris.");
        assert!(!response.insufficient_information);
        assert_eq!(response.extracted_documents, "Paris is the capital of France.");
        assert_eq!(response.urls, vec!["url1"]);
        assert_eq!(response.cosine_scores.len(), 1);
    }

    #[tokio::test]
    async fn sentinel_answer_is_flagged() {
        let mut state = state_with(Arc::new(VocabEmbedder::default()), capitals());
        state.generator = Arc::new(CannedGenerator("I don't know."));
        let (status, body) = post(state, "/api/v1/query", json!({"query": "capital"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["insufficient_information"], json!(true));
    }

    #[tokio::test]
    async fn blank_query_is_a_bad_request() {
        let state = state_with(Arc::new(VocabEmbedder::default()), capitals());
        let (status, body) = post(state, "/api/v1/query", json!({"query": "  "})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], json!("query must not be empty"));
    }

    #[tokio::test]
    async fn missing_query_field_is_a_bad_request() {
        let state = state_with(Arc::new(VocabEmbedder::default()), capitals());
        let (status, body) = post(state, "/api/v1/query", json!({"question": "hi"})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn upstream_failure_carries_its_message_and_no_results() {
        let state = state_with(Arc::new(FailingEmbedder), capitals());
        let (status, body) = post(state, "/api/v1/query", json!({"query": "capital"})).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            body["detail"],
            json!("embedding service error: connection refused")
        );
        assert!(body.get("urls").is_none());
    }

    #[tokio::test]
    async fn empty_store_is_unavailable() {
        let state = state_with(Arc::new(VocabEmbedder::default()), ChunkStore::default());
        let (status, _) = post(state, "/api/v1/query", json!({"query": "capital"})).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn exhausted_rate_limit_rejects() {
        let mut state = state_with(Arc::new(VocabEmbedder::default()), capitals());
        state.limiter = rate_limiter(1, 1);
        let (first, _) = post(state.clone(), "/api/v1/query", json!({"query": "capital"})).await;
        let (second, _) = post(state, "/api/v1/query", json!({"query": "capital"})).await;

        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn reload_swaps_in_the_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let chunks_path = dir.path().join("rows.jsonl");
        let embeddings_path = dir.path().join("vectors.json");
        std::fs::write(
            &chunks_path,
            "{\"text\": \"a\", \"url\": \"u1\"}\n{\"text\": \"b\", \"url\": \"u2\"}\n{\"text\": \"c\", \"url\": \"u3\"}\n",
        )
        .unwrap();
        std::fs::write(&embeddings_path, "[[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]").unwrap();

        let mut state = state_with(Arc::new(VocabEmbedder::default()), capitals());
        state.source = Some(StoreSource::new(&chunks_path, &embeddings_path));
        let handle = state.store.clone();

        let (status, body) = post(state, "/api/v1/reload", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let reloaded: ReloadResponse = serde_json::from_value(body).unwrap();
        assert_eq!(reloaded.chunks, 3);
        assert_eq!(reloaded.dimension, 2);
        assert_eq!(handle.snapshot().len(), 3);
    }

    #[tokio::test]
    async fn failed_reload_keeps_the_current_store() {
        let dir = tempfile::tempdir().unwrap();
        let chunks_path = dir.path().join("rows.jsonl");
        let embeddings_path = dir.path().join("vectors.json");
        std::fs::write(&chunks_path, "{\"text\": \"a\", \"url\": \"u1\"}\n").unwrap();
        std::fs::write(&embeddings_path, "[[1.0], [0.5]]").unwrap();

        let mut state = state_with(Arc::new(VocabEmbedder::default()), capitals());
        state.source = Some(StoreSource::new(&chunks_path, &embeddings_path));
        let handle = state.store.clone();

        let (status, body) = post(state, "/api/v1/reload", json!({})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["detail"],
            json!("Store error: 1 chunk rows but 2 embedding vectors")
        );
        assert_eq!(handle.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn reload_without_source_is_a_bad_request() {
        let state = state_with(Arc::new(VocabEmbedder::default()), capitals());
        let (status, _) = post(state, "/api/v1/reload", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

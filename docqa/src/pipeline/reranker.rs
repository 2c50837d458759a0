//! Second-pass relevance ranking. The service sees only candidate texts; this
//! module maps its ranking back onto candidate positions so URLs and cosine
//! scores can be looked up by the same indices.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::failure_detail;
use crate::error::RetrievalError;

pub const DEFAULT_TOP_N: usize = 3;
pub const DEFAULT_RERANK_MODEL: &str = "rerank-english-v3.0";

/// One ranked document, `index` pointing into the submitted list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RerankHit {
    pub index: usize,
    pub relevance_score: f32,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Best-first ranking of at most `top_n` documents.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, RetrievalError>;
}

/// Reranks `candidate_texts` and returns up to `min(top_n, K)` positions into
/// it, best first. Makes no call when there is nothing to rank.
pub async fn rerank_candidates(
    reranker: &dyn Reranker,
    query: &str,
    candidate_texts: &[String],
    top_n: usize,
) -> Result<Vec<usize>, RetrievalError> {
    let k = candidate_texts.len();
    let n = top_n.min(k);
    if n == 0 {
        return Ok(Vec::new());
    }

    let hits = reranker.rerank(query, candidate_texts, n).await?;
    let mut seen = vec![false; k];
    let mut ranking = Vec::with_capacity(n);
    for hit in hits.into_iter().take(n) {
        if hit.index >= k {
            return Err(RetrievalError::RerankService(format!(
                "ranked index {} but only {} documents were sent",
                hit.index, k
            )));
        }
        if seen[hit.index] {
            return Err(RetrievalError::RerankService(format!(
                "ranked index {} more than once",
                hit.index
            )));
        }
        seen[hit.index] = true;
        ranking.push(hit.index);
    }
    debug!(?ranking, candidates = k, "Candidates reranked");
    Ok(ranking)
}

/// Client for Cohere-compatible `/rerank` endpoints.
pub struct CohereReranker {
    client: Client,
    endpoint: String,
    model: String,
}

impl CohereReranker {
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Cohere API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing rerank model name");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid Cohere API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build rerank HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/rerank", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Reranker for CohereReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, RetrievalError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| RetrievalError::RerankService(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(RetrievalError::RerankService(failure_detail(resp).await));
        }

        let parsed: RerankResponse = resp.json().await.map_err(|err| {
            RetrievalError::RerankService(format!("malformed rerank response: {err}"))
        })?;
        Ok(parsed.results)
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankHit>,
}

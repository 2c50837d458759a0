// Retriever: embed the query, cosine top-k over the store, rerank, assemble

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::assembler::assemble;
use super::embedder::Embedder;
use super::reranker::{rerank_candidates, Reranker, DEFAULT_TOP_N};
use super::selector::{CandidateSelector, DEFAULT_TOP_K};
use crate::error::RetrievalError;
use crate::metrics;
use crate::models::RetrievalResult;
use crate::store::ChunkStore;

/// What to do when the rerank service fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankFallback {
    /// Propagate the rerank error.
    #[default]
    Fail,
    /// Keep the first `top_n` candidates in cosine order.
    Similarity,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub top_n: usize,
    pub fallback: RerankFallback,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            top_n: DEFAULT_TOP_N,
            fallback: RerankFallback::Fail,
        }
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            embedder,
            reranker,
            settings,
        }
    }

    /// One retrieval pass against a store snapshot. No retries; every failure
    /// is returned as-is.
    #[instrument(skip_all, fields(chunks = store.len(), top_k = self.settings.top_k, top_n = self.settings.top_n))]
    pub async fn retrieve(
        &self,
        store: &ChunkStore,
        query: &str,
    ) -> Result<RetrievalResult, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }
        if store.is_empty() {
            return Err(RetrievalError::EmptyCorpus);
        }
        let _timer = metrics::RETRIEVAL_SECONDS.start_timer();

        let embedding = self.embedder.embed(query).await?;
        if embedding.len() != store.dimension() {
            return Err(RetrievalError::RetrievalService(format!(
                "embedding has dimension {}, store expects {}",
                embedding.len(),
                store.dimension()
            )));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(RetrievalError::RetrievalService(
                "embedding contains non-finite values".to_string(),
            ));
        }

        let candidates = store.find_top_k(&embedding, self.settings.top_k)?;
        let mut texts = Vec::with_capacity(candidates.len());
        let mut urls = Vec::with_capacity(candidates.len());
        let mut scores = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let chunk = store
                .get(candidate.index)
                .ok_or(RetrievalError::IndexOutOfRange {
                    index: candidate.index,
                    len: store.len(),
                })?;
            texts.push(chunk.text.clone());
            urls.push(chunk.url.clone());
            scores.push(candidate.score);
        }
        debug!(?urls, ?scores, "Candidates selected");

        let ranking =
            match rerank_candidates(self.reranker.as_ref(), query, &texts, self.settings.top_n)
                .await
            {
                Ok(ranking) => ranking,
                Err(err) if self.settings.fallback == RerankFallback::Similarity => {
                    warn!("Rerank failed, keeping similarity order: {}", err);
                    metrics::RERANK_FALLBACKS.inc();
                    (0..self.settings.top_n.min(texts.len())).collect()
                }
                Err(err) => return Err(err),
            };

        assemble(&ranking, &texts, &urls, &scores)
    }
}

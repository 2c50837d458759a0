use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of the chunk table. Columns other than these are ignored; empty
/// metadata cells read as `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkRecord {
    #[serde(alias = "split_texts")]
    pub text: String,
    pub url: String,
    #[serde(default)]
    pub chunk_type: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
}

/// A chunk paired with its precomputed embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    pub url: String,
    pub chunk_type: Option<String>,
    pub company_name: Option<String>,
    pub embedding: Vec<f32>,
}

/// A store position and its cosine similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
    pub index: usize,
    pub score: f32,
}

/// Reranked texts with their source URLs and cosine scores.
///
/// Entries are only ever appended as a (text, url, score) triple, so the
/// three sequences stay positionally aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    texts: Vec<String>,
    urls: Vec<String>,
    scores: Vec<f32>,
}

impl RetrievalResult {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            texts: Vec::with_capacity(capacity),
            urls: Vec::with_capacity(capacity),
            scores: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, text: &str, url: &str, score: f32) {
        self.texts.push(text.to_string());
        self.urls.push(url.to_string());
        self.scores.push(score);
    }

    /// Reranked chunk texts joined with a single space.
    pub fn concatenated_text(&self) -> String {
        self.texts.join(" ")
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

// API Request/Response models
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub request_id: Uuid,
    pub answer: String,
    pub insufficient_information: bool,
    pub extracted_documents: String,
    pub urls: Vec<String>,
    pub cosine_scores: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub chunks: usize,
    pub dimension: usize,
}

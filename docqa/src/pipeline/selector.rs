//! First-pass candidate generation: a dense cosine scan over every stored
//! embedding. No index structure; the corpus is small enough to scan.

use crate::error::RetrievalError;
use crate::models::{Chunk, ScoredCandidate};
use crate::store::ChunkStore;

pub const DEFAULT_TOP_K: usize = 5;

/// Anything that can rank stored chunks against a query vector.
pub trait CandidateSelector: Send + Sync {
    /// Up to `k` candidates, best first.
    fn find_top_k(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredCandidate>, RetrievalError>;
}

impl AsRef<[f32]> for Chunk {
    fn as_ref(&self) -> &[f32] {
        &self.embedding
    }
}

impl CandidateSelector for ChunkStore {
    fn find_top_k(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredCandidate>, RetrievalError> {
        let (indices, scores) = select_candidates(query_vector, self.chunks(), k)?;
        Ok(indices
            .into_iter()
            .zip(scores)
            .map(|(index, score)| ScoredCandidate { index, score })
            .collect())
    }
}

/// Indices of the `k` most similar embeddings and their cosine scores, in
/// the same descending order.
pub fn select_candidates<E: AsRef<[f32]>>(
    query_embedding: &[f32],
    chunk_embeddings: &[E],
    k: usize,
) -> Result<(Vec<usize>, Vec<f32>), RetrievalError> {
    if chunk_embeddings.is_empty() {
        return Err(RetrievalError::EmptyCorpus);
    }
    let mut scored: Vec<(usize, f32)> = chunk_embeddings
        .iter()
        .enumerate()
        .map(|(index, embedding)| {
            (index, cosine_similarity(query_embedding, embedding.as_ref()))
        })
        .collect();
    // stable: exact ties keep store order
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    Ok(scored.into_iter().unzip())
}

/// Cosine similarity clamped to [-1, 1]. Zero-norm or mismatched vectors
/// score 0.
///
/// Accumulates in f64: squares of finite f32 components cannot overflow it.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    let score = dot / denom;
    // also folds -0.0 into 0.0 so total_cmp sees them as a tie
    if denom == 0.0 || !score.is_finite() || score == 0.0 {
        return 0.0;
    }
    score.clamp(-1.0, 1.0) as f32
}

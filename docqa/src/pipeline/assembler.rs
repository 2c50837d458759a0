use crate::error::RetrievalError;
use crate::models::RetrievalResult;

/// Picks the reranked candidates, in ranking order, into one result.
///
/// Indices are checked against the shortest of the three candidate slices and
/// are never clamped.
pub fn assemble(
    reranked_indices: &[usize],
    candidate_texts: &[String],
    candidate_urls: &[String],
    candidate_scores: &[f32],
) -> Result<RetrievalResult, RetrievalError> {
    let len = candidate_texts
        .len()
        .min(candidate_urls.len())
        .min(candidate_scores.len());
    let mut result = RetrievalResult::with_capacity(reranked_indices.len());
    for &index in reranked_indices {
        if index >= len {
            return Err(RetrievalError::IndexOutOfRange { index, len });
        }
        result.push(
            &candidate_texts[index],
            &candidate_urls[index],
            candidate_scores[index],
        );
    }
    Ok(result)
}

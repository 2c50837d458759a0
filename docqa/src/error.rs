use thiserror::Error;
use warp::http::StatusCode;
use warp::{reject::Reject, Rejection, Reply};

use crate::store::StoreError;

/// Failures of a single retrieval pass. Upstream service errors carry the
/// provider's message so the serving layer can surface it verbatim.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("embedding service error: {0}")]
    RetrievalService(String),

    #[error("rerank service error: {0}")]
    RerankService(String),

    #[error("generation service error: {0}")]
    GenerationService(String),

    #[error("no chunks loaded")]
    EmptyCorpus,

    #[error("index {index} out of range for {len} candidates")]
    IndexOutOfRange { index: usize, len: usize },
}

impl RetrievalError {
    /// Upstream failures that a caller-side retry policy may reattempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RetrievalError::RetrievalService(_)
                | RetrievalError::RerankService(_)
                | RetrievalError::GenerationService(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Reject for ApiError {}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Retrieval(RetrievalError::EmptyQuery) | ApiError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "Bad request")
            }
            ApiError::Retrieval(RetrievalError::EmptyCorpus) => {
                (StatusCode::SERVICE_UNAVAILABLE, "No documents loaded")
            }
            ApiError::Retrieval(RetrievalError::IndexOutOfRange { .. })
            | ApiError::Store(_)
            | ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
            ApiError::Retrieval(_) => (StatusCode::BAD_GATEWAY, "Upstream service failed"),
            ApiError::RateLimitExceeded => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"),
        }
    }
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    let (code, message, detail) = if let Some(api_err) = err.find::<ApiError>() {
        let (code, message) = api_err.status();
        (code, message, api_err.to_string())
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "Bad request", body_err.to_string())
    } else {
        return Err(err);
    };

    let json = warp::reply::json(&serde_json::json!({
        "error": message,
        "detail": detail,
    }));

    Ok(warp::reply::with_status(json, code))
}

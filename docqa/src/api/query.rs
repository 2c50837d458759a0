use tracing::{error, info, warn};
use uuid::Uuid;
use warp::{reject, Rejection, Reply};

use super::AppState;
use crate::error::{ApiError, RetrievalError};
use crate::metrics;
use crate::models::{QueryRequest, QueryResponse};
use crate::pipeline::generator::is_insufficient;

pub async fn handle_query(request: QueryRequest, state: AppState) -> Result<impl Reply, Rejection> {
    let request_id = Uuid::new_v4();

    if let Some(limiter) = &state.limiter {
        if limiter.check().is_err() {
            warn!(%request_id, "Rate limit exceeded");
            metrics::QUERIES.with_label_values(&["rate_limited"]).inc();
            return Err(reject::custom(ApiError::RateLimitExceeded));
        }
    }

    info!(%request_id, "Processing query: {}", request.query);
    match answer(request_id, &request, &state).await {
        Ok(response) => {
            metrics::QUERIES.with_label_values(&["ok"]).inc();
            Ok(warp::reply::json(&response))
        }
        Err(err) => {
            error!(%request_id, "Query failed: {}", err);
            metrics::QUERIES.with_label_values(&["error"]).inc();
            Err(reject::custom(ApiError::from(err)))
        }
    }
}

async fn answer(
    request_id: Uuid,
    request: &QueryRequest,
    state: &AppState,
) -> Result<QueryResponse, RetrievalError> {
    let store = state.store.snapshot();
    let result = state
        .retry
        .run("retrieval", || state.retriever.retrieve(&store, &request.query))
        .await?;

    let context = result.concatenated_text();
    let answer = state
        .retry
        .run("generation", || state.generator.generate(&request.query, &context))
        .await?;
    info!(%request_id, sources = result.len(), "Query answered");

    Ok(QueryResponse {
        request_id,
        insufficient_information: is_insufficient(&answer),
        answer,
        extracted_documents: context,
        urls: result.urls().to_vec(),
        cosine_scores: result.scores().to_vec(),
    })
}

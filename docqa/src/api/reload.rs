use tracing::{error, info};
use warp::{reject, Rejection, Reply};

use super::AppState;
use crate::error::ApiError;
use crate::models::ReloadResponse;

/// Rebuilds the store from its source files and swaps it in. A failed load
/// leaves the current store serving.
pub async fn handle_reload(state: AppState) -> Result<impl Reply, Rejection> {
    let Some(source) = state.source.clone() else {
        return Err(reject::custom(ApiError::BadRequest(
            "no store source configured".to_string(),
        )));
    };

    info!("Reloading chunk store");
    let loaded = tokio::task::spawn_blocking(move || source.load())
        .await
        .map_err(|err| reject::custom(ApiError::Internal(format!("reload task failed: {err}"))))?;

    match loaded {
        Ok(store) => {
            let response = ReloadResponse {
                chunks: store.len(),
                dimension: store.dimension(),
            };
            let previous = state.store.replace(store);
            info!(
                previous = previous.len(),
                current = response.chunks,
                "Chunk store swapped"
            );
            Ok(warp::reply::json(&response))
        }
        Err(err) => {
            error!("Reload failed, keeping current store: {}", err);
            Err(reject::custom(ApiError::from(err)))
        }
    }
}

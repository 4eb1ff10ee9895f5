use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use super::{error::ApiError, AppState};
use crate::model::{SearchRequest, SearchResponse};

/// POST /search
pub async fn search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Json(mut request) = payload?;
    request.collection = Some(state.collection_or_default(request.collection.take()));
    let response = state.query.search(request, &state.default_collection).await?;
    Ok(Json(response))
}

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::{error::ApiError, AppState};
use crate::model::DocumentRequest;

/// POST /documents
pub async fn ingest(
    State(state): State<AppState>,
    payload: Result<Json<DocumentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let collection = state.collection_or_default(request.collection);
    let response = state
        .ingest
        .ingest_document(&collection, &request.title, &request.content, request.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

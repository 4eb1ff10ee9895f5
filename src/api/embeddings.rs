use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{error::ApiError, AppState};
use crate::model::{EmbeddingRecord, IngestRequest, IngestResponse};

#[derive(Debug, Default, Deserialize)]
pub struct CollectionParam {
    pub collection: Option<String>,
}

/// POST /embeddings
pub async fn ingest(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let collection = state.collection_or_default(request.collection);
    let ids = state.ingest.ingest(&collection, request.embeddings).await?;
    Ok((StatusCode::CREATED, Json(IngestResponse { collection, ids })))
}

/// GET /embeddings/:id?collection=
pub async fn get(
    Path(id): Path<String>,
    State(state): State<AppState>,
    params: Result<Query<CollectionParam>, QueryRejection>,
) -> Result<Json<EmbeddingRecord>, ApiError> {
    let Query(params) = params?;
    let collection = state.collection_or_default(params.collection);
    let record = state.store.get(&collection, &id).await?;
    Ok(Json(record))
}

/// DELETE /embeddings/:id?collection=
pub async fn delete(
    Path(id): Path<String>,
    State(state): State<AppState>,
    params: Result<Query<CollectionParam>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let collection = state.collection_or_default(params.collection);
    let deleted = state.store.delete(&collection, &id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

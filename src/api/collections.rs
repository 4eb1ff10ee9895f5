use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;

use super::{error::ApiError, AppState};
use crate::model::{Collection, NewCollection};

#[derive(Serialize)]
pub struct CollectionInfo {
    #[serde(flatten)]
    pub collection: Collection,
    pub count: usize,
}

/// POST /collections
pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<NewCollection>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(new) = payload?;
    let collection = state.store.create_collection(new).await?;
    Ok((StatusCode::CREATED, Json(collection)))
}

/// GET /collections
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let collections = state.store.list_collections().await?;
    Ok(Json(json!({ "collections": collections })))
}

/// GET /collections/:name
pub async fn get(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CollectionInfo>, ApiError> {
    let collection = state.store.collection(&name).await?;
    let count = state.store.count(&name).await?;
    Ok(Json(CollectionInfo { collection, count }))
}

/// DELETE /collections/:name
pub async fn remove(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let dropped = state.store.drop_collection(&name).await?;
    if dropped {
        tracing::info!(collection = %name, "dropped collection");
    }
    Ok(Json(json!({ "dropped": dropped })))
}

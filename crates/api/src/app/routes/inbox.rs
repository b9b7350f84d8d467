use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use hireflow_core::InboxId;
use hireflow_mail::InboxEntry;

use crate::app::dto;
use crate::app::errors::{ApiResponse, ApiResult};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list))
        .route("/threads/:thread_id", get(thread))
        .route("/:id", get(get_one).patch(set_read).delete(remove))
}

pub async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::InboxListQuery>,
) -> ApiResult<dto::InboxPage> {
    Ok(ApiResponse::ok(services.inbox_list(query).await?))
}

pub async fn thread(
    Extension(services): Extension<Arc<AppServices>>,
    Path(thread_id): Path<String>,
) -> ApiResult<dto::ThreadResponse> {
    let messages = services.inbox_thread(&thread_id).await?;
    Ok(ApiResponse::ok(dto::ThreadResponse { thread_id, messages }))
}

pub async fn get_one(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<InboxEntry> {
    let id: InboxId = dto::parse_id("inbox message", &id)?;
    Ok(ApiResponse::ok(services.inbox_get(id).await?))
}

pub async fn set_read(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetReadRequest>,
) -> ApiResult<InboxEntry> {
    let id: InboxId = dto::parse_id("inbox message", &id)?;
    Ok(ApiResponse::ok(services.inbox_set_read(id, body.is_read).await?))
}

pub async fn remove(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let id: InboxId = dto::parse_id("inbox message", &id)?;
    services.inbox_delete(id).await?;
    Ok(ApiResponse::ok(json!({ "id": id.to_string() })).with_message("message deleted"))
}

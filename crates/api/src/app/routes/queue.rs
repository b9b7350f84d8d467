use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};

use hireflow_core::OutboxId;
use hireflow_infra::TickReport;
use hireflow_mail::OutboxEntry;

use crate::app::dto::{self, Page};
use crate::app::errors::{ApiResponse, ApiResult};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(enqueue).get(list))
        .route("/stats", get(stats))
        .route("/process", post(process_now))
        .route("/:id", get(get_one))
        .route("/:id/retry", post(retry))
}

pub async fn enqueue(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::EnqueueRequest>,
) -> ApiResult<OutboxEntry> {
    let entry = services.enqueue(body).await?;
    Ok(ApiResponse::created(entry).with_message("email queued"))
}

pub async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::QueueListQuery>,
) -> ApiResult<Page<OutboxEntry>> {
    Ok(ApiResponse::ok(services.queue_list(query).await?.into()))
}

pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> ApiResult<dto::QueueStatsResponse> {
    Ok(ApiResponse::ok(services.queue_stats().await?))
}

pub async fn process_now(Extension(services): Extension<Arc<AppServices>>) -> ApiResult<TickReport> {
    let report = services.process_now().await?;
    Ok(ApiResponse::ok(report).with_message(format!(
        "processed {} email(s): {} sent, {} retried, {} failed",
        report.claimed, report.sent, report.retried, report.failed
    )))
}

pub async fn get_one(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<OutboxEntry> {
    let id: OutboxId = dto::parse_id("email", &id)?;
    Ok(ApiResponse::ok(services.queue_get(id).await?))
}

pub async fn retry(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<OutboxEntry> {
    let id: OutboxId = dto::parse_id("email", &id)?;
    let entry = services.queue_retry(id).await?;
    Ok(ApiResponse::ok(entry).with_message("email requeued"))
}

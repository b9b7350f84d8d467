use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use hireflow_core::TemplateId;
use hireflow_mail::{NewTemplate, Template, TemplatePatch};

use crate::app::dto::{self, Page, TemplateDetail};
use crate::app::errors::{ApiResponse, ApiResult};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create).get(list))
        .route("/:id", get(get_one).patch(update).delete(remove))
        .route("/:id/default", post(make_default))
        .route("/:id/preview", post(preview))
}

pub async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewTemplate>,
) -> ApiResult<TemplateDetail> {
    let template = services.template_create(body).await?;
    Ok(ApiResponse::created(template.into()))
}

pub async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::TemplateListQuery>,
) -> ApiResult<Page<Template>> {
    Ok(ApiResponse::ok(
        services.template_list(query.category.as_deref()).await?.into(),
    ))
}

pub async fn get_one(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<TemplateDetail> {
    let id: TemplateId = dto::parse_id("template", &id)?;
    Ok(ApiResponse::ok(services.template_get(id).await?.into()))
}

pub async fn update(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(patch): Json<TemplatePatch>,
) -> ApiResult<TemplateDetail> {
    let id: TemplateId = dto::parse_id("template", &id)?;
    Ok(ApiResponse::ok(services.template_update(id, patch).await?.into()))
}

pub async fn remove(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let id: TemplateId = dto::parse_id("template", &id)?;
    services.template_delete(id).await?;
    Ok(ApiResponse::ok(json!({ "id": id.to_string() })).with_message("template deleted"))
}

pub async fn make_default(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<TemplateDetail> {
    let id: TemplateId = dto::parse_id("template", &id)?;
    Ok(ApiResponse::ok(services.template_set_default(id).await?.into()))
}

pub async fn preview(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Option<Json<dto::PreviewRequest>>,
) -> ApiResult<dto::TemplatePreview> {
    let id: TemplateId = dto::parse_id("template", &id)?;
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let (id, rendered) = services.template_preview(id, req).await?;
    Ok(ApiResponse::ok(dto::TemplatePreview {
        template_id: id.to_string(),
        subject: rendered.subject,
        html_body: rendered.html_body,
        text_body: rendered.text_body,
        unresolved: rendered.unresolved,
    }))
}

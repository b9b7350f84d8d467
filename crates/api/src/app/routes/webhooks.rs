use std::sync::Arc;

use axum::{
    body::{self, Body, Bytes},
    extract::{Extension, FromRequest, Multipart, Request},
    http::{header::CONTENT_TYPE, request::Parts, HeaderMap},
    routing::post,
    Form, Router,
};
use tracing::warn;

use hireflow_infra::webhook::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use hireflow_mail::InboundPayload;

use crate::app::dto::InboundAccepted;
use crate::app::errors::{ApiError, ApiResponse, ApiResult};
use crate::app::services::AppServices;
use crate::app::MAX_BODY_BYTES;

pub fn router() -> Router {
    Router::new().route("/inbound-email", post(inbound_email))
}

/// Provider-parsed inbound email (multipart form, urlencoded form or JSON).
///
/// The body is buffered once for the signature check, then handed back to
/// the form extractors with the original request parts so the router's
/// body limit still applies to them.
pub async fn inbound_email(
    Extension(services): Extension<Arc<AppServices>>,
    req: Request,
) -> ApiResult<InboundAccepted> {
    let (parts, body) = req.into_parts();
    let body = body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))?;

    services
        .verifier
        .verify(
            &body,
            header(&parts.headers, TIMESTAMP_HEADER),
            header(&parts.headers, SIGNATURE_HEADER),
            services.clock.now(),
        )
        .inspect_err(|e| warn!(error = %e, "inbound webhook signature rejected"))?;

    let payload = parse_payload(parts, body).await?;
    let entry = services.receive(&payload).await?;

    Ok(ApiResponse::ok(InboundAccepted {
        id: entry.id.to_string(),
        client_id: entry.client_id.to_string(),
        thread_id: entry.thread_id.to_string(),
    })
    .with_message("email received"))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn rebuild(parts: Parts, body: Bytes) -> Request {
    Request::from_parts(parts, Body::from(body))
}

async fn parse_payload(parts: Parts, body: Bytes) -> Result<InboundPayload, ApiError> {
    let mime = header(&parts.headers, CONTENT_TYPE.as_str())
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "multipart/form-data" => {
            let mut multipart = Multipart::from_request(rebuild(parts, body), &())
                .await
                .map_err(|e| ApiError::Validation(format!("invalid multipart body: {e}")))?;

            let mut payload = InboundPayload::default();
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| ApiError::Validation(format!("invalid multipart field: {e}")))?
            {
                // Attachments are not stored.
                if field.file_name().is_some() {
                    continue;
                }
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("invalid field {name}: {e}")))?;
                payload.set_field(&name, value);
            }
            Ok(payload)
        }
        "application/x-www-form-urlencoded" => {
            let Form(payload) = Form::<InboundPayload>::from_request(rebuild(parts, body), &())
                .await
                .map_err(|e| ApiError::Validation(format!("invalid form body: {e}")))?;
            Ok(payload)
        }
        "application/json" => serde_json::from_slice(&body)
            .map_err(|e| ApiError::Validation(format!("invalid json body: {e}"))),
        other => Err(ApiError::Validation(format!(
            "unsupported content type {other:?}; expected multipart/form-data"
        ))),
    }
}

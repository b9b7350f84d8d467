//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store/transport/processor wiring and the handler operations
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: response envelope and error mapping

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Inbound provider posts may carry large HTML bodies.
pub(crate) const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Build the full HTTP router.
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
                .layer(Extension(services)),
        )
}

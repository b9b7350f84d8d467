use axum::Router;

pub mod inbox;
pub mod queue;
pub mod system;
pub mod templates;
pub mod webhooks;

/// Router for all `/emails` and `/webhooks` endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/webhooks", webhooks::router())
        .nest("/emails/queue", queue::router())
        .nest("/emails/inbox", inbox::router())
        .nest("/emails/templates", templates::router())
}

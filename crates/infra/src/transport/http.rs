//! Transactional email HTTP API transport.
//!
//! Sends `POST {endpoint}` with a JSON body and a bearer key:
//!
//! ```json
//! {"from": "...", "to": "...", "reply_to": null, "subject": "...", "html": "...", "text": "..."}
//! ```
//!
//! `2xx` is success, `408`/`429`/`5xx` and network errors are transient, any
//! other status is permanent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, warn};

use hireflow_mail::OutboxEntry;

use super::{DeliveryReceipt, EmailTransport, TransportError};

#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl HttpApiConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpApiTransport {
    client: reqwest::Client,
    config: HttpApiConfig,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: String,
    to: String,
    reply_to: Option<&'a str>,
    subject: &'a str,
    html: Option<&'a str>,
    text: Option<&'a str>,
}

impl HttpApiTransport {
    pub fn new(config: HttpApiConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Permanent(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }
}

/// Classify a non-success HTTP status.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> TransportError {
    let msg = format!("provider returned {}: {}", status.as_u16(), truncate(body, 300));
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        TransportError::Transient(msg)
    } else {
        TransportError::Permanent(msg)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn provider_id(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["id", "message_id", "messageId"]
        .iter()
        .find_map(|k| value.get(k).and_then(|v| v.as_str()).map(str::to_string))
}

#[async_trait]
impl EmailTransport for HttpApiTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, entry: &OutboxEntry) -> Result<DeliveryReceipt, TransportError> {
        let body = SendRequest {
            from: entry.from.to_string(),
            to: entry.to.to_string(),
            reply_to: entry.reply_to.as_ref().map(|r| r.as_str()),
            subject: &entry.subject,
            html: entry.html_body.as_deref(),
            text: entry.text_body.as_deref(),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    TransportError::Permanent(format!("invalid request: {e}"))
                } else {
                    TransportError::Transient(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            debug!(outbox_id = %entry.id, status = status.as_u16(), "provider accepted email");
            return Ok(DeliveryReceipt {
                provider_message_id: provider_id(&text),
            });
        }

        let err = classify_status(status, &text);
        warn!(outbox_id = %entry.id, status = status.as_u16(), error = %err, "provider rejected email");
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::Utc;
    use hireflow_core::OutboxId;
    use hireflow_mail::{Mailbox, NewOutboxEntry, RetryPolicy};

    #[derive(Clone, Default)]
    struct Captured {
        auth: Arc<Mutex<Option<String>>>,
        body: Arc<Mutex<Option<serde_json::Value>>>,
    }

    async fn spawn_provider(status: u16) -> (String, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route(
                "/send",
                post(
                    move |State(c): State<Captured>, headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                        *c.auth.lock().unwrap() = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        *c.body.lock().unwrap() = Some(body);
                        (
                            axum::http::StatusCode::from_u16(status).unwrap(),
                            r#"{"id":"prov-123"}"#,
                        )
                    },
                ),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/send"), captured)
    }

    fn entry() -> OutboxEntry {
        NewOutboxEntry::new(
            Mailbox::parse("Jane <jane@example.com>").unwrap(),
            Mailbox::parse("Careers <team@hireflow.test>").unwrap(),
            "Interview",
        )
        .with_html("<p>Hi</p>")
        .with_text("Hi")
        .into_entry(OutboxId::new(), &RetryPolicy::default(), Utc::now())
        .unwrap()
    }

    #[tokio::test]
    async fn posts_json_with_bearer_key() {
        let (url, captured) = spawn_provider(202).await;
        let transport = HttpApiTransport::new(HttpApiConfig::new(url, "secret-key")).unwrap();

        let receipt = transport.send(&entry()).await.unwrap();
        assert_eq!(receipt.provider_message_id.as_deref(), Some("prov-123"));

        assert_eq!(captured.auth.lock().unwrap().as_deref(), Some("Bearer secret-key"));
        let body = captured.body.lock().unwrap().clone().unwrap();
        assert_eq!(body["to"], "Jane <jane@example.com>");
        assert_eq!(body["from"], "Careers <team@hireflow.test>");
        assert_eq!(body["subject"], "Interview");
        assert_eq!(body["text"], "Hi");
    }

    #[tokio::test]
    async fn server_errors_are_transient_client_errors_permanent() {
        let (url, _) = spawn_provider(503).await;
        let transport = HttpApiTransport::new(HttpApiConfig::new(url, "k")).unwrap();
        assert!(transport.send(&entry()).await.unwrap_err().is_transient());

        let (url, _) = spawn_provider(422).await;
        let transport = HttpApiTransport::new(HttpApiConfig::new(url, "k")).unwrap();
        assert!(!transport.send(&entry()).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn connection_failure_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            HttpApiTransport::new(HttpApiConfig::new(format!("http://{addr}/send"), "k")).unwrap();
        assert!(transport.send(&entry()).await.unwrap_err().is_transient());
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "").is_transient());
    }
}

//! Service wiring and the operations behind the HTTP handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hireflow_core::{ClientId, EmailAddress, InboxId, OutboxId, TemplateId};
use hireflow_infra::config::{AppConfig, TransportConfig};
use hireflow_infra::store::postgres::{
    self, PostgresClientDirectory, PostgresInboxStore, PostgresOutboxStore, PostgresTemplateStore,
};
use hireflow_infra::store::{
    ClientDirectory, InMemoryClientDirectory, InMemoryInboxStore, InMemoryOutboxStore,
    InMemoryTemplateStore, InboxFilter, InboxStore, OutboxFilter, OutboxStore, TemplateStore,
};
use hireflow_infra::transport::{HttpApiTransport, LogTransport};
use hireflow_infra::{
    Clock, EmailTransport, InboundService, OutboxProcessor, ProcessorConfig, ProcessorControl,
    ProcessorHandle, SystemClock, TickReport, WebhookVerifier,
};
use hireflow_mail::{
    variables_from_json, InboundPayload, InboxEntry, Mailbox, MissingVariable, NewOutboxEntry,
    NewTemplate, OutboxEntry, OutboxStatus, Priority, RenderedTemplate, RetryPolicy, Template,
    TemplatePatch, ThreadId, Variables,
};

use crate::app::dto::{self, EnqueueRequest};
use crate::app::errors::ApiError;

type DynOutbox = Arc<dyn OutboxStore>;
type DynInbox = Arc<dyn InboxStore>;
type DynTemplates = Arc<dyn TemplateStore>;
type DynClients = Arc<dyn ClientDirectory>;
type DynTransport = Arc<dyn EmailTransport>;

/// Stores and collaborators shared by every handler.
pub struct AppServices {
    pub outbox: DynOutbox,
    pub inbox: DynInbox,
    pub templates: DynTemplates,
    pub clients: DynClients,
    pub verifier: WebhookVerifier,
    pub clock: Arc<dyn Clock>,
    inbound: InboundService<DynInbox, DynClients>,
    processor: ProcessorControl,
    retry_policy: RetryPolicy,
    default_from: Mailbox,
}

/// Services plus the background processor they drive.
pub struct Runtime {
    pub services: Arc<AppServices>,
    pub processor: ProcessorHandle,
}

/// Store and transport choices for [`Runtime::start`].
pub struct Backends {
    pub outbox: DynOutbox,
    pub inbox: DynInbox,
    pub templates: DynTemplates,
    pub clients: DynClients,
    pub transport: DynTransport,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// In-memory stores with the given transport.
    pub fn in_memory(transport: DynTransport, clock: Arc<dyn Clock>) -> Self {
        Self {
            outbox: InMemoryOutboxStore::arc(),
            inbox: InMemoryInboxStore::arc(),
            templates: InMemoryTemplateStore::arc(),
            clients: InMemoryClientDirectory::arc(),
            transport,
            clock,
        }
    }

    /// Stores and transport as configured.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let transport = build_transport(&config.transport)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let Some(db) = &config.database else {
            warn!("DATABASE_URL not set; using in-memory stores");
            return Ok(Self::in_memory(transport, clock));
        };

        let pool = postgres::connect(&db.url, db.max_connections).await?;
        Ok(Self {
            outbox: Arc::new(PostgresOutboxStore::new(pool.clone())),
            inbox: Arc::new(PostgresInboxStore::new(pool.clone())),
            templates: Arc::new(PostgresTemplateStore::new(pool.clone())),
            clients: Arc::new(PostgresClientDirectory::new(pool)),
            transport,
            clock,
        })
    }
}

fn build_transport(config: &TransportConfig) -> anyhow::Result<DynTransport> {
    let transport: DynTransport = match config {
        TransportConfig::Log => Arc::new(LogTransport),
        TransportConfig::Http(http) => Arc::new(HttpApiTransport::new(http.clone())?),
        #[cfg(feature = "smtp")]
        TransportConfig::Smtp(smtp) => Arc::new(hireflow_infra::transport::SmtpTransport::new(smtp)?),
        #[cfg(not(feature = "smtp"))]
        TransportConfig::Smtp(_) => {
            anyhow::bail!("EMAIL_TRANSPORT=smtp requires the `smtp` feature")
        }
    };
    info!(transport = transport.name(), "email transport ready");
    Ok(transport)
}

/// Settings the services need beyond their backends.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub inbound_domain: String,
    pub webhook_secret: Option<String>,
    pub default_from: Mailbox,
    pub processor: ProcessorConfig,
}

impl ServiceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            inbound_domain: config.inbound_domain.clone(),
            webhook_secret: config.webhook_secret.clone(),
            default_from: config.default_from.clone(),
            processor: config.processor_config(),
        }
    }
}

impl Runtime {
    /// Spawn the processor and assemble the services.
    pub fn start(backends: Backends, settings: ServiceSettings, cancel: CancellationToken) -> Self {
        let Backends {
            outbox,
            inbox,
            templates,
            clients,
            transport,
            clock,
        } = backends;

        let verifier = WebhookVerifier::new(settings.webhook_secret);
        if !verifier.is_enabled() {
            warn!("INBOUND_WEBHOOK_SECRET not set; inbound webhooks are accepted unsigned");
        }

        let retry_policy = settings.processor.retry_policy.clone();
        let processor = OutboxProcessor::new(outbox.clone(), transport, clock.clone(), settings.processor)
            .spawn(cancel);

        let services = AppServices {
            inbound: InboundService::new(
                inbox.clone(),
                clients.clone(),
                clock.clone(),
                settings.inbound_domain,
            ),
            outbox,
            inbox,
            templates,
            clients,
            verifier,
            clock,
            processor: processor.control(),
            retry_policy,
            default_from: settings.default_from,
        };

        Self {
            services: Arc::new(services),
            processor,
        }
    }
}

fn invalid(field: &str, err: impl std::fmt::Display) -> ApiError {
    ApiError::Validation(format!("{field}: {err}"))
}

impl AppServices {
    // -------------------------
    // Outbox
    // -------------------------

    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<OutboxEntry, ApiError> {
        let to = Mailbox::new(
            EmailAddress::parse(&req.to).map_err(|e| invalid("to", e))?,
            req.to_name.clone(),
        );
        let from = match &req.from {
            Some(raw) => Mailbox::new(
                EmailAddress::parse(raw).map_err(|e| invalid("from", e))?,
                req.from_name.clone(),
            ),
            None => {
                let mut from = self.default_from.clone();
                if req.from_name.is_some() {
                    from.name = req.from_name.clone();
                }
                from
            }
        };

        let (template_id, rendered) = if req.uses_template() {
            let template = self.resolve_template(&req).await?;
            let vars = parse_variables(req.variables.as_ref())?;
            let rendered = template.render(&vars, MissingVariable::Keep);
            if !rendered.unresolved.is_empty() {
                warn!(
                    template = %template.name,
                    unresolved = ?rendered.unresolved,
                    "template rendered with unresolved placeholders"
                );
            }
            (Some(template.id), Some(rendered))
        } else {
            (None, None)
        };

        let (subject, html, text) = merge_content(&req, rendered)?;

        let mut new = NewOutboxEntry::new(to, from, subject);
        if let Some(html) = html {
            new = new.with_html(html);
        }
        if let Some(text) = text {
            new = new.with_text(text);
        }
        if let Some(priority) = &req.priority {
            new = new.with_priority(Priority::parse(priority)?);
        }
        if let Some(at) = req.scheduled_at {
            new = new.scheduled_at(at);
        }
        if let Some(max) = req.max_retries {
            new = new.with_max_retries(max);
        }
        if let Some(client) = req.client_id {
            new = new.for_client(ClientId::from_uuid(client));
        }
        if let Some(template_id) = template_id {
            new = new.from_template(template_id);
        }
        if let Some(reply_to) = &req.reply_to {
            new.reply_to = Some(EmailAddress::parse(reply_to).map_err(|e| invalid("reply_to", e))?);
        }

        let entry = new.into_entry(OutboxId::new(), &self.retry_policy, self.clock.now())?;
        let stored = self.outbox.enqueue(entry).await?;
        info!(
            outbox_id = %stored.id,
            to = %stored.to.address,
            priority = ?stored.priority,
            scheduled_at = %stored.scheduled_at,
            "email queued"
        );
        Ok(stored)
    }

    async fn resolve_template(&self, req: &EnqueueRequest) -> Result<Template, ApiError> {
        let template = match (&req.template, &req.category) {
            (Some(key), _) => match key.parse::<TemplateId>() {
                Ok(id) => self.templates.get(id).await?,
                Err(_) => self.templates.find_by_name(key).await?,
            }
            .ok_or_else(|| ApiError::not_found("template", key))?,
            (None, Some(category)) => self
                .templates
                .default_for(&category.trim().to_lowercase())
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("no default template for category {category}")))?,
            (None, None) => return Err(ApiError::Validation("template or category is required".into())),
        };

        if !template.is_active {
            return Err(ApiError::Conflict(format!("template {} is inactive", template.name)));
        }
        Ok(template)
    }

    pub async fn queue_list(&self, query: dto::QueueListQuery) -> Result<Vec<OutboxEntry>, ApiError> {
        let status = query
            .status
            .as_deref()
            .map(OutboxStatus::parse)
            .transpose()?;
        Ok(self
            .outbox
            .list(&OutboxFilter {
                status,
                limit: query.limit,
                offset: query.offset,
            })
            .await?)
    }

    pub async fn queue_get(&self, id: OutboxId) -> Result<OutboxEntry, ApiError> {
        self.outbox
            .get(id)
            .await?
            .ok_or_else(|| ApiError::not_found("email", id))
    }

    pub async fn queue_stats(&self) -> Result<dto::QueueStatsResponse, ApiError> {
        let counts = self.outbox.stats(self.clock.now()).await?;
        Ok(dto::QueueStatsResponse {
            total: counts.total(),
            counts,
            processor: self.processor.stats(),
        })
    }

    pub async fn queue_retry(&self, id: OutboxId) -> Result<OutboxEntry, ApiError> {
        let entry = self.outbox.requeue_failed(id, self.clock.now()).await?;
        info!(outbox_id = %entry.id, "failed email requeued");
        Ok(entry)
    }

    pub async fn process_now(&self) -> Result<TickReport, ApiError> {
        Ok(self.processor.trigger().await?)
    }

    // -------------------------
    // Inbox
    // -------------------------

    pub async fn receive(&self, payload: &InboundPayload) -> Result<InboxEntry, ApiError> {
        Ok(self.inbound.accept(payload).await?)
    }

    pub async fn inbox_list(&self, query: dto::InboxListQuery) -> Result<dto::InboxPage, ApiError> {
        let client_id = query.client_id.map(ClientId::from_uuid);
        let entries = self
            .inbox
            .list(&InboxFilter {
                client_id,
                unread_only: query.unread,
                limit: query.limit,
                offset: query.offset,
            })
            .await?;
        let unread = self.inbox.unread_count(client_id).await?;

        let items: Vec<dto::InboxSummary> = entries.iter().map(dto::InboxSummary::from).collect();
        Ok(dto::InboxPage {
            count: items.len(),
            items,
            unread,
        })
    }

    pub async fn inbox_get(&self, id: InboxId) -> Result<InboxEntry, ApiError> {
        self.inbox
            .get(id)
            .await?
            .ok_or_else(|| ApiError::not_found("inbox message", id))
    }

    pub async fn inbox_set_read(&self, id: InboxId, read: bool) -> Result<InboxEntry, ApiError> {
        Ok(self.inbox.set_read(id, read).await?)
    }

    pub async fn inbox_delete(&self, id: InboxId) -> Result<(), ApiError> {
        self.inbox.delete(id).await?;
        info!(inbox_id = %id, "inbox message deleted");
        Ok(())
    }

    pub async fn inbox_thread(&self, thread_id: &str) -> Result<Vec<InboxEntry>, ApiError> {
        let messages = self.inbox.thread(&ThreadId::from_raw(thread_id)).await?;
        if messages.is_empty() {
            return Err(ApiError::not_found("thread", thread_id));
        }
        Ok(messages)
    }

    // -------------------------
    // Templates
    // -------------------------

    pub async fn template_create(&self, new: NewTemplate) -> Result<Template, ApiError> {
        let template = new.into_template(TemplateId::new(), self.clock.now())?;
        let stored = self.templates.create(template).await?;
        info!(template_id = %stored.id, name = %stored.name, category = %stored.category, "template created");
        Ok(stored)
    }

    pub async fn template_list(&self, category: Option<&str>) -> Result<Vec<Template>, ApiError> {
        let category = category.map(|c| c.trim().to_lowercase());
        Ok(self.templates.list(category.as_deref()).await?)
    }

    pub async fn template_get(&self, id: TemplateId) -> Result<Template, ApiError> {
        self.templates
            .get(id)
            .await?
            .ok_or_else(|| ApiError::not_found("template", id))
    }

    pub async fn template_update(&self, id: TemplateId, patch: TemplatePatch) -> Result<Template, ApiError> {
        let mut template = self.template_get(id).await?;
        template.apply(patch, self.clock.now())?;
        Ok(self.templates.update(template).await?)
    }

    pub async fn template_delete(&self, id: TemplateId) -> Result<(), ApiError> {
        self.templates.delete(id).await?;
        info!(template_id = %id, "template deleted");
        Ok(())
    }

    pub async fn template_set_default(&self, id: TemplateId) -> Result<Template, ApiError> {
        let template = self.templates.set_default(id, self.clock.now()).await?;
        info!(template_id = %id, category = %template.category, "default template changed");
        Ok(template)
    }

    pub async fn template_preview(
        &self,
        id: TemplateId,
        req: dto::PreviewRequest,
    ) -> Result<(TemplateId, RenderedTemplate), ApiError> {
        let template = self.template_get(id).await?;
        let vars = parse_variables(req.variables.as_ref())?;
        Ok((template.id, template.render(&vars, req.missing)))
    }
}

fn parse_variables(value: Option<&serde_json::Value>) -> Result<Variables, ApiError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(Variables::new()),
        Some(v) => Ok(variables_from_json(v)?),
    }
}

/// Literal request fields win over rendered template parts.
fn merge_content(
    req: &EnqueueRequest,
    rendered: Option<RenderedTemplate>,
) -> Result<(String, Option<String>, Option<String>), ApiError> {
    let (r_subject, r_html, r_text) = match rendered {
        Some(r) => (Some(r.subject), Some(r.html_body), r.text_body),
        None => (None, None, None),
    };

    let subject = req
        .subject
        .clone()
        .or(r_subject)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("subject is required".into()))?;
    let html = req.html.clone().or(r_html).filter(|h| !h.is_empty());
    let text = req.text.clone().or(r_text).filter(|t| !t.is_empty());

    if html.is_none() && text.is_none() {
        return Err(ApiError::Validation("html or text body is required".into()));
    }
    Ok((subject, html, text))
}

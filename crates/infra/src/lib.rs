//! Infrastructure layer: stores, transports, the queue processor, the inbound
//! webhook pipeline and configuration.

pub mod clock;
pub mod config;
pub mod processor;
pub mod store;
pub mod transport;
pub mod webhook;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError, SmtpConfig, TransportConfig};
pub use processor::{
    OutboxProcessor, ProcessorConfig, ProcessorControl, ProcessorError, ProcessorHandle,
    ProcessorStats, TickReport,
};
pub use store::StoreError;
pub use transport::{DeliveryReceipt, EmailTransport, LogTransport, TransportError};
pub use webhook::{InboundService, WebhookError, WebhookVerifier};

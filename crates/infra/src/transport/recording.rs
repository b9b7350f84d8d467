use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use hireflow_core::OutboxId;
use hireflow_mail::OutboxEntry;

use super::{DeliveryReceipt, EmailTransport, TransportError};

/// A message accepted by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub outbox_id: OutboxId,
    pub to: String,
    pub subject: String,
}

/// In-memory transport for tests and local runs.
///
/// Outcomes can be scripted: queued errors are returned one per send, and a
/// sticky error (set with [`RecordingTransport::fail_always`]) applies once
/// the queue is empty.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    scripted: Mutex<VecDeque<TransportError>>,
    sticky: Mutex<Option<TransportError>>,
    attempts: Mutex<u64>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next send with `err`.
    pub fn fail_next(&self, err: TransportError) {
        lock(&self.scripted).push_back(err);
    }

    /// Fail every send with `err` until [`RecordingTransport::recover`].
    pub fn fail_always(&self, err: TransportError) {
        *lock(&self.sticky) = Some(err);
    }

    pub fn recover(&self) {
        *lock(&self.sticky) = None;
        lock(&self.scripted).clear();
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    pub fn attempts(&self) -> u64 {
        *lock(&self.attempts)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, entry: &OutboxEntry) -> Result<DeliveryReceipt, TransportError> {
        *lock(&self.attempts) += 1;

        let scripted = lock(&self.scripted).pop_front();
        if let Some(err) = scripted.or_else(|| lock(&self.sticky).clone()) {
            return Err(err);
        }

        lock(&self.sent).push(SentMessage {
            outbox_id: entry.id,
            to: entry.to.address.to_string(),
            subject: entry.subject.clone(),
        });
        Ok(DeliveryReceipt {
            provider_message_id: Some(format!("rec-{}", entry.id)),
        })
    }
}

//! Outbound queue entries, retry policy and the delivery state machine.
//!
//! ```text
//! pending -> sending -> sent
//!                    -> pending (retry, rescheduled)
//!                    -> failed
//! failed  -> pending (explicit requeue)
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hireflow_core::{ClientId, DomainError, DomainResult, EmailAddress, OutboxId, TemplateId, WorkerId};

use crate::address::Mailbox;

/// Delivery priority. Lower rank is dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    pub fn rank(self) -> i16 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    pub fn from_rank(rank: i16) -> Self {
        match rank {
            i16::MIN..=0 => Priority::High,
            1 => Priority::Normal,
            _ => Priority::Low,
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "urgent" => Ok(Priority::High),
            "normal" | "" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(DomainError::validation(format!(
                "priority must be one of: high, normal, low (got {other})"
            ))),
        }
    }
}

/// Outbox row status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting for its `scheduled_at`.
    Pending,
    /// Claimed by a processor, send in flight.
    Sending,
    /// Delivered to the transport.
    Sent,
    /// Retries exhausted.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sending => "sending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OutboxStatus::Pending),
            "sending" => Ok(OutboxStatus::Sending),
            "sent" => Ok(OutboxStatus::Sent),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(DomainError::validation(format!(
                "status must be one of: pending, sending, sent, failed (got {other})"
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Sent | OutboxStatus::Failed)
    }
}

impl core::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bound for a row's retry budget.
pub const MAX_RETRIES_LIMIT: u32 = 100;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Fixed
    }
}

impl BackoffStrategy {
    pub fn parse(s: &str) -> DomainResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            "linear" => Ok(Self::Linear),
            other => Err(DomainError::validation(format!(
                "backoff strategy must be one of: fixed, linear, exponential (got {other})"
            ))),
        }
    }
}

/// Retry policy for failed deliveries.
///
/// The retry budget itself (`max_retries`) lives on each outbox row; the
/// policy only decides the reschedule delay and the default budget for new rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// `max_retries` given to rows that don't specify one
    pub default_max_retries: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Fail permanent transport errors without using the remaining budget
    pub fail_fast_on_permanent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            base_delay: Duration::from_secs(300),
            max_delay: Duration::from_secs(3600),
            strategy: BackoffStrategy::Fixed,
            fail_fast_on_permanent: false,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with fixed delays.
    pub fn fixed(default_max_retries: u32, delay: Duration) -> Self {
        Self {
            default_max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            fail_fast_on_permanent: false,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis().max(self.base_delay.as_millis()) as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1).min(30) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

/// Failure classification reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Might succeed later (timeouts, 5xx, rate limiting).
    Transient,
    /// Will not succeed as-is (rejected recipient, bad request).
    Permanent,
}

/// A failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub class: FailureClass,
    pub message: String,
}

impl DeliveryFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            message: message.into(),
        }
    }
}

impl core::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let class = match self.class {
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
        };
        write!(f, "{class}: {}", self.message)
    }
}

/// What happened to a row after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to `pending`, eligible again at `next_attempt_at`.
    Retry { next_attempt_at: DateTime<Utc> },
    /// Moved to `failed`.
    Failed,
}

/// Request to queue an email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOutboxEntry {
    pub to: Mailbox,
    pub from: Mailbox,
    #[serde(default)]
    pub reply_to: Option<EmailAddress>,
    pub subject: String,
    #[serde(default)]
    pub html_body: Option<String>,
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Not before; `None` means as soon as possible.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Overrides the policy default.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    #[serde(default)]
    pub client_id: Option<ClientId>,
}

impl NewOutboxEntry {
    pub fn new(to: Mailbox, from: Mailbox, subject: impl Into<String>) -> Self {
        Self {
            to,
            from,
            reply_to: None,
            subject: subject.into(),
            html_body: None,
            text_body: None,
            priority: Priority::Normal,
            scheduled_at: None,
            max_retries: None,
            template_id: None,
            client_id: None,
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html_body = Some(html.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_body = Some(text.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn for_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn from_template(mut self, template_id: TemplateId) -> Self {
        self.template_id = Some(template_id);
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.subject.trim().is_empty() {
            return Err(DomainError::validation("subject must not be empty"));
        }
        let has_html = self.html_body.as_deref().is_some_and(|b| !b.trim().is_empty());
        let has_text = self.text_body.as_deref().is_some_and(|b| !b.trim().is_empty());
        if !has_html && !has_text {
            return Err(DomainError::validation("an html or text body is required"));
        }
        if self.max_retries.is_some_and(|max| max > MAX_RETRIES_LIMIT) {
            return Err(DomainError::validation(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}"
            )));
        }
        Ok(())
    }

    /// Materialize a `pending` row.
    pub fn into_entry(self, id: OutboxId, policy: &RetryPolicy, now: DateTime<Utc>) -> DomainResult<OutboxEntry> {
        self.validate()?;
        Ok(OutboxEntry {
            id,
            to: self.to,
            from: self.from,
            reply_to: self.reply_to,
            subject: self.subject,
            html_body: self.html_body,
            text_body: self.text_body,
            priority: self.priority,
            scheduled_at: self.scheduled_at.unwrap_or(now),
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(policy.default_max_retries),
            error_message: None,
            sent_at: None,
            claimed_by: None,
            claimed_at: None,
            template_id: self.template_id,
            client_id: self.client_id,
            created_at: now,
            updated_at: now,
        })
    }
}

/// A queued outbound email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxId,
    pub to: Mailbox,
    pub from: Mailbox,
    pub reply_to: Option<EmailAddress>,
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub priority: Priority,
    pub scheduled_at: DateTime<Utc>,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<WorkerId>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub template_id: Option<TemplateId>,
    pub client_id: Option<ClientId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Whether a poll at `now` may pick this row.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending && self.scheduled_at <= now
    }

    /// Dispatch order: priority, then scheduled time, then creation.
    pub fn dispatch_key(&self) -> (i16, DateTime<Utc>, DateTime<Utc>) {
        (self.priority.rank(), self.scheduled_at, self.created_at)
    }

    pub fn is_claimed_by(&self, worker: &WorkerId) -> bool {
        self.status == OutboxStatus::Sending && self.claimed_by.as_ref() == Some(worker)
    }

    /// `pending -> sending`.
    pub fn claim(&mut self, worker: &WorkerId, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_due(now) {
            return Err(DomainError::conflict(format!(
                "outbox {} is not claimable (status {}, scheduled {})",
                self.id, self.status, self.scheduled_at
            )));
        }
        self.status = OutboxStatus::Sending;
        self.claimed_by = Some(worker.clone());
        self.claimed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `sending -> sent`.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.require_sending("mark sent")?;
        self.status = OutboxStatus::Sent;
        self.sent_at = Some(now);
        self.error_message = None;
        self.updated_at = now;
        Ok(())
    }

    /// `sending -> pending | failed`.
    ///
    /// `retry_count` grows by one per failed attempt and is clamped to
    /// `max_retries` when the row fails.
    pub fn mark_failed(
        &mut self,
        failure: &DeliveryFailure,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> DomainResult<FailureOutcome> {
        self.require_sending("mark failed")?;

        let attempts = self.retry_count.saturating_add(1);
        let fail_fast = policy.fail_fast_on_permanent && failure.class == FailureClass::Permanent;

        self.error_message = Some(failure.to_string());
        self.updated_at = now;

        if fail_fast || attempts >= self.max_retries {
            self.retry_count = attempts.min(self.max_retries);
            self.status = OutboxStatus::Failed;
            return Ok(FailureOutcome::Failed);
        }

        let delay = policy.delay_for_attempt(attempts);
        let next_attempt_at = now + chrono::Duration::from_std(delay).unwrap_or_default();

        self.retry_count = attempts;
        self.status = OutboxStatus::Pending;
        self.scheduled_at = next_attempt_at;
        self.claimed_by = None;
        self.claimed_at = None;
        Ok(FailureOutcome::Retry { next_attempt_at })
    }

    /// `sending -> pending` without consuming a retry (stale claim recovery).
    pub fn release(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.require_sending("release")?;
        self.status = OutboxStatus::Pending;
        self.claimed_by = None;
        self.claimed_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// `failed -> pending` with a fresh retry budget.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != OutboxStatus::Failed {
            return Err(DomainError::conflict(format!(
                "only failed emails can be requeued (outbox {} is {})",
                self.id, self.status
            )));
        }
        self.status = OutboxStatus::Pending;
        self.retry_count = 0;
        self.scheduled_at = now;
        self.error_message = None;
        self.claimed_by = None;
        self.claimed_at = None;
        self.updated_at = now;
        Ok(())
    }

    fn require_sending(&self, op: &str) -> DomainResult<()> {
        if self.status != OutboxStatus::Sending {
            return Err(DomainError::conflict(format!(
                "cannot {op}: outbox {} is {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mailbox(s: &str) -> Mailbox {
        Mailbox::parse(s).unwrap()
    }

    fn pending_entry(retry_count: u32, max_retries: u32) -> OutboxEntry {
        let now = Utc::now();
        let mut entry = NewOutboxEntry::new(
            mailbox("client@example.com"),
            mailbox("Careers <team@hireflow.test>"),
            "Interview offer",
        )
        .with_text("hello")
        .with_max_retries(max_retries)
        .into_entry(OutboxId::new(), &RetryPolicy::default(), now)
        .unwrap();
        entry.retry_count = retry_count;
        entry
    }

    fn worker() -> WorkerId {
        WorkerId::new("test-worker")
    }

    #[test]
    fn new_entry_requires_subject_and_body() {
        let base = NewOutboxEntry::new(mailbox("a@b.io"), mailbox("c@d.io"), "Hi");
        assert!(base.validate().is_err());
        assert!(base.clone().with_html("<p>x</p>").validate().is_ok());

        let blank = NewOutboxEntry::new(mailbox("a@b.io"), mailbox("c@d.io"), "  ").with_text("x");
        assert!(blank.validate().is_err());
    }

    #[test]
    fn retry_budget_is_bounded() {
        let base = NewOutboxEntry::new(mailbox("a@b.io"), mailbox("c@d.io"), "Hi").with_text("x");
        assert!(base.clone().with_max_retries(MAX_RETRIES_LIMIT).validate().is_ok());
        assert!(base.clone().with_max_retries(MAX_RETRIES_LIMIT + 1).validate().is_err());
        assert!(base
            .with_max_retries(u32::MAX)
            .into_entry(OutboxId::new(), &RetryPolicy::default(), Utc::now())
            .is_err());
    }

    #[test]
    fn into_entry_applies_defaults() {
        let now = Utc::now();
        let entry = NewOutboxEntry::new(mailbox("a@b.io"), mailbox("c@d.io"), "Hi")
            .with_text("body")
            .into_entry(OutboxId::new(), &RetryPolicy::default(), now)
            .unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.scheduled_at, now);
        assert_eq!(entry.max_retries, 3);
        assert_eq!(entry.priority, Priority::Normal);
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(300));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(300));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(300));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            strategy: BackoffStrategy::Exponential,
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(500));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Linear,
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn successful_delivery_lifecycle() {
        let mut entry = pending_entry(0, 3);
        let now = Utc::now();

        entry.claim(&worker(), now).unwrap();
        assert_eq!(entry.status, OutboxStatus::Sending);
        assert!(entry.is_claimed_by(&worker()));

        entry.mark_sent(now).unwrap();
        assert_eq!(entry.status, OutboxStatus::Sent);
        assert_eq!(entry.sent_at, Some(now));
        assert!(!entry.is_due(now + chrono::Duration::days(1)));
        assert!(entry.claim(&worker(), now).is_err());
    }

    #[test]
    fn failure_reschedules_with_policy_delay() {
        let mut entry = pending_entry(0, 3);
        let now = Utc::now();
        entry.claim(&worker(), now).unwrap();

        let outcome = entry
            .mark_failed(&DeliveryFailure::transient("timeout"), &RetryPolicy::default(), now)
            .unwrap();

        let expected = now + chrono::Duration::minutes(5);
        assert_eq!(outcome, FailureOutcome::Retry { next_attempt_at: expected });
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.scheduled_at, expected);
        assert_eq!(entry.error_message.as_deref(), Some("transient: timeout"));
        assert!(entry.claimed_by.is_none());
        assert!(!entry.is_due(now));
        assert!(entry.is_due(expected));
    }

    #[test]
    fn permanent_failure_can_fail_fast() {
        let policy = RetryPolicy {
            fail_fast_on_permanent: true,
            ..Default::default()
        };
        let mut entry = pending_entry(0, 5);
        let now = Utc::now();
        entry.claim(&worker(), now).unwrap();

        let outcome = entry
            .mark_failed(&DeliveryFailure::permanent("mailbox does not exist"), &policy, now)
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Failed);
        assert_eq!(entry.retry_count, 1);
    }

    #[test]
    fn zero_budget_fails_on_first_error() {
        let mut entry = pending_entry(0, 0);
        let now = Utc::now();
        entry.claim(&worker(), now).unwrap();
        let outcome = entry
            .mark_failed(&DeliveryFailure::transient("x"), &RetryPolicy::default(), now)
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Failed);
        assert_eq!(entry.retry_count, 0);
    }

    #[test]
    fn release_keeps_retry_count() {
        let mut entry = pending_entry(2, 3);
        let now = Utc::now();
        entry.claim(&worker(), now).unwrap();
        entry.release(now).unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.retry_count, 2);
        assert!(entry.claimed_at.is_none());
    }

    #[test]
    fn requeue_only_from_failed() {
        let mut entry = pending_entry(0, 1);
        let now = Utc::now();
        assert!(entry.requeue(now).is_err());

        entry.claim(&worker(), now).unwrap();
        entry
            .mark_failed(&DeliveryFailure::transient("x"), &RetryPolicy::default(), now)
            .unwrap();
        assert_eq!(entry.status, OutboxStatus::Failed);

        entry.requeue(now).unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert!(entry.error_message.is_none());
        assert!(entry.is_due(now));
    }

    #[test]
    fn dispatch_key_orders_priority_first() {
        let now = Utc::now();
        let mut low_early = pending_entry(0, 3);
        low_early.priority = Priority::Low;
        low_early.scheduled_at = now - chrono::Duration::hours(1);

        let mut high_late = pending_entry(0, 3);
        high_late.priority = Priority::High;
        high_late.scheduled_at = now;

        assert!(high_late.dispatch_key() < low_early.dispatch_key());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(Priority::parse("HIGH").unwrap(), Priority::High);
        assert!(Priority::parse("asap").is_err());
        assert_eq!(Priority::from_rank(Priority::Low.rank()), Priority::Low);
        assert_eq!(OutboxStatus::parse("sent").unwrap(), OutboxStatus::Sent);
        assert!(OutboxStatus::parse("queued").is_err());
        assert_eq!(BackoffStrategy::parse("linear").unwrap(), BackoffStrategy::Linear);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a failure below the budget returns the row to pending
        /// with exactly one more retry recorded.
        #[test]
        fn failure_below_budget_retries(max_retries in 2u32..20, seed in 0u32..1000) {
            let retry_count = seed % (max_retries - 1);
            let mut entry = pending_entry(retry_count, max_retries);
            let now = Utc::now();
            entry.claim(&worker(), now).unwrap();

            let outcome = entry
                .mark_failed(&DeliveryFailure::transient("boom"), &RetryPolicy::default(), now)
                .unwrap();

            prop_assert!(matches!(outcome, FailureOutcome::Retry { .. }), "expected a retry outcome");
            prop_assert_eq!(entry.status, OutboxStatus::Pending);
            prop_assert_eq!(entry.retry_count, retry_count + 1);
        }

        /// Property: a failure at or past the last allowed attempt fails the
        /// row, and `retry_count` never exceeds `max_retries`.
        #[test]
        fn failure_at_budget_fails(max_retries in 0u32..20, extra in 0u32..5) {
            let retry_count = max_retries.saturating_sub(1) + extra;
            let mut entry = pending_entry(retry_count, max_retries);
            let now = Utc::now();
            entry.claim(&worker(), now).unwrap();

            let outcome = entry
                .mark_failed(&DeliveryFailure::transient("boom"), &RetryPolicy::default(), now)
                .unwrap();

            prop_assert_eq!(outcome, FailureOutcome::Failed);
            prop_assert_eq!(entry.status, OutboxStatus::Failed);
            prop_assert!(entry.retry_count <= entry.max_retries);
            prop_assert!(!entry.is_due(now + chrono::Duration::days(365)));
        }
    }
}

//! Outbox storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use hireflow_core::{OutboxId, WorkerId};
use hireflow_mail::{OutboxEntry, OutboxStatus};

use super::{clamp_limit, StoreError};

/// Listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxFilter {
    pub status: Option<OutboxStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Row counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub sending: u64,
    pub sent: u64,
    pub failed: u64,
    /// Pending rows whose `scheduled_at` has passed.
    pub due: u64,
}

impl OutboxStats {
    pub fn total(&self) -> u64 {
        self.pending + self.sending + self.sent + self.failed
    }
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a new `pending` row.
    async fn enqueue(&self, entry: OutboxEntry) -> Result<OutboxEntry, StoreError>;

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxEntry>, StoreError>;

    /// Newest first.
    async fn list(&self, filter: &OutboxFilter) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Atomically move up to `limit` due rows to `sending` under `worker`.
    ///
    /// Rows come back in dispatch order (priority, then `scheduled_at`).
    /// Concurrent callers never receive the same row.
    async fn claim_batch(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Persist the outcome of an attempt on a claimed row.
    ///
    /// Only succeeds while the stored row is `sending` under `worker`;
    /// otherwise returns [`StoreError::ClaimLost`].
    async fn finalize(&self, worker: &WorkerId, entry: &OutboxEntry) -> Result<(), StoreError>;

    /// Return `sending` rows claimed before `claimed_before` to `pending`.
    async fn release_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// `failed -> pending` with a fresh retry budget.
    async fn requeue_failed(&self, id: OutboxId, now: DateTime<Utc>) -> Result<OutboxEntry, StoreError>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<OutboxStats, StoreError>;
}

#[async_trait]
impl<S: OutboxStore + ?Sized> OutboxStore for Arc<S> {
    async fn enqueue(&self, entry: OutboxEntry) -> Result<OutboxEntry, StoreError> {
        (**self).enqueue(entry).await
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxEntry>, StoreError> {
        (**self).get(id).await
    }

    async fn list(&self, filter: &OutboxFilter) -> Result<Vec<OutboxEntry>, StoreError> {
        (**self).list(filter).await
    }

    async fn claim_batch(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        (**self).claim_batch(worker, now, limit).await
    }

    async fn finalize(&self, worker: &WorkerId, entry: &OutboxEntry) -> Result<(), StoreError> {
        (**self).finalize(worker, entry).await
    }

    async fn release_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        (**self).release_stale(claimed_before, now).await
    }

    async fn requeue_failed(&self, id: OutboxId, now: DateTime<Utc>) -> Result<OutboxEntry, StoreError> {
        (**self).requeue_failed(id, now).await
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<OutboxStats, StoreError> {
        (**self).stats(now).await
    }
}

/// In-memory outbox for tests/dev.
///
/// A single write lock around the map makes claiming atomic.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    rows: RwLock<HashMap<OutboxId, OutboxEntry>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, entry: OutboxEntry) -> Result<OutboxEntry, StoreError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&entry.id) {
            return Err(StoreError::Conflict(format!("outbox {} already exists", entry.id)));
        }
        rows.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: OutboxId) -> Result<Option<OutboxEntry>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(&self, filter: &OutboxFilter) -> Result<Vec<OutboxEntry>, StoreError> {
        let rows = self.rows.read().await;
        let mut result: Vec<_> = rows
            .values()
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();

        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.as_uuid().cmp(a.id.as_uuid())));
        Ok(result
            .into_iter()
            .skip(filter.offset.unwrap_or(0))
            .take(clamp_limit(filter.limit, 50, 500))
            .collect())
    }

    async fn claim_batch(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut rows = self.rows.write().await;

        let mut due: Vec<_> = rows
            .values()
            .filter(|e| e.is_due(now))
            .map(|e| (e.dispatch_key(), e.id))
            .collect();
        due.sort();

        let mut claimed = Vec::with_capacity(limit.min(due.len()));
        for (_, id) in due.into_iter().take(limit) {
            if let Some(entry) = rows.get_mut(&id) {
                entry.claim(worker, now)?;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn finalize(&self, worker: &WorkerId, entry: &OutboxEntry) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let stored = rows
            .get_mut(&entry.id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox {}", entry.id)))?;

        if !stored.is_claimed_by(worker) {
            return Err(StoreError::ClaimLost(entry.id.to_string()));
        }
        *stored = entry.clone();
        Ok(())
    }

    async fn release_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let mut released = 0;
        for entry in rows.values_mut() {
            let stale = entry.status == OutboxStatus::Sending
                && entry.claimed_at.is_none_or(|at| at < claimed_before);
            if stale {
                entry.release(now)?;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn requeue_failed(&self, id: OutboxId, now: DateTime<Utc>) -> Result<OutboxEntry, StoreError> {
        let mut rows = self.rows.write().await;
        let entry = rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox {id}")))?;
        entry.requeue(now)?;
        Ok(entry.clone())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<OutboxStats, StoreError> {
        let rows = self.rows.read().await;
        let mut stats = OutboxStats::default();
        for entry in rows.values() {
            match entry.status {
                OutboxStatus::Pending => stats.pending += 1,
                OutboxStatus::Sending => stats.sending += 1,
                OutboxStatus::Sent => stats.sent += 1,
                OutboxStatus::Failed => stats.failed += 1,
            }
            if entry.is_due(now) {
                stats.due += 1;
            }
        }
        Ok(stats)
    }
}

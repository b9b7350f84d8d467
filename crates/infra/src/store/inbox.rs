//! Inbox storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use hireflow_core::{ClientId, InboxId};
use hireflow_mail::{InboxEntry, ThreadId};

use super::{clamp_limit, StoreError};

/// Listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxFilter {
    pub client_id: Option<ClientId>,
    /// Only unread messages when `true`.
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[async_trait]
pub trait InboxStore: Send + Sync {
    async fn insert(&self, entry: InboxEntry) -> Result<InboxEntry, StoreError>;

    async fn get(&self, id: InboxId) -> Result<Option<InboxEntry>, StoreError>;

    /// Newest first.
    async fn list(&self, filter: &InboxFilter) -> Result<Vec<InboxEntry>, StoreError>;

    async fn set_read(&self, id: InboxId, read: bool) -> Result<InboxEntry, StoreError>;

    async fn delete(&self, id: InboxId) -> Result<(), StoreError>;

    /// Entry of `client_id` with the given provider message-id.
    async fn find_by_message_id(
        &self,
        client_id: ClientId,
        message_id: &str,
    ) -> Result<Option<InboxEntry>, StoreError>;

    /// All entries of a thread, oldest first.
    async fn thread(&self, thread_id: &ThreadId) -> Result<Vec<InboxEntry>, StoreError>;

    async fn unread_count(&self, client_id: Option<ClientId>) -> Result<u64, StoreError>;
}

#[async_trait]
impl<S: InboxStore + ?Sized> InboxStore for Arc<S> {
    async fn insert(&self, entry: InboxEntry) -> Result<InboxEntry, StoreError> {
        (**self).insert(entry).await
    }

    async fn get(&self, id: InboxId) -> Result<Option<InboxEntry>, StoreError> {
        (**self).get(id).await
    }

    async fn list(&self, filter: &InboxFilter) -> Result<Vec<InboxEntry>, StoreError> {
        (**self).list(filter).await
    }

    async fn set_read(&self, id: InboxId, read: bool) -> Result<InboxEntry, StoreError> {
        (**self).set_read(id, read).await
    }

    async fn delete(&self, id: InboxId) -> Result<(), StoreError> {
        (**self).delete(id).await
    }

    async fn find_by_message_id(
        &self,
        client_id: ClientId,
        message_id: &str,
    ) -> Result<Option<InboxEntry>, StoreError> {
        (**self).find_by_message_id(client_id, message_id).await
    }

    async fn thread(&self, thread_id: &ThreadId) -> Result<Vec<InboxEntry>, StoreError> {
        (**self).thread(thread_id).await
    }

    async fn unread_count(&self, client_id: Option<ClientId>) -> Result<u64, StoreError> {
        (**self).unread_count(client_id).await
    }
}

/// In-memory inbox for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryInboxStore {
    rows: RwLock<HashMap<InboxId, InboxEntry>>,
}

impl InMemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl InboxStore for InMemoryInboxStore {
    async fn insert(&self, entry: InboxEntry) -> Result<InboxEntry, StoreError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&entry.id) {
            return Err(StoreError::Conflict(format!("inbox {} already exists", entry.id)));
        }
        rows.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: InboxId) -> Result<Option<InboxEntry>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(&self, filter: &InboxFilter) -> Result<Vec<InboxEntry>, StoreError> {
        let rows = self.rows.read().await;
        let mut result: Vec<_> = rows
            .values()
            .filter(|e| filter.client_id.is_none_or(|c| e.client_id == c))
            .filter(|e| !filter.unread_only || !e.is_read)
            .cloned()
            .collect();

        result.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then(b.id.as_uuid().cmp(a.id.as_uuid()))
        });
        Ok(result
            .into_iter()
            .skip(filter.offset.unwrap_or(0))
            .take(clamp_limit(filter.limit, 50, 500))
            .collect())
    }

    async fn set_read(&self, id: InboxId, read: bool) -> Result<InboxEntry, StoreError> {
        let mut rows = self.rows.write().await;
        let entry = rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("inbox {id}")))?;
        entry.set_read(read);
        Ok(entry.clone())
    }

    async fn delete(&self, id: InboxId) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("inbox {id}")))
    }

    async fn find_by_message_id(
        &self,
        client_id: ClientId,
        message_id: &str,
    ) -> Result<Option<InboxEntry>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|e| e.client_id == client_id && e.message_id.as_deref() == Some(message_id))
            .min_by_key(|e| e.received_at)
            .cloned())
    }

    async fn thread(&self, thread_id: &ThreadId) -> Result<Vec<InboxEntry>, StoreError> {
        let rows = self.rows.read().await;
        let mut result: Vec<_> = rows
            .values()
            .filter(|e| &e.thread_id == thread_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then(a.id.as_uuid().cmp(b.id.as_uuid()))
        });
        Ok(result)
    }

    async fn unread_count(&self, client_id: Option<ClientId>) -> Result<u64, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|e| !e.is_read && client_id.is_none_or(|c| e.client_id == c))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, Utc};
    use hireflow_core::EmailAddress;

    fn entry(client_id: ClientId, thread: &str, minutes_ago: i64, message_id: Option<&str>) -> InboxEntry {
        let at = Utc::now() - Duration::minutes(minutes_ago);
        InboxEntry {
            id: InboxId::new(),
            client_id,
            from_email: EmailAddress::parse("hr@acme.com").unwrap(),
            from_name: None,
            to_email: EmailAddress::parse("jane@in.hireflow.test").unwrap(),
            subject: "Offer".into(),
            text_body: "hello".into(),
            html_body: None,
            received_at: at,
            is_read: false,
            thread_id: ThreadId::from_raw(thread),
            message_id: message_id.map(str::to_string),
            in_reply_to: None,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn list_filters_by_client_and_unread() {
        let store = InMemoryInboxStore::new();
        let jane = ClientId::new();
        let bob = ClientId::new();
        let first = store.insert(entry(jane, "t1", 10, None)).await.unwrap();
        store.insert(entry(jane, "t2", 5, None)).await.unwrap();
        store.insert(entry(bob, "t3", 1, None)).await.unwrap();

        store.set_read(first.id, true).await.unwrap();

        let janes = store
            .list(&InboxFilter {
                client_id: Some(jane),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(janes.len(), 2);
        assert!(janes[0].received_at > janes[1].received_at);

        let unread = store
            .list(&InboxFilter {
                client_id: Some(jane),
                unread_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);

        assert_eq!(store.unread_count(None).await.unwrap(), 2);
        assert_eq!(store.unread_count(Some(jane)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn thread_is_chronological() {
        let store = InMemoryInboxStore::new();
        let client = ClientId::new();
        store.insert(entry(client, "t", 1, None)).await.unwrap();
        store.insert(entry(client, "t", 30, None)).await.unwrap();
        store.insert(entry(client, "other", 15, None)).await.unwrap();

        let thread = store.thread(&ThreadId::from_raw("t")).await.unwrap();
        assert_eq!(thread.len(), 2);
        assert!(thread[0].received_at < thread[1].received_at);
    }

    #[tokio::test]
    async fn message_id_lookup_is_client_scoped() {
        let store = InMemoryInboxStore::new();
        let client = ClientId::new();
        store.insert(entry(client, "t", 1, Some("m1@acme.com"))).await.unwrap();

        assert!(store.find_by_message_id(client, "m1@acme.com").await.unwrap().is_some());
        assert!(store.find_by_message_id(ClientId::new(), "m1@acme.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_and_missing_rows() {
        let store = InMemoryInboxStore::new();
        let row = store.insert(entry(ClientId::new(), "t", 1, None)).await.unwrap();
        store.delete(row.id).await.unwrap();
        assert!(store.get(row.id).await.unwrap().is_none());
        assert!(matches!(store.delete(row.id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.set_read(row.id, true).await, Err(StoreError::NotFound(_))));
    }
}

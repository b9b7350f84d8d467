//! Read-only client directory used to attribute inbound mail.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use hireflow_core::{ClientId, EmailAddress};

use super::StoreError;

/// A client and the owned-domain address assigned to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: ClientId,
    pub name: String,
    pub assigned_email: EmailAddress,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ClientDirectory: Send + Sync {
    /// Client whose assigned sender email equals `email` (case-insensitive).
    ///
    /// When several records share an address the oldest wins.
    async fn find_by_sender_email(&self, email: &EmailAddress) -> Result<Option<ClientRecord>, StoreError>;

    async fn get(&self, id: ClientId) -> Result<Option<ClientRecord>, StoreError>;
}

#[async_trait]
impl<S: ClientDirectory + ?Sized> ClientDirectory for Arc<S> {
    async fn find_by_sender_email(&self, email: &EmailAddress) -> Result<Option<ClientRecord>, StoreError> {
        (**self).find_by_sender_email(email).await
    }

    async fn get(&self, id: ClientId) -> Result<Option<ClientRecord>, StoreError> {
        (**self).get(id).await
    }
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryClientDirectory {
    records: RwLock<Vec<ClientRecord>>,
}

impl InMemoryClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn insert(&self, record: ClientRecord) {
        self.records.write().await.push(record);
    }

    /// Register a client with the given assigned address.
    pub async fn register(&self, name: impl Into<String>, assigned_email: EmailAddress) -> ClientRecord {
        let record = ClientRecord {
            id: ClientId::new(),
            name: name.into(),
            assigned_email,
            created_at: Utc::now(),
        };
        self.insert(record.clone()).await;
        record
    }
}

#[async_trait]
impl ClientDirectory for InMemoryClientDirectory {
    async fn find_by_sender_email(&self, email: &EmailAddress) -> Result<Option<ClientRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.assigned_email.eq_ignore_case(email))
            .min_by_key(|r| r.created_at)
            .cloned())
    }

    async fn get(&self, id: ClientId) -> Result<Option<ClientRecord>, StoreError> {
        Ok(self.records.read().await.iter().find(|r| r.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn lookup_ignores_case_and_prefers_oldest() {
        let dir = InMemoryClientDirectory::new();
        let addr = EmailAddress::parse("Jane@in.hireflow.test").unwrap();
        let newer = ClientRecord {
            id: ClientId::new(),
            name: "newer".into(),
            assigned_email: addr.clone(),
            created_at: Utc::now(),
        };
        let older = ClientRecord {
            created_at: Utc::now() - Duration::days(1),
            name: "older".into(),
            id: ClientId::new(),
            ..newer.clone()
        };
        dir.insert(newer).await;
        dir.insert(older.clone()).await;

        let lookup = EmailAddress::parse("JANE@IN.hireflow.test").unwrap();
        let found = dir.find_by_sender_email(&lookup).await.unwrap().unwrap();
        assert_eq!(found.id, older.id);
        assert_eq!(dir.get(older.id).await.unwrap().unwrap().name, "older");

        let other = EmailAddress::parse("bob@in.hireflow.test").unwrap();
        assert!(dir.find_by_sender_email(&other).await.unwrap().is_none());
    }
}

//! Template storage.
//!
//! Names are unique and each category has at most one default template.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use hireflow_core::TemplateId;
use hireflow_mail::Template;

use super::StoreError;

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Fails with `Conflict` when the name is taken.
    async fn create(&self, template: Template) -> Result<Template, StoreError>;

    async fn get(&self, id: TemplateId) -> Result<Option<Template>, StoreError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Template>, StoreError>;

    /// Ordered by category, then name.
    async fn list(&self, category: Option<&str>) -> Result<Vec<Template>, StoreError>;

    /// Replace a stored template's content.
    ///
    /// Never promotes: the stored default flag survives only while the
    /// template stays active and in the same category. Use `set_default`
    /// to move the default.
    async fn update(&self, template: Template) -> Result<Template, StoreError>;

    async fn delete(&self, id: TemplateId) -> Result<(), StoreError>;

    /// Make `id` the default of its category, clearing the previous default.
    async fn set_default(&self, id: TemplateId, now: DateTime<Utc>) -> Result<Template, StoreError>;

    async fn default_for(&self, category: &str) -> Result<Option<Template>, StoreError>;
}

#[async_trait]
impl<S: TemplateStore + ?Sized> TemplateStore for Arc<S> {
    async fn create(&self, template: Template) -> Result<Template, StoreError> {
        (**self).create(template).await
    }

    async fn get(&self, id: TemplateId) -> Result<Option<Template>, StoreError> {
        (**self).get(id).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Template>, StoreError> {
        (**self).find_by_name(name).await
    }

    async fn list(&self, category: Option<&str>) -> Result<Vec<Template>, StoreError> {
        (**self).list(category).await
    }

    async fn update(&self, template: Template) -> Result<Template, StoreError> {
        (**self).update(template).await
    }

    async fn delete(&self, id: TemplateId) -> Result<(), StoreError> {
        (**self).delete(id).await
    }

    async fn set_default(&self, id: TemplateId, now: DateTime<Utc>) -> Result<Template, StoreError> {
        (**self).set_default(id, now).await
    }

    async fn default_for(&self, category: &str) -> Result<Option<Template>, StoreError> {
        (**self).default_for(category).await
    }
}

/// In-memory template store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    rows: RwLock<HashMap<TemplateId, Template>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn name_taken(rows: &HashMap<TemplateId, Template>, name: &str, except: TemplateId) -> bool {
    rows.values()
        .any(|t| t.id != except && t.name.eq_ignore_ascii_case(name))
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn create(&self, template: Template) -> Result<Template, StoreError> {
        let mut rows = self.rows.write().await;
        if name_taken(&rows, &template.name, template.id) {
            return Err(StoreError::Conflict(format!(
                "template name already exists: {}",
                template.name
            )));
        }
        if rows.contains_key(&template.id) {
            return Err(StoreError::Conflict(format!("template {} already exists", template.id)));
        }
        let template = Template {
            is_default: false,
            ..template
        };
        rows.insert(template.id, template.clone());
        Ok(template)
    }

    async fn get(&self, id: TemplateId) -> Result<Option<Template>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Template>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|t| t.name.eq_ignore_ascii_case(name.trim()))
            .cloned())
    }

    async fn list(&self, category: Option<&str>) -> Result<Vec<Template>, StoreError> {
        let rows = self.rows.read().await;
        let category = category.map(|c| c.trim().to_ascii_lowercase());
        let mut result: Vec<_> = rows
            .values()
            .filter(|t| category.as_deref().is_none_or(|c| t.category == c))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.name.cmp(&b.name)));
        Ok(result)
    }

    async fn update(&self, template: Template) -> Result<Template, StoreError> {
        let mut rows = self.rows.write().await;
        let Some(stored) = rows.get(&template.id) else {
            return Err(StoreError::NotFound(format!("template {}", template.id)));
        };
        let keeps_default =
            stored.is_default && template.is_active && stored.category == template.category;
        if name_taken(&rows, &template.name, template.id) {
            return Err(StoreError::Conflict(format!(
                "template name already exists: {}",
                template.name
            )));
        }
        let template = Template {
            is_default: keeps_default,
            ..template
        };
        rows.insert(template.id, template.clone());
        Ok(template)
    }

    async fn delete(&self, id: TemplateId) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("template {id}")))
    }

    async fn set_default(&self, id: TemplateId, now: DateTime<Utc>) -> Result<Template, StoreError> {
        let mut rows = self.rows.write().await;
        let target = rows
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("template {id}")))?;
        if !target.is_active {
            return Err(StoreError::Conflict(format!(
                "inactive template {id} cannot be the default"
            )));
        }
        let category = target.category.clone();

        for t in rows.values_mut() {
            if t.category != category {
                continue;
            }
            let make_default = t.id == id;
            if t.is_default != make_default {
                t.is_default = make_default;
                t.updated_at = now;
            }
        }

        rows.get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("template {id}")))
    }

    async fn default_for(&self, category: &str) -> Result<Option<Template>, StoreError> {
        let category = category.trim().to_ascii_lowercase();
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|t| t.is_default && t.category == category)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hireflow_mail::NewTemplate;

    fn template(name: &str, category: &str) -> Template {
        NewTemplate {
            name: name.into(),
            category: category.into(),
            subject: "Hi {{name}}".into(),
            html_body: "<p>Hello {{name}}</p>".into(),
            text_body: None,
            variables: None,
            is_active: true,
        }
        .into_template(TemplateId::new(), Utc::now())
        .unwrap()
    }

    #[tokio::test]
    async fn names_are_unique_ignoring_case() {
        let store = InMemoryTemplateStore::new();
        store.create(template("Welcome", "onboarding")).await.unwrap();
        let err = store.create(template("welcome", "other")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.find_by_name("WELCOME").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn set_default_leaves_exactly_one_per_category() {
        let store = InMemoryTemplateStore::new();
        let a = store.create(template("a", "interview")).await.unwrap();
        let b = store.create(template("b", "interview")).await.unwrap();
        let c = store.create(template("c", "offer")).await.unwrap();

        store.set_default(a.id, Utc::now()).await.unwrap();
        store.set_default(c.id, Utc::now()).await.unwrap();
        store.set_default(b.id, Utc::now()).await.unwrap();

        let interview = store.list(Some("interview")).await.unwrap();
        assert_eq!(interview.iter().filter(|t| t.is_default).count(), 1);
        assert_eq!(store.default_for("Interview").await.unwrap().unwrap().id, b.id);
        assert_eq!(store.default_for("offer").await.unwrap().unwrap().id, c.id);
    }

    #[tokio::test]
    async fn inactive_template_cannot_be_default() {
        let store = InMemoryTemplateStore::new();
        let mut t = template("a", "interview");
        t.is_active = false;
        let t = store.create(t).await.unwrap();
        assert!(matches!(
            store.set_default(t.id, Utc::now()).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn update_checks_name_and_existence() {
        let store = InMemoryTemplateStore::new();
        store.create(template("a", "x")).await.unwrap();
        let mut b = store.create(template("b", "x")).await.unwrap();

        b.name = "A".into();
        assert!(matches!(store.update(b.clone()).await, Err(StoreError::Conflict(_))));

        let ghost = template("ghost", "x");
        assert!(matches!(store.update(ghost).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_of_stale_copy_keeps_newer_default() {
        let store = InMemoryTemplateStore::new();
        let a = store.create(template("a", "interview")).await.unwrap();
        let b = store.create(template("b", "interview")).await.unwrap();
        let stale_a = store.set_default(a.id, Utc::now()).await.unwrap();
        store.set_default(b.id, Utc::now()).await.unwrap();

        let mut edited = stale_a.clone();
        edited.subject = "Updated {{name}}".into();
        let saved = store.update(edited).await.unwrap();

        assert!(!saved.is_default);
        let interview = store.list(Some("interview")).await.unwrap();
        assert_eq!(interview.iter().filter(|t| t.is_default).count(), 1);
        assert_eq!(store.default_for("interview").await.unwrap().unwrap().id, b.id);
    }

    #[tokio::test]
    async fn update_never_promotes_and_drops_flag_on_move_or_deactivate() {
        let store = InMemoryTemplateStore::new();
        let a = store.create(template("a", "interview")).await.unwrap();
        let b = store.create(template("b", "interview")).await.unwrap();
        store.set_default(b.id, Utc::now()).await.unwrap();

        let mut promoted = a.clone();
        promoted.is_default = true;
        assert!(!store.update(promoted).await.unwrap().is_default);
        assert_eq!(store.default_for("interview").await.unwrap().unwrap().id, b.id);

        let mut moved = store.get(b.id).await.unwrap().unwrap();
        moved.category = "offer".into();
        assert!(!store.update(moved).await.unwrap().is_default);
        assert!(store.default_for("offer").await.unwrap().is_none());
        assert!(store.default_for("interview").await.unwrap().is_none());

        store.set_default(a.id, Utc::now()).await.unwrap();
        let mut inactive = store.get(a.id).await.unwrap().unwrap();
        inactive.is_active = false;
        assert!(!store.update(inactive).await.unwrap().is_default);
        assert!(store.default_for("interview").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_sorted_and_delete_removes() {
        let store = InMemoryTemplateStore::new();
        let z = store.create(template("z", "a")).await.unwrap();
        store.create(template("y", "b")).await.unwrap();
        store.create(template("x", "a")).await.unwrap();

        let names: Vec<_> = store.list(None).await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["x", "z", "y"]);

        store.delete(z.id).await.unwrap();
        assert!(store.get(z.id).await.unwrap().is_none());
        assert!(matches!(store.delete(z.id).await, Err(StoreError::NotFound(_))));
    }
}

//! Email templates and the `{{variable}}` renderer.
//!
//! Rendering is plain string substitution: no escaping, no nesting, no
//! type checking against the declared variable list.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hireflow_core::{DomainError, DomainResult, TemplateId};

/// Variable map used for rendering.
pub type Variables = BTreeMap<String, String>;

/// What to do with a placeholder whose key is not in the variable map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingVariable {
    /// Leave `{{key}}` in the output.
    #[default]
    Keep,
    /// Replace with the empty string.
    Empty,
}

enum Token<'a> {
    Text(&'a str),
    Placeholder { raw: &'a str, key: &'a str },
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn parse_key(inner: &str) -> Option<&str> {
    let key = inner.trim();
    (!key.is_empty() && key.chars().all(is_key_char)).then_some(key)
}

/// Split `input` into literal text and well-formed placeholders.
fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while let Some(rel) = input[i..].find("{{") {
        let open = i + rel;
        let body_start = open + 2;
        let placeholder = input[body_start..].find("}}").and_then(|close_rel| {
            let close = body_start + close_rel;
            parse_key(&input[body_start..close]).map(|key| (close + 2, key))
        });

        match placeholder {
            Some((end, key)) => {
                if text_start < open {
                    tokens.push(Token::Text(&input[text_start..open]));
                }
                tokens.push(Token::Placeholder {
                    raw: &input[open..end],
                    key,
                });
                text_start = end;
                i = end;
            }
            // Not a placeholder: keep the brace and rescan from the next byte.
            None => i = open + 1,
        }
    }

    if text_start < input.len() {
        tokens.push(Token::Text(&input[text_start..]));
    }
    tokens
}

fn render_into(input: &str, vars: &Variables, missing: MissingVariable, unresolved: &mut Vec<String>) -> String {
    let mut out = String::with_capacity(input.len());
    for token in tokenize(input) {
        match token {
            Token::Text(text) => out.push_str(text),
            Token::Placeholder { raw, key } => match vars.get(key) {
                Some(value) => out.push_str(value),
                None => {
                    if !unresolved.iter().any(|k| k == key) {
                        unresolved.push(key.to_string());
                    }
                    if missing == MissingVariable::Keep {
                        out.push_str(raw);
                    }
                }
            },
        }
    }
    out
}

/// Substitute every `{{key}}` present in `vars`.
pub fn render(input: &str, vars: &Variables, missing: MissingVariable) -> String {
    render_into(input, vars, missing, &mut Vec::new())
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholders(input: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for token in tokenize(input) {
        if let Token::Placeholder { key, .. } = token {
            if !names.iter().any(|n| n == key) {
                names.push(key.to_string());
            }
        }
    }
    names
}

/// Flatten a JSON object into render variables.
///
/// Strings are used as-is, `null` becomes empty, other scalars use their JSON
/// text and nested values are serialized compactly.
pub fn variables_from_json(value: &serde_json::Value) -> DomainResult<Variables> {
    let serde_json::Value::Object(map) = value else {
        return Err(DomainError::validation("variables must be a JSON object"));
    };

    Ok(map
        .iter()
        .map(|(k, v)| {
            let rendered = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (k.clone(), rendered)
        })
        .collect())
}

/// A stored email template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub category: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    /// Declared variable names (informational).
    pub variables: Vec<String>,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Output of [`Template::render`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedTemplate {
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    /// Placeholder names with no value in the variable map.
    pub unresolved: Vec<String>,
}

impl Template {
    pub fn render(&self, vars: &Variables, missing: MissingVariable) -> RenderedTemplate {
        let mut unresolved = Vec::new();
        let subject = render_into(&self.subject, vars, missing, &mut unresolved);
        let html_body = render_into(&self.html_body, vars, missing, &mut unresolved);
        let text_body = self
            .text_body
            .as_deref()
            .map(|t| render_into(t, vars, missing, &mut unresolved));

        RenderedTemplate {
            subject,
            html_body,
            text_body,
            unresolved,
        }
    }

    /// Apply a partial update. Deactivating a template drops its default flag.
    pub fn apply(&mut self, patch: TemplatePatch, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(name) = patch.name {
            self.name = validate_name(&name)?;
        }
        if let Some(category) = patch.category {
            let category = validate_category(&category)?;
            if category != self.category {
                self.is_default = false;
            }
            self.category = category;
        }
        if let Some(subject) = patch.subject {
            self.subject = subject;
        }
        if let Some(html_body) = patch.html_body {
            self.html_body = html_body;
        }
        if let Some(text_body) = patch.text_body {
            self.text_body = Some(text_body).filter(|t| !t.is_empty());
        }
        if let Some(variables) = patch.variables {
            self.variables = variables;
        }
        if let Some(active) = patch.is_active {
            self.is_active = active;
            if !active {
                self.is_default = false;
            }
        }

        validate_content(&self.subject, &self.html_body)?;
        self.updated_at = now;
        Ok(())
    }

    /// Every placeholder used across subject and bodies.
    pub fn used_placeholders(&self) -> Vec<String> {
        let mut names = placeholders(&self.subject);
        let bodies = [Some(self.html_body.as_str()), self.text_body.as_deref()];
        for name in bodies.into_iter().flatten().flat_map(placeholders) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

/// Create request for a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub category: String,
    pub subject: String,
    pub html_body: String,
    #[serde(default)]
    pub text_body: Option<String>,
    /// Declared variables; derived from the placeholders when omitted.
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewTemplate {
    pub fn into_template(self, id: TemplateId, now: DateTime<Utc>) -> DomainResult<Template> {
        let name = validate_name(&self.name)?;
        let category = validate_category(&self.category)?;
        validate_content(&self.subject, &self.html_body)?;

        let mut template = Template {
            id,
            name,
            category,
            subject: self.subject,
            html_body: self.html_body,
            text_body: self.text_body.filter(|t| !t.is_empty()),
            variables: Vec::new(),
            is_active: self.is_active,
            is_default: false,
            created_at: now,
            updated_at: now,
        };
        template.variables = match self.variables {
            Some(vars) => vars,
            None => template.used_placeholders(),
        };
        Ok(template)
    }
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
    /// An empty string clears the text body.
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

fn validate_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("template name must not be empty"));
    }
    if name.len() > 128 {
        return Err(DomainError::validation("template name must be at most 128 characters"));
    }
    Ok(name.to_string())
}

fn validate_category(category: &str) -> DomainResult<String> {
    let category = category.trim().to_ascii_lowercase();
    if category.is_empty() {
        return Err(DomainError::validation("template category must not be empty"));
    }
    Ok(category)
}

fn validate_content(subject: &str, html_body: &str) -> DomainResult<()> {
    if subject.trim().is_empty() {
        return Err(DomainError::validation("template subject must not be empty"));
    }
    if html_body.trim().is_empty() {
        return Err(DomainError::validation("template html body must not be empty"));
    }
    Ok(())
}

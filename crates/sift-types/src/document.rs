//! Index documents and delete criteria.
//!
//! These are what the translation step produces and what index engines
//! consume. The scheduler never inspects field values.

use serde::{Deserialize, Serialize};

/// A named field of an index document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub name: String,
    pub value: String,
    /// Whether the engine should keep the original value
    #[serde(default = "default_true")]
    pub stored: bool,
    /// Whether the engine should tokenize the value
    #[serde(default = "default_true")]
    pub tokenized: bool,
}

fn default_true() -> bool {
    true
}

impl IndexField {
    /// Stored and tokenized field.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            stored: true,
            tokenized: true,
        }
    }

    /// Stored, untokenized field (identifiers, paths, facets).
    pub fn keyword(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tokenized: false,
            ..Self::new(name, value)
        }
    }
}

/// A document ready to be written to an index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub fields: Vec<IndexField>,
}

impl IndexDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field.
    pub fn with_field(mut self, field: IndexField) -> Self {
        self.fields.push(field);
        self
    }

    /// Append a field.
    pub fn add(&mut self, field: IndexField) {
        self.fields.push(field);
    }

    /// Remove every field with the given name.
    pub fn remove_fields(&mut self, name: &str) {
        self.fields.retain(|f| f.name != name);
    }

    /// First value of the named field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Apply engine-level custom fields.
    ///
    /// Fields sharing a name with a custom field are dropped first, so custom
    /// fields replace rather than duplicate translated ones.
    pub fn merge_custom_fields(&mut self, custom: &[IndexField]) {
        for field in custom {
            self.remove_fields(&field.name);
        }
        self.fields.extend(custom.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Criteria selecting the index entries that belong to one content item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteRule {
    /// Every document whose `field` equals `value`.
    Term { field: String, value: String },
    /// An engine-specific query, passed through untouched.
    Query(String),
}

impl DeleteRule {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        DeleteRule::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn query(query: impl Into<String>) -> Self {
        DeleteRule::Query(query.into())
    }
}

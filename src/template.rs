//! Transaction and document templates.
//!
//! A transaction template lists the indexes to build and the operations each
//! worker replays:
//!
//! ```yaml
//! indexes:
//!   - { email: 1 }
//!   - { age: -1, name: 1 }
//! transactions:
//!   - { c: insert }
//!   - { c: find, filter: { email: "john@example.com" } }
//!   - { c: update, filter: { email: "john@example.com" }, op: { $inc: { balance: 10 } } }
//! ```

use crate::error::{Result, SimError};
use bson::{doc, Bson, Document};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// Index always created on the target collection.
pub const SEARCH_INDEX_FIELD: &str = "_search";

/// Index and shard key used with the built-in example documents.
pub const DEFAULT_SHARD_KEY: &str = "email";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Find,
    Update,
    Delete,
    Aggregate,
    Count,
}

impl OperationKind {
    /// Metrics category of this operation.
    pub fn category(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Find => "find",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Aggregate => "aggregate",
            OperationKind::Count => "count",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransactionSpec {
    #[serde(rename = "c")]
    pub kind: OperationKind,
    #[serde(default)]
    pub filter: Option<Document>,
    /// Update document for `update`.
    #[serde(default)]
    pub op: Option<Document>,
    /// Stages for `aggregate`.
    #[serde(default)]
    pub pipeline: Option<Vec<Document>>,
}

impl TransactionSpec {
    fn validate(&self, position: usize) -> Result<()> {
        match self.kind {
            OperationKind::Update if self.op.is_none() => Err(SimError::Template(format!(
                "transaction {position}: update needs an `op` document"
            ))),
            OperationKind::Aggregate if self.pipeline.is_none() => Err(SimError::Template(
                format!("transaction {position}: aggregate needs a `pipeline`"),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TransactionTemplate {
    /// Field to direction maps, in key order.
    #[serde(default)]
    pub indexes: Vec<Document>,
    #[serde(default)]
    pub transactions: Vec<TransactionSpec>,
}

impl TransactionTemplate {
    /// Read a template, YAML for `.yaml`/`.yml` files and JSON otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SimError::Template(format!("reading {}: {e}", path.display()))
        })?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        let mut template: Self = if is_yaml {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        if template.transactions.is_empty() {
            template.transactions = default_transactions();
        }
        template.validate()?;
        Ok(template)
    }

    /// Template file at `path`, or the defaults when none is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self {
                indexes: Vec::new(),
                transactions: default_transactions(),
            }),
        }
    }

    fn validate(&self) -> Result<()> {
        for (position, spec) in self.transactions.iter().enumerate() {
            spec.validate(position)?;
        }
        Ok(())
    }

    /// Without custom indexes the collection is keyed (and sharded) on
    /// `email`.
    pub fn uses_default_indexes(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Key documents of every index to build, in creation order.
    pub fn index_keys(&self) -> Vec<Document> {
        let mut keys = vec![doc! { SEARCH_INDEX_FIELD: 1 }];
        if self.uses_default_indexes() {
            keys.push(doc! { DEFAULT_SHARD_KEY: 1 });
        }
        keys.extend(self.indexes.iter().map(normalize_index));
        keys
    }
}

/// Map every direction to `1` or `-1`, keeping key order.
pub fn normalize_index(spec: &Document) -> Document {
    spec.iter()
        .map(|(field, direction)| {
            let descending = match direction {
                Bson::Int32(n) => *n < 0,
                Bson::Int64(n) => *n < 0,
                Bson::Double(f) => *f < 0.0,
                _ => false,
            };
            (field.clone(), Bson::Int32(if descending { -1 } else { 1 }))
        })
        .collect()
}

/// Insert a fresh document, look it up by email, bump its balance.
pub fn default_transactions() -> Vec<TransactionSpec> {
    let by_email = doc! { DEFAULT_SHARD_KEY: "Jdoe.1234@example.com" };
    vec![
        TransactionSpec {
            kind: OperationKind::Insert,
            filter: None,
            op: None,
            pipeline: None,
        },
        TransactionSpec {
            kind: OperationKind::Find,
            filter: Some(by_email.clone()),
            op: None,
            pipeline: None,
        },
        TransactionSpec {
            kind: OperationKind::Update,
            filter: Some(by_email),
            op: Some(doc! { "$inc": { "balance": 10 } }),
            pipeline: None,
        },
    ]
}

/// Read the JSON document that shapes synthetic documents.
pub fn load_document_template(path: &Path) -> Result<Document> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SimError::Template(format!("reading {}: {e}", path.display())))?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(_) => Err(SimError::Template(format!(
            "{} must contain a JSON object",
            path.display()
        ))),
        Err(e) => Err(SimError::Template(format!("{}: {e}", path.display()))),
    }
}

//! Record store abstraction
//!
//! The relational storage layer is an external collaborator; Stratus only
//! consumes the trait surface defined here: criteria-based lookup, insert,
//! mutate-with-diff, and delete. [`MemoryRepository`] is the built-in
//! insertion-ordered backend used by the crate's own tests.

pub mod memory;

pub use memory::MemoryRepository;

use crate::error::StratusResult;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A persistable record with a stable id and stringly field projection
///
/// The field projection feeds criteria matching and field-by-field diffs;
/// it does not constrain how a backend physically stores the record.
pub trait Record: Clone + Send + Sync + 'static {
    /// Record kind, used in errors, lock class keys and audit entity names
    const KIND: &'static str;

    /// Stable unique id
    fn record_id(&self) -> String;

    /// Projection of the record's comparable fields
    fn fields(&self) -> BTreeMap<&'static str, String>;

    /// Single field lookup
    fn field(&self, name: &str) -> Option<String> {
        self.fields().get(name).cloned()
    }
}

/// Filter criteria over record field projections
#[derive(Debug, Clone)]
pub enum Criteria {
    /// Match everything
    All,
    /// Field equals value
    Eq(&'static str, String),
    /// Field is one of the values
    In(&'static str, Vec<String>),
    /// Soft-delete flag is not set (records without the flag match)
    NotDeleted,
    /// All sub-criteria match
    And(Vec<Criteria>),
}

impl Criteria {
    /// Equality on a field
    pub fn eq(field: &'static str, value: impl Into<String>) -> Self {
        Self::Eq(field, value.into())
    }

    /// Check a record against this criteria
    pub fn matches<T: Record>(&self, record: &T) -> bool {
        match self {
            Criteria::All => true,
            Criteria::Eq(field, value) => record.field(field).as_deref() == Some(value),
            Criteria::In(field, values) => record
                .field(field)
                .is_some_and(|v| values.iter().any(|c| c == &v)),
            Criteria::NotDeleted => record.field("deleted").as_deref() != Some("true"),
            Criteria::And(all) => all.iter().all(|c| c.matches(record)),
        }
    }
}

/// Field-by-field difference between two versions of a record
#[derive(Debug, Clone, Default)]
pub struct FieldDiff {
    changes: BTreeMap<&'static str, (String, String)>,
}

impl FieldDiff {
    /// Compute the diff between two versions of a record
    pub fn between<T: Record>(old: &T, new: &T) -> Self {
        let old_fields = old.fields();
        let mut changes = BTreeMap::new();
        for (name, new_value) in new.fields() {
            let old_value = old_fields.get(name).cloned().unwrap_or_default();
            if old_value != new_value {
                changes.insert(name, (old_value, new_value));
            }
        }
        Self { changes }
    }

    /// True when no field changed
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changed fields
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// JSON representation for audit details
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .changes
            .iter()
            .map(|(name, (old, new))| {
                (
                    (*name).to_string(),
                    serde_json::json!({"from": old, "to": new}),
                )
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

impl std::fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (name, (old, new)) in &self.changes {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{name}: {old:?} -> {new:?}")?;
            first = false;
        }
        Ok(())
    }
}

/// Storage collaborator interface
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    /// Fetch all records matching the criteria, in stable store order
    async fn find(&self, criteria: &Criteria) -> StratusResult<Vec<T>>;

    /// Fetch one record by id
    async fn get(&self, id: &str) -> StratusResult<Option<T>>;

    /// Insert a new record; fails with `Duplicate` on id collision
    async fn insert(&self, record: T) -> StratusResult<()>;

    /// Mutate a record in place and return the resulting field diff
    async fn update(
        &self,
        id: &str,
        mutate: Box<dyn for<'a> FnOnce(&'a mut T) + Send>,
    ) -> StratusResult<FieldDiff>;

    /// Remove a record by id; fails with `NotFound` when absent
    async fn remove(&self, id: &str) -> StratusResult<()>;

    /// Count records matching the criteria
    async fn count(&self, criteria: &Criteria) -> StratusResult<usize> {
        Ok(self.find(criteria).await?.len())
    }
}

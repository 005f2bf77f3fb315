//! Per-pass reconciliation counters
//!
//! Action failures inside a pass are isolated per entry and aggregated
//! here; a single bad entry never aborts the pass.

use crate::error::StratusError;

/// Outcome counters for one reconciliation pass
#[derive(Debug, Default)]
pub struct SyncResult {
    /// Records created
    pub added: usize,
    /// Records updated in place
    pub updated: usize,
    /// Records marked for removal
    pub removed: usize,
    /// Per-entry creation failures
    pub add_errors: Vec<String>,
    /// Per-entry update failures
    pub update_errors: Vec<String>,
    /// Per-entry removal failures
    pub delete_errors: Vec<String>,
    /// Failures before any entry was processed (listing, locking)
    pub fetch_errors: Vec<String>,
}

impl SyncResult {
    /// Empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful creation
    pub fn add(&mut self) {
        self.added += 1;
    }

    /// Record one failed creation
    pub fn add_error(&mut self, err: &StratusError) {
        self.add_errors.push(err.to_string());
    }

    /// Record one successful update
    pub fn update(&mut self) {
        self.updated += 1;
    }

    /// Record one failed update
    pub fn update_error(&mut self, err: &StratusError) {
        self.update_errors.push(err.to_string());
    }

    /// Record one successful removal
    pub fn delete(&mut self) {
        self.removed += 1;
    }

    /// Record one failed removal
    pub fn delete_error(&mut self, err: &StratusError) {
        self.delete_errors.push(err.to_string());
    }

    /// Record a pass-level failure (remote listing, lock acquisition)
    pub fn fetch_error(&mut self, err: &StratusError) {
        self.fetch_errors.push(err.to_string());
    }

    /// Total failed entries
    pub fn error_count(&self) -> usize {
        self.add_errors.len()
            + self.update_errors.len()
            + self.delete_errors.len()
            + self.fetch_errors.len()
    }

    /// Whether any entry or the pass itself failed
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Fold another pass's counters into this one
    pub fn merge(&mut self, other: SyncResult) {
        self.added += other.added;
        self.updated += other.updated;
        self.removed += other.removed;
        self.add_errors.extend(other.add_errors);
        self.update_errors.extend(other.update_errors);
        self.delete_errors.extend(other.delete_errors);
        self.fetch_errors.extend(other.fetch_errors);
    }

    /// Aggregate error when some entries failed, `None` when clean
    pub fn to_error(&self) -> Option<StratusError> {
        if !self.has_errors() {
            return None;
        }
        let total =
            self.added + self.updated + self.removed + self.error_count();
        Some(StratusError::PartialSync {
            failed: self.error_count(),
            total,
        })
    }
}

impl std::fmt::Display for SyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "removed {} updated {} added {} errors {}",
            self.removed,
            self.updated,
            self.added,
            self.error_count()
        )
    }
}

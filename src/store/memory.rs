//! In-memory record store
//!
//! Insertion-ordered, so scans are deterministic; eviction tie-breaking
//! and reconciliation tests rely on stable store order.

use crate::error::{StratusError, StratusResult};
use crate::store::{Criteria, FieldDiff, Record, Repository};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Insertion-ordered in-memory repository
pub struct MemoryRepository<T> {
    records: Arc<Mutex<Vec<T>>>,
}

impl<T> MemoryRepository<T> {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MemoryRepository<T> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

#[async_trait]
impl<T: Record> Repository<T> for MemoryRepository<T> {
    async fn find(&self, criteria: &Criteria) -> StratusResult<Vec<T>> {
        let records = self.records.lock().expect("record store poisoned");
        Ok(records
            .iter()
            .filter(|r| criteria.matches(*r))
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> StratusResult<Option<T>> {
        let records = self.records.lock().expect("record store poisoned");
        Ok(records.iter().find(|r| r.record_id() == id).cloned())
    }

    async fn insert(&self, record: T) -> StratusResult<()> {
        let mut records = self.records.lock().expect("record store poisoned");
        let id = record.record_id();
        if records.iter().any(|r| r.record_id() == id) {
            return Err(StratusError::Duplicate(id));
        }
        records.push(record);
        Ok(())
    }

    async fn update(
        &self,
        id: &str,
        mutate: Box<dyn for<'a> FnOnce(&'a mut T) + Send>,
    ) -> StratusResult<FieldDiff> {
        let mut records = self.records.lock().expect("record store poisoned");
        let record = records
            .iter_mut()
            .find(|r| r.record_id() == id)
            .ok_or_else(|| StratusError::not_found(T::KIND, id))?;

        let before = record.clone();
        mutate(record);
        Ok(FieldDiff::between(&before, record))
    }

    async fn remove(&self, id: &str) -> StratusResult<()> {
        let mut records = self.records.lock().expect("record store poisoned");
        let pos = records
            .iter()
            .position(|r| r.record_id() == id)
            .ok_or_else(|| StratusError::not_found(T::KIND, id))?;
        records.remove(pos);
        Ok(())
    }
}

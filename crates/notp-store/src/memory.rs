//! In-memory implementation of the ObjectStore trait.
//!
//! Same semantics as SQLite, no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use notp_core::{Object, Oid};

use crate::error::Result;
use crate::traits::{InsertResult, ObjectStore};

/// In-memory store. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    objects: HashMap<Oid, Object>,
    refs: BTreeMap<String, Oid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every write is a single map operation, so a poisoned lock still guards
    // consistent data.
    fn read(&self) -> RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryStoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn object_count(&self) -> usize {
        self.read().objects.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn insert_object(&self, object: &Object) -> Result<InsertResult> {
        let mut inner = self.write();
        if inner.objects.contains_key(&object.oid()) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.objects.insert(object.oid(), object.clone());
        Ok(InsertResult::Inserted)
    }

    async fn get_object(&self, oid: &Oid) -> Result<Option<Object>> {
        Ok(self.read().objects.get(oid).cloned())
    }

    async fn has_object(&self, oid: &Oid) -> Result<bool> {
        Ok(self.read().objects.contains_key(oid))
    }

    async fn list_objects(&self) -> Result<Vec<Oid>> {
        let mut oids: Vec<Oid> = self.read().objects.keys().copied().collect();
        oids.sort();
        Ok(oids)
    }

    async fn get_ref(&self, name: &str) -> Result<Option<Oid>> {
        Ok(self.read().refs.get(name).copied())
    }

    async fn compare_and_set_ref(&self, name: &str, expected: Oid, new: Oid) -> Result<bool> {
        let mut inner = self.write();
        let current = inner.refs.get(name).copied().unwrap_or(Oid::ZERO);
        if current != expected {
            return Ok(false);
        }
        if new.is_zero() {
            inner.refs.remove(name);
        } else {
            inner.refs.insert(name.to_string(), new);
        }
        Ok(true)
    }

    async fn list_refs(&self) -> Result<Vec<(String, Oid)>> {
        Ok(self
            .read()
            .refs
            .iter()
            .map(|(name, oid)| (name.clone(), *oid))
            .collect())
    }
}

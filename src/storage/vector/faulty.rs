//! Fault-injecting wrapper around [`MemoryVectorBackend`] for tests.

use super::MemoryVectorBackend;
use crate::models::{Scheme, TemplateId};
use crate::storage::traits::VectorBackend;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory backend whose writes, deletes and queries can be made to fail
/// as if the index server were unreachable.
#[derive(Default)]
pub struct FaultyVectorBackend {
    inner: MemoryVectorBackend,
    pub fail_upsert: AtomicBool,
    pub fail_remove: AtomicBool,
    pub fail_nearest: AtomicBool,
}

impl FaultyVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(flag: &AtomicBool, operation: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(Error::store(operation, "connection refused"));
        }
        Ok(())
    }
}

impl VectorBackend for FaultyVectorBackend {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn ensure_index(&self, scheme: &Scheme) -> Result<()> {
        self.inner.ensure_index(scheme)
    }

    fn upsert(&self, scheme: &Scheme, id: &TemplateId, vector: &[f32]) -> Result<()> {
        Self::check(&self.fail_upsert, "upsert_vector")?;
        self.inner.upsert(scheme, id, vector)
    }

    fn get(&self, scheme: &Scheme, id: &TemplateId) -> Result<Option<Vec<f32>>> {
        self.inner.get(scheme, id)
    }

    fn remove(&self, scheme: &Scheme, id: &TemplateId) -> Result<bool> {
        Self::check(&self.fail_remove, "remove_vector")?;
        self.inner.remove(scheme, id)
    }

    fn nearest(&self, scheme: &Scheme, query: &[f32], k: usize) -> Result<Vec<(TemplateId, f32)>> {
        Self::check(&self.fail_nearest, "knn_query")?;
        self.inner.nearest(scheme, query, k)
    }

    fn ids(&self, scheme: &Scheme) -> Result<Vec<TemplateId>> {
        self.inner.ids(scheme)
    }

    fn count(&self, scheme: &Scheme) -> Result<usize> {
        self.inner.count(scheme)
    }
}

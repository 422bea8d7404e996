//! In-process vector backend.
//!
//! Brute-force 1-NN over a map per scheme. Exact distances under the
//! scheme's metric, so identical vectors score exactly zero. Suitable for
//! tests and single-process deployments without Redis.

use crate::models::{Scheme, SchemeId, TemplateId};
use crate::storage::sqlite::acquire_lock;
use crate::storage::traits::{VectorBackend, check_dimension};
use crate::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

type SchemeIndex = BTreeMap<TemplateId, Vec<f32>>;

/// Vector backend holding every index in memory.
#[derive(Default)]
pub struct MemoryVectorBackend {
    indexes: Mutex<HashMap<SchemeId, SchemeIndex>>,
}

impl MemoryVectorBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorBackend for MemoryVectorBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn ensure_index(&self, scheme: &Scheme) -> Result<()> {
        acquire_lock(&self.indexes).entry(scheme.id).or_default();
        Ok(())
    }

    fn upsert(&self, scheme: &Scheme, id: &TemplateId, vector: &[f32]) -> Result<()> {
        check_dimension(scheme, "upsert", vector)?;
        acquire_lock(&self.indexes)
            .entry(scheme.id)
            .or_default()
            .insert(id.clone(), vector.to_vec());
        Ok(())
    }

    fn get(&self, scheme: &Scheme, id: &TemplateId) -> Result<Option<Vec<f32>>> {
        Ok(acquire_lock(&self.indexes)
            .get(&scheme.id)
            .and_then(|index| index.get(id).cloned()))
    }

    fn remove(&self, scheme: &Scheme, id: &TemplateId) -> Result<bool> {
        Ok(acquire_lock(&self.indexes)
            .get_mut(&scheme.id)
            .is_some_and(|index| index.remove(id).is_some()))
    }

    fn nearest(&self, scheme: &Scheme, query: &[f32], k: usize) -> Result<Vec<(TemplateId, f32)>> {
        check_dimension(scheme, "knn_query", query)?;
        let guard = acquire_lock(&self.indexes);
        let Some(index) = guard.get(&scheme.id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(TemplateId, f32)> = index
            .iter()
            .map(|(id, stored)| (id.clone(), scheme.metric.distance(query, stored)))
            .collect();
        drop(guard);

        // Ties resolve by id so results are stable across calls.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    fn ids(&self, scheme: &Scheme) -> Result<Vec<TemplateId>> {
        Ok(acquire_lock(&self.indexes)
            .get(&scheme.id)
            .map(|index| index.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn count(&self, scheme: &Scheme) -> Result<usize> {
        Ok(acquire_lock(&self.indexes)
            .get(&scheme.id)
            .map_or(0, BTreeMap::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn scheme() -> &'static Scheme {
        SchemeId::Normalized16.scheme()
    }

    #[test]
    fn test_empty_index_has_no_neighbors() {
        let backend = MemoryVectorBackend::new();
        assert!(backend.nearest(scheme(), &[0.5; 16], 1).unwrap().is_empty());
        assert_eq!(backend.count(scheme()).unwrap(), 0);
    }

    #[test]
    fn test_nearest_orders_ascending() {
        let backend = MemoryVectorBackend::new();
        backend.upsert(scheme(), &TemplateId::new("far"), &[1.0; 16]).unwrap();
        backend.upsert(scheme(), &TemplateId::new("near"), &[0.1; 16]).unwrap();

        let hits = backend.nearest(scheme(), &[0.0; 16], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.as_str(), "near");
        assert!(hits[0].1 < hits[1].1);
        assert!((hits[1].1 - 16.0).abs() < 1e-4);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let backend = MemoryVectorBackend::new();
        let id = TemplateId::new("a");
        backend.upsert(scheme(), &id, &[0.25; 16]).unwrap();
        backend.upsert(scheme(), &id, &[0.25; 16]).unwrap();
        assert_eq!(backend.count(scheme()).unwrap(), 1);
        assert_eq!(backend.get(scheme(), &id).unwrap(), Some(vec![0.25; 16]));
    }

    #[test]
    fn test_schemes_are_partitioned() {
        let backend = MemoryVectorBackend::new();
        let id = TemplateId::new("shared");
        backend.upsert(scheme(), &id, &[0.0; 16]).unwrap();
        let legacy = SchemeId::LegacyHash.scheme();
        assert!(!backend.contains(legacy, &id).unwrap());
        assert!(backend.nearest(legacy, &[0.0; 16], 1).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch_is_store_error() {
        let backend = MemoryVectorBackend::new();
        let err = backend
            .upsert(SchemeId::Normalized512.scheme(), &TemplateId::new("x"), &[0.0; 16])
            .unwrap_err();
        assert!(matches!(err, Error::Store { ref operation, .. } if operation == "upsert"));
    }

    #[test]
    fn test_remove() {
        let backend = MemoryVectorBackend::new();
        let id = TemplateId::new("gone");
        backend.upsert(scheme(), &id, &[0.0; 16]).unwrap();
        assert!(backend.remove(scheme(), &id).unwrap());
        assert!(!backend.remove(scheme(), &id).unwrap());
        assert!(backend.ids(scheme()).unwrap().is_empty());
    }
}

//! Template store adapter.
//!
//! Thin, scheme-aware front over a [`VectorBackend`]. Every call resolves the
//! scheme's index first, so vectors of different dimensions never meet in one
//! index.

use crate::models::{EncodedVector, Scheme, SchemeId, TemplateId};
use crate::storage::VectorBackend;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::instrument;

/// Reads and writes encoded vectors keyed by template id.
#[derive(Clone)]
pub struct TemplateStore {
    backend: Arc<dyn VectorBackend>,
}

impl TemplateStore {
    /// Creates a store over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn VectorBackend>) -> Self {
        Self { backend }
    }

    /// Name of the underlying backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Creates every registered scheme's index that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on the first index that cannot be created.
    pub fn bootstrap(&self) -> Result<()> {
        for scheme in Scheme::all() {
            self.backend.ensure_index(scheme)?;
            tracing::debug!(
                scheme = %scheme.id,
                index = scheme.index_name,
                backend = self.backend.name(),
                "Index ready"
            );
        }
        Ok(())
    }

    /// Writes `vector` under `id` in its scheme's index, overwriting any
    /// previous value. Writing the same pair twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the backend rejects the write.
    #[instrument(
        name = "fingerlink.store.upsert",
        skip(self, vector),
        fields(scheme = %vector.scheme(), template_id = %id)
    )]
    pub fn upsert(&self, id: &TemplateId, vector: &EncodedVector) -> Result<()> {
        let scheme = vector.scheme().scheme();
        if vector.len() != scheme.dimension {
            return Err(Error::store(
                "upsert",
                format!(
                    "vector has {} elements, scheme '{}' needs {}",
                    vector.len(),
                    scheme.id,
                    scheme.dimension
                ),
            ));
        }
        self.backend.upsert(scheme, id, vector.values())
    }

    /// Reads the stored vector for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the backend fails.
    pub fn get(&self, scheme: SchemeId, id: &TemplateId) -> Result<Option<Vec<f32>>> {
        self.backend.get(scheme.scheme(), id)
    }

    /// Whether `id` has a vector in the scheme's index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the backend fails.
    pub fn contains(&self, scheme: SchemeId, id: &TemplateId) -> Result<bool> {
        self.backend.contains(scheme.scheme(), id)
    }

    /// Deletes the vector for `id`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the backend fails.
    pub fn remove(&self, scheme: SchemeId, id: &TemplateId) -> Result<bool> {
        self.backend.remove(scheme.scheme(), id)
    }

    /// Lists every template id stored under the scheme.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the backend fails.
    pub fn ids(&self, scheme: SchemeId) -> Result<Vec<TemplateId>> {
        self.backend.ids(scheme.scheme())
    }

    /// Number of vectors stored under the scheme.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the backend fails.
    pub fn count(&self, scheme: SchemeId) -> Result<usize> {
        self.backend.count(scheme.scheme())
    }

    pub(crate) fn nearest(
        &self,
        vector: &EncodedVector,
        k: usize,
    ) -> Result<Vec<(TemplateId, f32)>> {
        self.backend
            .nearest(vector.scheme().scheme(), vector.values(), k)
    }
}

impl std::fmt::Debug for TemplateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

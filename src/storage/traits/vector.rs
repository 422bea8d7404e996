//! Vector index backend trait.
//!
//! Every operation is scoped to a [`Scheme`]: a backend keeps one index per
//! scheme, partitioned by the scheme's key prefix, so vectors of different
//! dimension never share an index.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Configuration |
//! |---------|----------|---------------|
//! | `MemoryVectorBackend` | Tests, single-process demos | Default when Redis is not configured |
//! | `RedisVectorBackend` | Shared HNSW index | Requires Redis Stack (`RediSearch` 2.4+) |

use crate::Result;
use crate::models::{Scheme, TemplateId};

/// Trait for vector index backends.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn VectorBackend>`
/// - Use interior mutability (e.g., `Mutex<HashMap<K,V>>`) for mutable state
/// - Transport failures surface as [`Error::Store`](crate::Error::Store) and
///   are never retried here
/// - An empty or missing index is not an error for [`nearest`](Self::nearest)
pub trait VectorBackend: Send + Sync {
    /// Short backend name for logs and status output.
    fn name(&self) -> &'static str;

    /// Creates the scheme's index if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be inspected or created.
    fn ensure_index(&self, scheme: &Scheme) -> Result<()>;

    /// Writes or overwrites the vector stored under `id`.
    ///
    /// Writing the same vector twice leaves the index unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector length does not match the scheme
    /// dimension or the write fails.
    fn upsert(&self, scheme: &Scheme, id: &TemplateId, vector: &[f32]) -> Result<()>;

    /// Reads back the vector stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get(&self, scheme: &Scheme, id: &TemplateId) -> Result<Option<Vec<f32>>>;

    /// Returns true if a vector is stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn contains(&self, scheme: &Scheme, id: &TemplateId) -> Result<bool> {
        self.get(scheme, id).map(|v| v.is_some())
    }

    /// Removes the vector stored under `id`. Returns true if one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn remove(&self, scheme: &Scheme, id: &TemplateId) -> Result<bool>;

    /// Returns up to `k` nearest neighbors of `query`, closest first.
    ///
    /// Scores are raw distances under the scheme's metric.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or its reply cannot be decoded.
    fn nearest(&self, scheme: &Scheme, query: &[f32], k: usize) -> Result<Vec<(TemplateId, f32)>>;

    /// Lists every template id stored under the scheme.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails.
    fn ids(&self, scheme: &Scheme) -> Result<Vec<TemplateId>>;

    /// Number of vectors stored under the scheme.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    fn count(&self, scheme: &Scheme) -> Result<usize>;
}

/// Rejects vectors whose length differs from the scheme dimension.
pub(crate) fn check_dimension(scheme: &Scheme, operation: &str, vector: &[f32]) -> Result<()> {
    if vector.len() == scheme.dimension {
        return Ok(());
    }
    Err(crate::Error::store(
        operation,
        format!(
            "dimension mismatch for '{}': expected {}, got {}",
            scheme.id,
            scheme.dimension,
            vector.len()
        ),
    ))
}

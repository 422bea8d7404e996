//! Similarity matching and the match decision.
//!
//! The index always returns its closest point once it holds anything, so a
//! hit is only a candidate. [`SimilarityMatcher::identify`] runs the query and
//! the threshold check together; there is no path that skips the check.

use super::TemplateStore;
use crate::models::{EncodedVector, MatchResult, Verdict};
use crate::observability::metrics::record_match_distance;
use crate::Result;
use tracing::instrument;

/// Issues 1-nearest-neighbor queries against a scheme's index.
#[derive(Debug, Clone)]
pub struct SimilarityMatcher {
    store: TemplateStore,
}

impl SimilarityMatcher {
    /// Creates a matcher over `store`.
    #[must_use]
    pub const fn new(store: TemplateStore) -> Self {
        Self { store }
    }

    /// Returns the closest enrolled template, if the index holds any.
    ///
    /// An empty index is `Ok(None)`. Transport failures propagate as
    /// [`Error::Store`](crate::Error::Store) and are never read as "no match".
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`](crate::Error::Store) if the query fails.
    #[instrument(
        name = "fingerlink.match.query",
        skip(self, vector),
        fields(scheme = %vector.scheme())
    )]
    pub fn query(&self, vector: &EncodedVector) -> Result<Option<MatchResult>> {
        let best = self.store.nearest(vector, 1)?.into_iter().next();
        Ok(best.map(|(template_id, distance)| {
            record_match_distance(vector.scheme(), distance);
            tracing::debug!(template_id = %template_id, distance, "Nearest candidate");
            MatchResult {
                template_id,
                distance,
                scheme: vector.scheme(),
            }
        }))
    }

    /// Queries the index and applies the scheme threshold.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`](crate::Error::Store) if the query fails.
    pub fn identify(&self, vector: &EncodedVector) -> Result<Verdict> {
        let scheme = vector.scheme().scheme();
        let candidate = self.query(vector)?;
        let verdict = scheme.decide(candidate);
        if !verdict.is_match() {
            tracing::debug!(scheme = %scheme.id, threshold = scheme.threshold, "No candidate within threshold");
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SchemeId, TemplateId};
    use crate::Error;
    use crate::storage::MemoryVectorBackend;
    use crate::storage::vector::FaultyVectorBackend;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    fn matcher() -> (TemplateStore, SimilarityMatcher) {
        let store = TemplateStore::new(Arc::new(MemoryVectorBackend::new()));
        (store.clone(), SimilarityMatcher::new(store))
    }

    #[test]
    fn test_index_failure_is_store_error_not_no_match() {
        let backend = Arc::new(FaultyVectorBackend::new());
        let store = TemplateStore::new(backend.clone());
        let matcher = SimilarityMatcher::new(store.clone());
        let scheme = SchemeId::Normalized16.scheme();
        let vector = scheme.encode(&[3u8; 16]).unwrap();
        store.upsert(&TemplateId::from_bytes(&[3u8; 16]), &vector).unwrap();

        backend.fail_nearest.store(true, Ordering::SeqCst);
        assert!(matches!(matcher.query(&vector), Err(Error::Store { .. })));
        assert!(matches!(matcher.identify(&vector), Err(Error::Store { .. })));
    }

    #[test]
    fn test_empty_index_is_no_match_not_error() {
        let (_, matcher) = matcher();
        let query = SchemeId::Normalized16.scheme().encode(&[3u8; 16]).unwrap();
        assert!(matcher.query(&query).unwrap().is_none());
        assert_eq!(matcher.identify(&query).unwrap(), Verdict::NoMatch);
    }

    #[test]
    fn test_self_match_scores_zero() {
        let (store, matcher) = matcher();
        for id in SchemeId::all() {
            let scheme = id.scheme();
            let raw: Vec<u8> = (0..scheme.dimension).map(|i| (i * 7 % 256) as u8).collect();
            let vector = scheme.encode(&raw).unwrap();
            let template_id = TemplateId::from_bytes(&raw);
            store.upsert(&template_id, &vector).unwrap();

            let hit = matcher.query(&vector).unwrap().unwrap();
            assert_eq!(hit.template_id, template_id);
            assert_eq!(hit.distance, scheme.metric.zero_distance());
            assert_eq!(
                matcher.identify(&vector).unwrap(),
                Verdict::Match {
                    template_id,
                    distance: 0.0
                }
            );
        }
    }

    #[test]
    fn test_distant_candidate_is_rejected() {
        let (store, matcher) = matcher();
        let scheme = SchemeId::Normalized16.scheme();
        let enrolled = [0u8; 16];
        store
            .upsert(
                &TemplateId::from_bytes(&enrolled),
                &scheme.encode(&enrolled).unwrap(),
            )
            .unwrap();

        let probe = scheme.encode(&[255u8; 16]).unwrap();
        let hit = matcher.query(&probe).unwrap().unwrap();
        assert!((hit.distance - 16.0).abs() < 1e-4);
        assert_eq!(matcher.identify(&probe).unwrap(), Verdict::NoMatch);
    }
}

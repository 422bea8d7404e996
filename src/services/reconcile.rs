//! Reconciliation between the vector index and the identity store.
//!
//! Finds vectors with no enrollment link. Vector-only registrations are
//! orphans by this definition too, so purging is always an explicit choice.

use super::TemplateStore;
use crate::models::{Scheme, SchemeId, TemplateId};
use crate::observability::metrics::record_orphans;
use crate::storage::IdentityBackend;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Vectors examined.
    pub scanned: usize,
    /// Vectors without an enrollment link.
    pub orphans: Vec<TemplateId>,
    /// Orphans deleted in this run.
    pub purged: usize,
}

/// Vector count of one scheme's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemeStatus {
    /// Scheme id.
    pub scheme: SchemeId,
    /// Index holding the scheme's vectors.
    pub index_name: &'static str,
    /// Vector dimension.
    pub dimension: usize,
    /// Number of stored vectors.
    pub vectors: usize,
}

/// Cross-checks the two stores.
#[derive(Clone)]
pub struct ReconcileService {
    store: TemplateStore,
    identity: Arc<dyn IdentityBackend>,
}

impl ReconcileService {
    /// Creates a reconciliation service.
    #[must_use]
    pub fn new(store: TemplateStore, identity: Arc<dyn IdentityBackend>) -> Self {
        Self { store, identity }
    }

    /// Lists or purges the orphan vectors of `scheme`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`](crate::Error::Store) if either store fails.
    /// Vectors purged before the failure stay deleted.
    #[instrument(
        name = "fingerlink.reconcile",
        skip(self, scheme),
        fields(component = "reconcile", scheme = %scheme.id)
    )]
    pub fn reconcile(&self, scheme: &'static Scheme, purge: bool) -> Result<ReconcileReport> {
        let start = Instant::now();
        let mut report = ReconcileReport::default();

        for id in self.store.ids(scheme.id)? {
            report.scanned += 1;
            if self.identity.user_for_template(&id)?.is_none() {
                report.orphans.push(id);
            }
        }
        record_orphans(scheme.id, "reconcile", report.orphans.len());

        if purge {
            for id in &report.orphans {
                if self.store.remove(scheme.id, id)? {
                    report.purged += 1;
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            orphans = report.orphans.len(),
            purged = report.purged,
            duration_ms = start.elapsed().as_millis(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Reports the vector count of every registered scheme.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`](crate::Error::Store) if a count fails.
    pub fn status(&self) -> Result<Vec<SchemeStatus>> {
        Scheme::all()
            .iter()
            .map(|scheme| {
                Ok(SchemeStatus {
                    scheme: scheme.id,
                    index_name: scheme.index_name,
                    dimension: scheme.dimension,
                    vectors: self.store.count(scheme.id)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use crate::services::EnrollmentService;
    use crate::storage::{MemoryVectorBackend, SqliteIdentityStore};

    fn setup() -> (EnrollmentService, ReconcileService) {
        let store = TemplateStore::new(Arc::new(MemoryVectorBackend::new()));
        let identity: Arc<dyn IdentityBackend> = Arc::new(SqliteIdentityStore::in_memory().unwrap());
        (
            EnrollmentService::new(store.clone(), identity.clone()),
            ReconcileService::new(store, identity),
        )
    }

    #[test]
    fn test_finds_and_purges_orphans() {
        let (enrollment, reconcile) = setup();
        let scheme = SchemeId::Normalized16.scheme();
        enrollment
            .enroll(&UserId::new("1"), &[1u8; 16], scheme)
            .unwrap();
        let orphan = enrollment.register(&[2u8; 16], scheme).unwrap();

        let report = reconcile.reconcile(scheme, false).unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.orphans, vec![orphan.template_id.clone()]);
        assert_eq!(report.purged, 0);

        let report = reconcile.reconcile(scheme, true).unwrap();
        assert_eq!(report.purged, 1);

        let report = reconcile.reconcile(scheme, false).unwrap();
        assert_eq!(report.scanned, 1);
        assert!(report.orphans.is_empty());
    }

    #[test]
    fn test_status_covers_every_scheme() {
        let (enrollment, reconcile) = setup();
        enrollment
            .register(&[9u8; 512], SchemeId::Normalized512.scheme())
            .unwrap();

        let status = reconcile.status().unwrap();
        assert_eq!(status.len(), SchemeId::all().len());
        let n512 = status
            .iter()
            .find(|s| s.scheme == SchemeId::Normalized512)
            .unwrap();
        assert_eq!(n512.vectors, 1);
        assert_eq!(n512.dimension, 512);
    }
}

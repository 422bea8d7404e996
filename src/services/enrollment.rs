//! Enrollment workflow.
//!
//! `Received → Encoded → Upserted → Linked → Acknowledged`.
//!
//! The vector upsert and the identity link live in different stores with no
//! shared transaction. When the link insert fails, the workflow removes the
//! vector again, but only if this call created it and no link points at it;
//! a vector that already existed may back earlier links. A compensation that
//! is skipped or fails leaves an orphan, which is logged and counted for the
//! reconciliation pass.
//!
//! Two concurrent enrollments of the same bytes can both see the vector as
//! new. The link check before removal narrows the window but does not close
//! it: if the other request links between that check and the remove, its
//! user is left with a link and no vector, and gets `NoMatch` until the
//! template is enrolled again.

use super::TemplateStore;
use crate::models::{EnrollmentRecord, Scheme, SchemeId, TemplateId, UserId};
use crate::observability::metrics::{outcome_label, record_enrollment, record_orphans};
use crate::storage::IdentityBackend;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Result of a successful enrollment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentReceipt {
    /// The enrolled user.
    pub user_id: UserId,
    /// Content-addressed id of the template.
    pub template_id: TemplateId,
    /// Scheme the template was encoded under.
    pub scheme: SchemeId,
    /// When the link was written.
    pub created_at: DateTime<Utc>,
    /// Whether the vector was already in the index before this call.
    pub vector_existed: bool,
}

/// Result of a vector-only registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationReceipt {
    /// Content-addressed id of the template.
    pub template_id: TemplateId,
    /// Scheme the template was encoded under.
    pub scheme: SchemeId,
}

/// Enrolls templates and links them to users.
#[derive(Clone)]
pub struct EnrollmentService {
    store: TemplateStore,
    identity: Arc<dyn IdentityBackend>,
}

impl EnrollmentService {
    /// Creates an enrollment service.
    #[must_use]
    pub fn new(store: TemplateStore, identity: Arc<dyn IdentityBackend>) -> Self {
        Self { store, identity }
    }

    /// Enrolls `raw` for `user_id` under `scheme`.
    ///
    /// Re-enrolling identical bytes overwrites the vector harmlessly and adds
    /// another link row.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for an empty template or blank user id
    /// - [`Error::Encoding`] if the template is shorter than the dimension
    /// - [`Error::Store`] if the vector write fails (no link is written)
    /// - [`Error::Persistence`] if the link insert fails
    #[instrument(
        name = "fingerlink.enroll",
        skip(self, raw, scheme),
        fields(
            component = "enrollment",
            operation = "enroll",
            scheme = %scheme.id,
            user_id = %user_id,
            template_id = tracing::field::Empty
        )
    )]
    pub fn enroll(
        &self,
        user_id: &UserId,
        raw: &[u8],
        scheme: &'static Scheme,
    ) -> Result<EnrollmentReceipt> {
        let start = Instant::now();
        let result = self.run_enroll(user_id, raw, scheme);

        record_enrollment(scheme.id, outcome_label(&result));
        match &result {
            Ok(receipt) => tracing::info!(
                stage = "acknowledged",
                vector_existed = receipt.vector_existed,
                duration_ms = start.elapsed().as_millis(),
                "Enrollment complete"
            ),
            Err(e) => tracing::warn!(error = %e, kind = e.kind(), "Enrollment failed"),
        }
        result
    }

    fn run_enroll(
        &self,
        user_id: &UserId,
        raw: &[u8],
        scheme: &'static Scheme,
    ) -> Result<EnrollmentReceipt> {
        tracing::debug!(stage = "received", bytes = raw.len());
        validate_template(raw)?;
        if user_id.as_str().trim().is_empty() {
            return Err(Error::Validation("user_id is required".to_string()));
        }

        let vector = scheme.encode(raw)?;
        let template_id = TemplateId::from_bytes(raw);
        tracing::Span::current().record("template_id", template_id.as_str());
        tracing::debug!(stage = "encoded", dimension = vector.len());

        let vector_existed = self.store.contains(scheme.id, &template_id)?;
        self.store.upsert(&template_id, &vector)?;
        tracing::debug!(stage = "upserted", vector_existed);

        let record = EnrollmentRecord {
            user_id: user_id.clone(),
            template_id: template_id.clone(),
            created_at: Utc::now(),
        };
        if let Err(link_error) = self.identity.insert_enrollment(&record) {
            self.compensate(scheme, &template_id, vector_existed);
            return Err(link_error);
        }
        tracing::debug!(stage = "linked");

        Ok(EnrollmentReceipt {
            user_id: record.user_id,
            template_id,
            scheme: scheme.id,
            created_at: record.created_at,
            vector_existed,
        })
    }

    /// Undoes the upsert of a vector this call created.
    fn compensate(&self, scheme: &Scheme, template_id: &TemplateId, vector_existed: bool) {
        if vector_existed {
            tracing::debug!("Vector predates this enrollment, leaving it in place");
            return;
        }
        match self.identity.user_for_template(template_id) {
            Ok(None) => {},
            Ok(Some(owner)) => {
                tracing::info!(
                    linked_user = %owner,
                    "Vector linked by a concurrent enrollment, leaving it in place"
                );
                return;
            },
            Err(e) => {
                tracing::error!(
                    error = %e,
                    orphan = true,
                    "Cannot check links before compensation; reconciliation required"
                );
                record_orphans(scheme.id, "enrollment", 1);
                return;
            },
        }
        match self.store.remove(scheme.id, template_id) {
            Ok(_) => tracing::info!("Removed vector after failed link insert"),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    orphan = true,
                    "Vector left without identity link; reconciliation required"
                );
                record_orphans(scheme.id, "enrollment", 1);
            },
        }
    }

    /// Encodes and stores `raw` without linking it to anyone.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for an empty template
    /// - [`Error::Encoding`] if the template is shorter than the dimension
    /// - [`Error::Store`] if the vector write fails
    #[instrument(
        name = "fingerlink.register",
        skip(self, raw, scheme),
        fields(component = "enrollment", operation = "register", scheme = %scheme.id)
    )]
    pub fn register(&self, raw: &[u8], scheme: &'static Scheme) -> Result<RegistrationReceipt> {
        let result = (|| {
            validate_template(raw)?;
            let vector = scheme.encode(raw)?;
            let template_id = TemplateId::from_bytes(raw);
            self.store.upsert(&template_id, &vector)?;
            Ok(RegistrationReceipt {
                template_id,
                scheme: scheme.id,
            })
        })();

        record_enrollment(scheme.id, outcome_label(&result));
        if let Ok(receipt) = &result {
            tracing::info!(template_id = %receipt.template_id, "Template registered");
        }
        result
    }
}

/// Rejects an empty capture before any encoding is attempted.
pub(crate) fn validate_template(raw: &[u8]) -> Result<()> {
    if raw.is_empty() {
        return Err(Error::Validation("template is empty".to_string()));
    }
    Ok(())
}

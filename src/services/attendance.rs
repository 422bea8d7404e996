//! Attendance workflow.
//!
//! `Captured → Encoded → Matched → Decided → IdentityResolved → EventPersisted`.
//!
//! A rejected candidate and an accepted candidate that cannot be traced back
//! to a person are different failures. Both reach the caller as "not found",
//! but they are logged and counted separately, and the second one is an
//! orphan vector that the reconciliation pass will report.

use super::SimilarityMatcher;
use super::enrollment::validate_template;
use crate::models::{
    AttendanceEvent, AttendanceKey, DeviceId, Participant, Scheme, SchemeId, TemplateId, Verdict,
};
use crate::observability::metrics::{outcome_label, record_attendance, record_orphans};
use crate::storage::IdentityBackend;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// A template accepted by the matcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identification {
    /// Id of the matched template.
    pub template_id: TemplateId,
    /// Distance between the query and the match.
    pub distance: f32,
    /// Scheme the match was made under.
    pub scheme: SchemeId,
}

/// Result of a recorded attendance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceReceipt {
    /// The persisted event, with its row id.
    pub event: AttendanceEvent,
    /// Display name of the attendee.
    pub full_name: String,
    /// Match distance, for fingerprint attendance.
    pub distance: Option<f32>,
}

/// Identifies attendees and records attendance events.
#[derive(Clone)]
pub struct AttendanceService {
    matcher: SimilarityMatcher,
    identity: Arc<dyn IdentityBackend>,
}

impl AttendanceService {
    /// Creates an attendance service.
    #[must_use]
    pub fn new(matcher: SimilarityMatcher, identity: Arc<dyn IdentityBackend>) -> Self {
        Self { matcher, identity }
    }

    /// Encodes `raw`, queries the scheme's index and applies the threshold.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for an empty template
    /// - [`Error::Encoding`] if the template is shorter than the dimension
    /// - [`Error::Store`] if the query fails
    /// - [`Error::NoMatch`] if nothing is within the threshold
    #[instrument(
        name = "fingerlink.identify",
        skip(self, raw, scheme),
        fields(component = "attendance", operation = "identify", scheme = %scheme.id)
    )]
    pub fn identify(&self, raw: &[u8], scheme: &'static Scheme) -> Result<Identification> {
        validate_template(raw)?;
        let vector = scheme.encode(raw)?;
        tracing::debug!(stage = "encoded", dimension = vector.len());

        match self.matcher.identify(&vector)? {
            Verdict::Match {
                template_id,
                distance,
            } => {
                tracing::debug!(stage = "decided", template_id = %template_id, distance, "Match");
                Ok(Identification {
                    template_id,
                    distance,
                    scheme: scheme.id,
                })
            },
            Verdict::NoMatch => {
                tracing::info!(stage = "decided", "No matching fingerprint");
                Err(Error::NoMatch { scheme: scheme.id })
            },
        }
    }

    /// Identifies the attendee from a fingerprint and records the event.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a blank device id or empty template
    /// - [`Error::Encoding`] if the template is shorter than the dimension
    /// - [`Error::Store`] if the index or identity lookup fails
    /// - [`Error::NoMatch`] if nothing is within the threshold
    /// - [`Error::IdentityResolution`] if the match has no link or profile
    /// - [`Error::Persistence`] if the event insert fails
    #[instrument(
        name = "fingerlink.attend",
        skip(self, raw, scheme),
        fields(
            component = "attendance",
            operation = "attend",
            scheme = %scheme.id,
            device_id = %device_id
        )
    )]
    pub fn attend(
        &self,
        device_id: &DeviceId,
        raw: &[u8],
        scheme: &'static Scheme,
    ) -> Result<AttendanceReceipt> {
        let result = (|| {
            tracing::debug!(stage = "captured", bytes = raw.len());
            validate_device(device_id)?;
            let hit = self.identify(raw, scheme)?;

            let Some(user_id) = self.identity.user_for_template(&hit.template_id)? else {
                tracing::warn!(
                    template_id = %hit.template_id,
                    distance = hit.distance,
                    orphan = true,
                    "Matched vector has no identity link"
                );
                record_orphans(scheme.id, "attendance", 1);
                return Err(Error::IdentityResolution(format!(
                    "template {} is not linked to any user",
                    hit.template_id
                )));
            };
            let participant = self.resolve_participant(&user_id)?;
            tracing::debug!(stage = "identity_resolved", user_id = %user_id);

            let event = AttendanceEvent::now(
                user_id,
                AttendanceKey::Template(hit.template_id),
                device_id.clone(),
            );
            self.persist(event, participant, Some(hit.distance))
        })();

        record_attendance(Some(scheme.id), outcome_label(&result));
        log_outcome(&result);
        result
    }

    /// Records attendance for the holder of a badge code. No vector matching
    /// is involved.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a blank device id or code
    /// - [`Error::Store`] if the identity lookup fails
    /// - [`Error::IdentityResolution`] if no participant holds the code
    /// - [`Error::Persistence`] if the event insert fails
    #[instrument(
        name = "fingerlink.attend_by_code",
        skip(self, code),
        fields(component = "attendance", operation = "attend_by_code", device_id = %device_id)
    )]
    pub fn attend_by_code(&self, device_id: &DeviceId, code: &str) -> Result<AttendanceReceipt> {
        let result = (|| {
            validate_device(device_id)?;
            let code = code.trim();
            if code.is_empty() {
                return Err(Error::Validation("code is required".to_string()));
            }

            let Some(participant) = self.identity.participant_by_code(code)? else {
                tracing::info!("Unknown attendance code");
                return Err(Error::IdentityResolution(
                    "no participant holds this code".to_string(),
                ));
            };
            tracing::debug!(stage = "identity_resolved", user_id = %participant.user_id);

            let event = AttendanceEvent::now(
                participant.user_id.clone(),
                AttendanceKey::QrCode(code.to_string()),
                device_id.clone(),
            );
            self.persist(event, participant, None)
        })();

        record_attendance(None, outcome_label(&result));
        log_outcome(&result);
        result
    }

    fn resolve_participant(&self, user_id: &crate::models::UserId) -> Result<Participant> {
        self.identity.participant(user_id)?.ok_or_else(|| {
            tracing::warn!(user_id = %user_id, "Linked user has no participant profile");
            Error::IdentityResolution(format!("user {user_id} has no participant profile"))
        })
    }

    fn persist(
        &self,
        mut event: AttendanceEvent,
        participant: Participant,
        distance: Option<f32>,
    ) -> Result<AttendanceReceipt> {
        let event_id = self.identity.insert_attendance(&event)?;
        event.event_id = Some(event_id);
        tracing::debug!(stage = "event_persisted", event_id);
        Ok(AttendanceReceipt {
            event,
            full_name: participant.full_name,
            distance,
        })
    }
}

fn validate_device(device_id: &DeviceId) -> Result<()> {
    if device_id.as_str().trim().is_empty() {
        return Err(Error::Validation("device_id is required".to_string()));
    }
    Ok(())
}

fn log_outcome(result: &Result<AttendanceReceipt>) {
    match result {
        Ok(receipt) => tracing::info!(
            user_id = %receipt.event.user_id,
            event_id = ?receipt.event.event_id,
            "Attendance recorded"
        ),
        Err(e @ (Error::NoMatch { .. } | Error::IdentityResolution(_))) => {
            tracing::info!(kind = e.kind(), error = %e, "Attendance not recorded");
        },
        Err(e) => tracing::warn!(kind = e.kind(), error = %e, "Attendance failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use crate::services::{EnrollmentService, TemplateStore};
    use crate::storage::vector::FaultyVectorBackend;
    use crate::storage::{MemoryVectorBackend, SqliteIdentityStore};
    use std::sync::atomic::Ordering;

    struct Fixture {
        store: TemplateStore,
        identity: Arc<SqliteIdentityStore>,
        enrollment: EnrollmentService,
        attendance: AttendanceService,
    }

    fn fixture() -> Fixture {
        let store = TemplateStore::new(Arc::new(MemoryVectorBackend::new()));
        let identity = Arc::new(SqliteIdentityStore::in_memory().unwrap());
        Fixture {
            enrollment: EnrollmentService::new(store.clone(), identity.clone()),
            attendance: AttendanceService::new(SimilarityMatcher::new(store.clone()), identity.clone()),
            store,
            identity,
        }
    }

    fn add_participant(identity: &SqliteIdentityStore, id: &str, name: &str, code: Option<&str>) {
        identity
            .upsert_participant(&Participant {
                user_id: UserId::new(id),
                full_name: name.to_string(),
                qr_code: code.map(str::to_string),
            })
            .unwrap();
    }

    #[test]
    fn test_attend_records_event_for_enrolled_user() {
        let fx = fixture();
        let scheme = SchemeId::Normalized16.scheme();
        add_participant(&fx.identity, "42", "Ayu Lestari", None);
        fx.enrollment
            .enroll(&UserId::new("42"), &[255u8; 16], scheme)
            .unwrap();

        let receipt = fx
            .attendance
            .attend(&DeviceId::new("gate-1"), &[255u8; 16], scheme)
            .unwrap();
        assert_eq!(receipt.full_name, "Ayu Lestari");
        assert_eq!(receipt.distance, Some(0.0));
        assert!(receipt.event.event_id.is_some());
        assert_eq!(
            receipt.event.template_id(),
            Some(&TemplateId::from_bytes(&[255u8; 16]))
        );
        assert_eq!(fx.identity.recent_attendance(10).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_index_is_no_match() {
        let fx = fixture();
        let err = fx
            .attendance
            .attend(&DeviceId::new("d"), &[1u8; 16], SchemeId::Normalized16.scheme())
            .unwrap_err();
        assert!(matches!(err, Error::NoMatch { scheme: SchemeId::Normalized16 }));
    }

    #[test]
    fn test_index_outage_is_store_error_and_writes_nothing() {
        let backend = Arc::new(FaultyVectorBackend::new());
        let store = TemplateStore::new(backend.clone());
        let identity = Arc::new(SqliteIdentityStore::in_memory().unwrap());
        let enrollment = EnrollmentService::new(store.clone(), identity.clone());
        let attendance = AttendanceService::new(SimilarityMatcher::new(store), identity.clone());
        let scheme = SchemeId::Normalized16.scheme();
        add_participant(&identity, "42", "Ayu Lestari", None);
        enrollment
            .enroll(&UserId::new("42"), &[255u8; 16], scheme)
            .unwrap();

        backend.fail_nearest.store(true, Ordering::SeqCst);
        let err = attendance
            .attend(&DeviceId::new("gate-1"), &[255u8; 16], scheme)
            .unwrap_err();
        assert!(matches!(err, Error::Store { .. }), "got {err:?}");
        assert_ne!(err.kind(), "no_match");
        assert!(identity.recent_attendance(10).unwrap().is_empty());

        let err = attendance.identify(&[255u8; 16], scheme).unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
    }

    #[test]
    fn test_orphan_vector_is_identity_resolution_error() {
        let fx = fixture();
        let scheme = SchemeId::Normalized16.scheme();
        let raw = [128u8; 16];
        fx.store
            .upsert(&TemplateId::from_bytes(&raw), &scheme.encode(&raw).unwrap())
            .unwrap();

        let err = fx
            .attendance
            .attend(&DeviceId::new("d"), &raw, scheme)
            .unwrap_err();
        assert!(matches!(err, Error::IdentityResolution(_)));
        assert!(fx.identity.recent_attendance(10).unwrap().is_empty());
    }

    #[test]
    fn test_link_without_profile_is_identity_resolution_error() {
        let fx = fixture();
        let scheme = SchemeId::Normalized16.scheme();
        fx.enrollment
            .enroll(&UserId::new("ghost"), &[3u8; 16], scheme)
            .unwrap();

        let err = fx
            .attendance
            .attend(&DeviceId::new("d"), &[3u8; 16], scheme)
            .unwrap_err();
        assert!(matches!(err, Error::IdentityResolution(ref m) if m.contains("ghost")));
    }

    #[test]
    fn test_blank_device_is_validation_error() {
        let fx = fixture();
        let err = fx
            .attendance
            .attend(&DeviceId::new(""), &[3u8; 16], SchemeId::Normalized16.scheme())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_attend_by_code() {
        let fx = fixture();
        add_participant(&fx.identity, "5", "Budi", Some("QR-5"));

        let receipt = fx
            .attendance
            .attend_by_code(&DeviceId::new("kiosk"), " QR-5 ")
            .unwrap();
        assert_eq!(receipt.full_name, "Budi");
        assert_eq!(receipt.event.key, AttendanceKey::QrCode("QR-5".to_string()));
        assert!(receipt.distance.is_none());
    }

    #[test]
    fn test_unknown_code_writes_nothing() {
        let fx = fixture();
        let err = fx
            .attendance
            .attend_by_code(&DeviceId::new("kiosk"), "nope")
            .unwrap_err();
        assert!(matches!(err, Error::IdentityResolution(_)));
        assert!(fx.identity.recent_attendance(10).unwrap().is_empty());
    }

    #[test]
    fn test_identify_reports_distance() {
        let fx = fixture();
        let scheme = SchemeId::Normalized16.scheme();
        let mut enrolled = [100u8; 16];
        fx.enrollment
            .enroll(&UserId::new("1"), &enrolled, scheme)
            .unwrap();

        enrolled[0] = 101;
        let hit = fx.attendance.identify(&enrolled, scheme).unwrap();
        assert_eq!(hit.template_id, TemplateId::from_bytes(&[100u8; 16]));
        assert!(hit.distance > 0.0 && hit.distance <= scheme.threshold);
    }
}

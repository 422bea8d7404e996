//! Identity store trait.

use crate::Result;
use crate::models::{AttendanceEvent, EnrollmentRecord, Participant, TemplateId, UserId};

/// Relational side of the system: participants, enrollment links and
/// attendance events.
///
/// Lookups that fail at the transport level return
/// [`Error::Store`](crate::Error::Store); inserts that fail return
/// [`Error::Persistence`](crate::Error::Persistence). A lookup that simply
/// finds nothing returns `Ok(None)`.
///
/// The workflows never wrap several calls in one transaction.
pub trait IdentityBackend: Send + Sync {
    /// Inserts or replaces a participant.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the QR code is already taken.
    fn upsert_participant(&self, participant: &Participant) -> Result<()>;

    /// Looks up a participant by user id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn participant(&self, user_id: &UserId) -> Result<Option<Participant>>;

    /// Looks up the participant holding a QR code.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn participant_by_code(&self, code: &str) -> Result<Option<Participant>>;

    /// Resolves a template to the user of its earliest enrollment link.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn user_for_template(&self, template_id: &TemplateId) -> Result<Option<UserId>>;

    /// Appends an enrollment link. Duplicate links are accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    fn insert_enrollment(&self, record: &EnrollmentRecord) -> Result<()>;

    /// Lists every enrollment link for a user, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn enrollments_for_user(&self, user_id: &UserId) -> Result<Vec<EnrollmentRecord>>;

    /// Appends an attendance event and returns its row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    fn insert_attendance(&self, event: &AttendanceEvent) -> Result<i64>;

    /// Lists the most recent attendance events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn recent_attendance(&self, limit: usize) -> Result<Vec<AttendanceEvent>>;
}

//! Data models for fingerlink.
//!
//! Schemes, template identifiers and vectors on the matching side; users,
//! devices and their records on the identity side.

mod identity;
mod scheme;
mod template;

pub use identity::{
    AttendanceEvent, AttendanceKey, DeviceCommand, DeviceId, DeviceMode, EnrollmentRecord,
    Participant, UserId,
};
pub use scheme::{DistanceMetric, Normalization, SCHEMES, Scheme, SchemeId};
pub use template::{EncodedVector, MatchResult, TemplateId, Verdict};

//! Identity-side records: users, devices, enrollment links and attendance.

use super::TemplateId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an ID without validation.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Creates an ID from caller input, rejecting blank values.
            ///
            /// # Errors
            ///
            /// Returns [`Error::Validation`] if the input is empty or whitespace.
            pub fn parse(id: &str) -> Result<Self> {
                let trimmed = id.trim();
                if trimmed.is_empty() {
                    return Err(Error::Validation(concat!($label, " is required").to_string()));
                }
                Ok(Self(trimmed.to_string()))
            }

            /// Returns the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(
    /// Identifier of an enrolled person.
    UserId,
    "user_id"
);

opaque_id!(
    /// Identifier of a capture terminal.
    DeviceId,
    "device_id"
);

/// A person known to the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable user identifier.
    pub user_id: UserId,
    /// Display name resolved during attendance.
    pub full_name: String,
    /// Opaque badge code for the QR attendance path.
    pub qr_code: Option<String>,
}

/// Link between a user and an enrolled template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentRecord {
    /// The enrolled user.
    pub user_id: UserId,
    /// The template the user enrolled.
    pub template_id: TemplateId,
    /// When the link was written.
    pub created_at: DateTime<Utc>,
}

/// What an attendance event was keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttendanceKey {
    /// A fingerprint match.
    Template(TemplateId),
    /// A scanned badge code.
    QrCode(String),
}

/// An append-only attendance fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceEvent {
    /// Who attended.
    pub user_id: UserId,
    /// How they were identified.
    pub key: AttendanceKey,
    /// Where.
    pub device_id: DeviceId,
    /// When.
    pub timestamp: DateTime<Utc>,
    /// Row id assigned by the identity store, once persisted.
    pub event_id: Option<i64>,
}

impl AttendanceEvent {
    /// Creates an unpersisted event stamped with the current time.
    #[must_use]
    pub fn now(user_id: UserId, key: AttendanceKey, device_id: DeviceId) -> Self {
        Self {
            user_id,
            key,
            device_id,
            timestamp: Utc::now(),
            event_id: None,
        }
    }

    /// Template id, for fingerprint-keyed events.
    #[must_use]
    pub const fn template_id(&self) -> Option<&TemplateId> {
        match &self.key {
            AttendanceKey::Template(id) => Some(id),
            AttendanceKey::QrCode(_) => None,
        }
    }
}

/// Device operating modes that can be requested remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Capture the next finger as a new enrollment for the given user.
    Enroll,
}

/// Command published to a single device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    /// User the device should act for.
    pub user_id: UserId,
    /// Target device.
    pub device_id: DeviceId,
    /// Requested mode.
    pub mode: DeviceMode,
}

#[derive(Serialize)]
struct DeviceCommandPayload<'a> {
    id_user: WireUserId<'a>,
    mode: DeviceMode,
}

/// Devices read `id_user` as an integer; other ids go out as strings.
#[derive(Serialize)]
#[serde(untagged)]
enum WireUserId<'a> {
    Number(i64),
    Text(&'a str),
}

impl<'a> From<&'a UserId> for WireUserId<'a> {
    fn from(user_id: &'a UserId) -> Self {
        let id = user_id.as_str();
        match id.parse::<i64>() {
            // Only canonical integers, so "007" and "+7" round-trip as text.
            Ok(n) if n.to_string() == id => Self::Number(n),
            _ => Self::Text(id),
        }
    }
}

impl DeviceCommand {
    /// Builds an enroll-mode command.
    #[must_use]
    pub const fn enroll(user_id: UserId, device_id: DeviceId) -> Self {
        Self {
            user_id,
            device_id,
            mode: DeviceMode::Enroll,
        }
    }

    /// Device-scoped topic under `prefix`.
    #[must_use]
    pub fn topic(&self, prefix: &str) -> String {
        format!("{}/{}", prefix.trim_end_matches('/'), self.device_id)
    }

    /// JSON payload the firmware expects: `{"id_user": 17, "mode": "enroll"}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if serialization fails.
    pub fn payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&DeviceCommandPayload {
            id_user: WireUserId::from(&self.user_id),
            mode: self.mode,
        })
        .map_err(|e| Error::operation("encode_device_command", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_blank_ids() {
        assert!(matches!(UserId::parse("  "), Err(Error::Validation(_))));
        let err = DeviceId::parse("").unwrap_err();
        assert_eq!(err.to_string(), "invalid input: device_id is required");
        assert_eq!(UserId::parse(" 42 ").unwrap().as_str(), "42");
    }

    #[test]
    fn test_device_command_wire_format() {
        let cmd = DeviceCommand::enroll(UserId::new("17"), DeviceId::new("gate-a"));
        assert_eq!(cmd.topic("fingerprint"), "fingerprint/gate-a");
        assert_eq!(cmd.topic("fingerprint/"), "fingerprint/gate-a");

        let payload: serde_json::Value = serde_json::from_slice(&cmd.payload().unwrap()).unwrap();
        assert_eq!(payload, serde_json::json!({"id_user": 17, "mode": "enroll"}));
        assert_eq!(
            String::from_utf8(cmd.payload().unwrap()).unwrap(),
            r#"{"id_user":17,"mode":"enroll"}"#
        );
    }

    #[test]
    fn test_device_command_keeps_non_integer_ids_as_text() {
        for id in ["nim-2231", "007", "+7", "99999999999999999999"] {
            let cmd = DeviceCommand::enroll(UserId::new(id), DeviceId::new("gate-a"));
            let payload: serde_json::Value =
                serde_json::from_slice(&cmd.payload().unwrap()).unwrap();
            assert_eq!(payload["id_user"], id, "id {id}");
        }

        let cmd = DeviceCommand::enroll(UserId::new("-3"), DeviceId::new("gate-a"));
        let payload: serde_json::Value = serde_json::from_slice(&cmd.payload().unwrap()).unwrap();
        assert_eq!(payload["id_user"], -3);
    }

    #[test]
    fn test_attendance_event_template_id() {
        let id = TemplateId::from_bytes(b"abc");
        let event = AttendanceEvent::now(
            UserId::new("1"),
            AttendanceKey::Template(id.clone()),
            DeviceId::new("d"),
        );
        assert_eq!(event.template_id(), Some(&id));
        assert!(event.event_id.is_none());

        let qr = AttendanceEvent::now(
            UserId::new("1"),
            AttendanceKey::QrCode("QR-1".to_string()),
            DeviceId::new("d"),
        );
        assert!(qr.template_id().is_none());
    }
}

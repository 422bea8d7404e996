//! `SQLite`-backed identity store.
//!
//! # Schema
//!
//! | Table | Columns | Notes |
//! |-------|---------|-------|
//! | `participants` | `user_id` PK, `full_name`, `qr_code` UNIQUE | display attributes |
//! | `user_fingers` | `id`, `user_id`, `template_id`, `created_at` | enrollment links; duplicates allowed |
//! | `attendance` | `id`, `user_id`, `template_id`, `qr_code`, `device_id`, `recorded_at` | append-only |
//!
//! Timestamps are stored as Unix microseconds.

use super::{acquire_lock, configure_connection, record_operation_metrics};
use crate::models::{
    AttendanceEvent, AttendanceKey, DeviceId, EnrollmentRecord, Participant, TemplateId, UserId,
};
use crate::storage::traits::IdentityBackend;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

const BACKEND: &str = "sqlite_identity";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS participants (
        user_id TEXT PRIMARY KEY,
        full_name TEXT NOT NULL,
        qr_code TEXT UNIQUE
    );
    CREATE TABLE IF NOT EXISTS user_fingers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        template_id TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_user_fingers_template ON user_fingers(template_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_user_fingers_user ON user_fingers(user_id);
    CREATE TABLE IF NOT EXISTS attendance (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        template_id TEXT,
        qr_code TEXT,
        device_id TEXT NOT NULL,
        recorded_at INTEGER NOT NULL,
        CHECK ((template_id IS NULL) <> (qr_code IS NULL))
    );
    CREATE INDEX IF NOT EXISTS idx_attendance_recorded ON attendance(recorded_at DESC);
";

/// Identity store on a single `SQLite` connection.
///
/// The connection sits behind a `Mutex` because `rusqlite::Connection` is
/// not `Sync`; WAL mode and `busy_timeout` absorb contention with other
/// processes.
pub struct SqliteIdentityStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteIdentityStore {
    /// Opens (and creates if needed) a file-backed store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::operation("create_sqlite_dir", e))?;
        }
        let conn = Connection::open(&db_path).map_err(|e| Error::operation("open_sqlite", e))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::operation("open_sqlite_in_memory", e))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        configure_connection(&conn)?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::operation("create_identity_schema", e))
    }

    fn timed<T>(operation: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let result = f();
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics(BACKEND, operation, start, status);
        result
    }

    fn to_micros(at: DateTime<Utc>) -> i64 {
        at.timestamp_micros()
    }

    fn from_micros(micros: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(micros).unwrap_or_default()
    }

    fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
        Ok(Participant {
            user_id: UserId::new(row.get::<_, String>(0)?),
            full_name: row.get(1)?,
            qr_code: row.get(2)?,
        })
    }

    fn attendance_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceEvent> {
        let template_id: Option<String> = row.get(2)?;
        let qr_code: Option<String> = row.get(3)?;
        let key = match (template_id, qr_code) {
            (Some(id), _) => AttendanceKey::Template(TemplateId::new(id)),
            (None, code) => AttendanceKey::QrCode(code.unwrap_or_default()),
        };
        Ok(AttendanceEvent {
            event_id: Some(row.get(0)?),
            user_id: UserId::new(row.get::<_, String>(1)?),
            key,
            device_id: DeviceId::new(row.get::<_, String>(4)?),
            timestamp: Self::from_micros(row.get(5)?),
        })
    }
}

impl IdentityBackend for SqliteIdentityStore {
    #[instrument(skip(self, participant), fields(backend = BACKEND, user_id = %participant.user_id))]
    fn upsert_participant(&self, participant: &Participant) -> Result<()> {
        Self::timed("upsert_participant", || {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT INTO participants (user_id, full_name, qr_code) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET full_name = excluded.full_name, qr_code = excluded.qr_code",
                params![
                    participant.user_id.as_str(),
                    participant.full_name,
                    participant.qr_code.as_deref()
                ],
            )
            .map(|_| ())
            .map_err(|e| Error::persistence("participant", e))
        })
    }

    fn participant(&self, user_id: &UserId) -> Result<Option<Participant>> {
        Self::timed("participant", || {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                "SELECT user_id, full_name, qr_code FROM participants WHERE user_id = ?1",
                params![user_id.as_str()],
                Self::participant_from_row,
            )
            .optional()
            .map_err(|e| Error::store("participant", e))
        })
    }

    fn participant_by_code(&self, code: &str) -> Result<Option<Participant>> {
        Self::timed("participant_by_code", || {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                "SELECT user_id, full_name, qr_code FROM participants WHERE qr_code = ?1",
                params![code],
                Self::participant_from_row,
            )
            .optional()
            .map_err(|e| Error::store("participant_by_code", e))
        })
    }

    fn user_for_template(&self, template_id: &TemplateId) -> Result<Option<UserId>> {
        Self::timed("user_for_template", || {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                "SELECT user_id FROM user_fingers WHERE template_id = ?1
                 ORDER BY created_at ASC, id ASC LIMIT 1",
                params![template_id.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map(|user| user.map(UserId::new))
            .map_err(|e| Error::store("user_for_template", e))
        })
    }

    #[instrument(skip(self, record), fields(backend = BACKEND, user_id = %record.user_id, template_id = %record.template_id))]
    fn insert_enrollment(&self, record: &EnrollmentRecord) -> Result<()> {
        Self::timed("insert_enrollment", || {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT INTO user_fingers (user_id, template_id, created_at) VALUES (?1, ?2, ?3)",
                params![
                    record.user_id.as_str(),
                    record.template_id.as_str(),
                    Self::to_micros(record.created_at)
                ],
            )
            .map(|_| ())
            .map_err(|e| Error::persistence("enrollment_link", e))
        })
    }

    fn enrollments_for_user(&self, user_id: &UserId) -> Result<Vec<EnrollmentRecord>> {
        Self::timed("enrollments_for_user", || {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare(
                    "SELECT user_id, template_id, created_at FROM user_fingers
                     WHERE user_id = ?1 ORDER BY created_at ASC, id ASC",
                )
                .map_err(|e| Error::store("enrollments_for_user", e))?;
            let rows = stmt
                .query_map(params![user_id.as_str()], |row| {
                    Ok(EnrollmentRecord {
                        user_id: UserId::new(row.get::<_, String>(0)?),
                        template_id: TemplateId::new(row.get::<_, String>(1)?),
                        created_at: Self::from_micros(row.get(2)?),
                    })
                })
                .map_err(|e| Error::store("enrollments_for_user", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::store("enrollments_for_user", e))
        })
    }

    #[instrument(skip(self, event), fields(backend = BACKEND, user_id = %event.user_id, device_id = %event.device_id))]
    fn insert_attendance(&self, event: &AttendanceEvent) -> Result<i64> {
        Self::timed("insert_attendance", || {
            let (template_id, qr_code) = match &event.key {
                AttendanceKey::Template(id) => (Some(id.as_str()), None),
                AttendanceKey::QrCode(code) => (None, Some(code.as_str())),
            };
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT INTO attendance (user_id, template_id, qr_code, device_id, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.user_id.as_str(),
                    template_id,
                    qr_code,
                    event.device_id.as_str(),
                    Self::to_micros(event.timestamp)
                ],
            )
            .map_err(|e| Error::persistence("attendance", e))?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn recent_attendance(&self, limit: usize) -> Result<Vec<AttendanceEvent>> {
        Self::timed("recent_attendance", || {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, template_id, qr_code, device_id, recorded_at
                     FROM attendance ORDER BY recorded_at DESC, id DESC LIMIT ?1",
                )
                .map_err(|e| Error::store("recent_attendance", e))?;
            let rows = stmt
                .query_map(params![limit], Self::attendance_from_row)
                .map_err(|e| Error::store("recent_attendance", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::store("recent_attendance", e))
        })
    }
}

//! SQLite-backed store for users, enrolled face descriptors and attendance.

use crate::models::{
    attendance_rate, Attendance, AttendanceEntry, DashboardStats, NewUser, User, UserSummary,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rollcall_core::{Embedding, EnrolledRecord};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("email or employee ID already exists")]
    Duplicate(String),
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error(
        "embedding has {actual} dimensions but enrolled faces have {expected}; \
         re-enroll everyone after changing the face model"
    )]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("corrupt embedding in descriptor {id}: {reason}")]
    CorruptEmbedding { id: String, reason: String },
    #[error("failed to create store directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    email        TEXT NOT NULL UNIQUE,
    employee_id  TEXT NOT NULL UNIQUE,
    department   TEXT NOT NULL DEFAULT '',
    role         TEXT NOT NULL DEFAULT 'student',
    is_active    INTEGER NOT NULL DEFAULT 1,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS face_descriptors (
    id             TEXT PRIMARY KEY,
    user_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    descriptor     TEXT NOT NULL,
    model_version  TEXT,
    image_url      TEXT NOT NULL DEFAULT '',
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id                TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    check_in_time     TEXT NOT NULL,
    check_out_time    TEXT,
    status            TEXT NOT NULL DEFAULT 'present',
    confidence_score  REAL NOT NULL DEFAULT 0,
    location          TEXT NOT NULL DEFAULT '',
    created_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_face_descriptors_user ON face_descriptors(user_id);
CREATE INDEX IF NOT EXISTS idx_attendance_check_in ON attendance(check_in_time);
"#;

const USER_COLUMNS: &str =
    "id, name, email, employee_id, department, role, is_active, created_at, updated_at";

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened attendance store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    pub fn insert_user(&self, user: &NewUser) -> Result<User> {
        insert_user(&self.conn, user, Utc::now())
    }

    /// Store an embedding for an existing user. Returns the descriptor ID.
    pub fn insert_embedding(&self, user_id: &str, embedding: &Embedding) -> Result<String> {
        insert_embedding(&self.conn, user_id, embedding, Utc::now())
    }

    /// Create a user together with their face embedding, atomically.
    pub fn register(&mut self, user: &NewUser, embedding: &Embedding) -> Result<User> {
        let now = Utc::now();
        let tx = self.conn.transaction()?;
        let created = insert_user(&tx, user, now)?;
        insert_embedding(&tx, &created.id, embedding, now)?;
        tx.commit()?;

        tracing::info!(
            user_id = %created.id,
            employee_id = %created.employee_id,
            dim = embedding.dim(),
            "user registered"
        );
        Ok(created)
    }

    /// Dimensionality shared by every enrolled embedding, `None` when empty.
    pub fn embedding_dim(&self) -> Result<Option<usize>> {
        enrolled_dim(&self.conn)
    }

    /// Snapshot of every enrolled embedding, in enrollment order.
    pub fn list_enrolled(&self) -> Result<Vec<EnrolledRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, descriptor, model_version FROM face_descriptors ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, user_id, descriptor, model_version) = row?;
            let values: Vec<f32> = serde_json::from_str(&descriptor).map_err(|e| {
                StoreError::CorruptEmbedding {
                    id: id.clone(),
                    reason: e.to_string(),
                }
            })?;
            records.push(EnrolledRecord {
                identity: user_id,
                embedding: Embedding {
                    values,
                    model_version,
                },
            });
        }

        tracing::debug!(count = records.len(), "loaded enrolled embeddings");
        Ok(records)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], user_from_row)
            .optional()?)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at, rowid");
        let mut stmt = self.conn.prepare(&sql)?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Delete a user along with their embeddings and attendance.
    pub fn remove_user(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        if removed > 0 {
            tracing::info!(user_id = id, "user removed");
        }
        Ok(removed > 0)
    }

    pub fn record_attendance(
        &self,
        user_id: &str,
        check_in_time: DateTime<Utc>,
        status: &str,
        confidence_score: f32,
        location: &str,
    ) -> Result<Attendance> {
        let record = Attendance {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            check_in_time,
            check_out_time: None,
            status: status.to_string(),
            confidence_score,
            location: location.to_string(),
            created_at: Utc::now(),
        };

        self.conn
            .execute(
                "INSERT INTO attendance
                    (id, user_id, check_in_time, check_out_time, status,
                     confidence_score, location, created_at)
                 VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.user_id,
                    ts_to_sql(&record.check_in_time),
                    record.status,
                    record.confidence_score as f64,
                    record.location,
                    ts_to_sql(&record.created_at),
                ],
            )
            .map_err(|e| map_constraint(e, user_id))?;

        tracing::info!(user_id, status, confidence_score, "attendance recorded");
        Ok(record)
    }

    /// Most recent check-ins first, joined with their users.
    pub fn recent_attendance(&self, limit: usize) -> Result<Vec<AttendanceEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.check_in_time, a.status, a.confidence_score,
                    u.name, u.employee_id, u.department
             FROM attendance a
             LEFT JOIN users u ON u.id = a.user_id
             ORDER BY a.check_in_time DESC, a.rowid DESC
             LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let entries = stmt
            .query_map(params![limit], |row| {
                let name: Option<String> = row.get(4)?;
                let user = match name {
                    Some(name) => Some(UserSummary {
                        name,
                        employee_id: row.get(5)?,
                        department: row.get(6)?,
                    }),
                    None => None,
                };
                Ok(AttendanceEntry {
                    id: row.get(0)?,
                    check_in_time: ts_from_sql(row, 1)?,
                    status: row.get(2)?,
                    confidence_score: row.get::<_, f64>(3)? as f32,
                    user,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn count_users(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn count_enrolled(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM face_descriptors", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Totals for the dashboard, counting check-ins at or after `since`.
    pub fn dashboard_stats(&self, since: DateTime<Utc>) -> Result<DashboardStats> {
        let total_users = self.count_users()?;
        let present: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT user_id) FROM attendance WHERE check_in_time >= ?1",
            params![ts_to_sql(&since)],
            |row| row.get(0),
        )?;
        let today_attendance = present as u64;

        Ok(DashboardStats {
            total_users,
            today_attendance,
            attendance_rate: attendance_rate(today_attendance, total_users),
        })
    }
}

fn insert_user(conn: &Connection, user: &NewUser, now: DateTime<Utc>) -> Result<User> {
    let created = User {
        id: uuid::Uuid::new_v4().to_string(),
        name: user.name.trim().to_string(),
        email: user.email.trim().to_string(),
        employee_id: user.employee_id.trim().to_string(),
        department: user.department.trim().to_string(),
        role: user.role.clone(),
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    conn.execute(
        &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
        params![
            created.id,
            created.name,
            created.email,
            created.employee_id,
            created.department,
            created.role,
            created.is_active,
            ts_to_sql(&created.created_at),
            ts_to_sql(&created.updated_at),
        ],
    )
    .map_err(|e| map_constraint(e, &created.employee_id))?;

    Ok(created)
}

fn insert_embedding(
    conn: &Connection,
    user_id: &str,
    embedding: &Embedding,
    now: DateTime<Utc>,
) -> Result<String> {
    if embedding.is_empty() {
        return Err(StoreError::InvalidEmbedding("empty descriptor".into()));
    }
    // JSON has no NaN/inf; serde_json would silently write `null`.
    if embedding.values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidEmbedding("non-finite value".into()));
    }
    if let Some(expected) = enrolled_dim(conn)? {
        if embedding.dim() != expected {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: embedding.dim(),
            });
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    let descriptor = serde_json::to_string(&embedding.values)
        .map_err(|e| StoreError::InvalidEmbedding(e.to_string()))?;

    conn.execute(
        "INSERT INTO face_descriptors (id, user_id, descriptor, model_version, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, user_id, descriptor, embedding.model_version, ts_to_sql(&now)],
    )
    .map_err(|e| map_constraint(e, user_id))?;

    tracing::debug!(user_id, descriptor_id = %id, "embedding stored");
    Ok(id)
}

/// Length of the oldest stored descriptor. Inserts keep every descriptor at
/// this length.
fn enrolled_dim(conn: &Connection) -> Result<Option<usize>> {
    let first = conn
        .query_row(
            "SELECT id, descriptor FROM face_descriptors ORDER BY rowid LIMIT 1",
            [],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    let Some((id, descriptor)) = first else {
        return Ok(None);
    };
    let values: Vec<f32> = serde_json::from_str(&descriptor).map_err(|e| {
        StoreError::CorruptEmbedding {
            id,
            reason: e.to_string(),
        }
    })?;
    Ok(Some(values.len()))
}

/// Translate SQLite constraint failures into domain errors.
fn map_constraint(err: rusqlite::Error, key: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = &err {
        if ffi_err.code == ErrorCode::ConstraintViolation {
            match ffi_err.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return StoreError::Duplicate(key.to_string())
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return StoreError::UnknownUser(key.to_string())
                }
                _ => {}
            }
        }
    }
    StoreError::Sqlite(err)
}

fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_from_sql(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        employee_id: row.get(3)?,
        department: row.get(4)?,
        role: row.get(5)?,
        is_active: row.get(6)?,
        created_at: ts_from_sql(row, 7)?,
        updated_at: ts_from_sql(row, 8)?,
    })
}

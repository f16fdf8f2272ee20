//! Committed attendance sessions.
//!
//! A commit copies the live roster into `committed_sessions` and
//! `committed_attendance` in one transaction. The in-memory session is not
//! touched.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::DatabaseError;
use crate::session::SessionSnapshot;

/// Attendance status recorded for every recognized student.
pub const STATUS_PRESENT: &str = "present";

/// A committed session summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedSession {
    /// Unique identifier (UUID).
    pub id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub subject_code: String,
    /// When the session was committed (RFC 3339).
    pub committed_at: String,
    pub student_count: usize,
}

/// One student in a committed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedEntry {
    pub student_id: String,
    pub name: String,
    pub roll_number: String,
    /// First recognition time (RFC 3339).
    pub recognized_at: String,
    pub status: String,
}

// =============================================================================
// Database Functions
// =============================================================================

/// Persists the roster of `snapshot` as a new committed session.
///
/// Refused when no subject is selected or the roster is empty.
pub fn commit_session(
    conn: &mut Connection,
    snapshot: &SessionSnapshot,
) -> Result<CommittedSession, DatabaseError> {
    let subject = snapshot
        .subject
        .as_ref()
        .ok_or_else(|| DatabaseError::NothingToCommit("no subject selected".to_string()))?;
    if snapshot.roster.is_empty() {
        return Err(DatabaseError::NothingToCommit(
            "no students recognized".to_string(),
        ));
    }

    let session = CommittedSession {
        id: Uuid::new_v4().to_string(),
        subject_id: subject.id.clone(),
        subject_name: subject.name.clone(),
        subject_code: subject.code.clone(),
        committed_at: Utc::now().to_rfc3339(),
        student_count: snapshot.roster.len(),
    };

    let tx = conn.transaction()?;
    tx.execute(
        r#"
        INSERT INTO committed_sessions (
            id, subject_id, subject_name, subject_code, committed_at, student_count
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            session.id,
            session.subject_id,
            session.subject_name,
            session.subject_code,
            session.committed_at,
            session.student_count as i64,
        ],
    )?;

    {
        let mut insert = tx.prepare(
            r#"
            INSERT INTO committed_attendance (
                session_id, student_id, name, roll_number, recognized_at, status
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )?;
        for student in &snapshot.roster {
            insert.execute(params![
                session.id,
                student.id,
                student.name,
                student.roll_number,
                student.recognized_at.to_rfc3339(),
                STATUS_PRESENT,
            ])?;
        }
    }
    tx.commit()?;

    tracing::info!(
        "Committed session {} for {} with {} student(s)",
        session.id,
        session.subject_code,
        session.student_count
    );
    Ok(session)
}

/// Column list for session SELECT queries.
const SESSION_COLUMNS: &str =
    "id, subject_id, subject_name, subject_code, committed_at, student_count";

/// Map a database row to a CommittedSession struct.
fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<CommittedSession> {
    Ok(CommittedSession {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        subject_name: row.get(2)?,
        subject_code: row.get(3)?,
        committed_at: row.get(4)?,
        student_count: row.get::<_, i64>(5)? as usize,
    })
}

/// Retrieves a committed session by its ID.
pub fn get_committed_session(
    conn: &Connection,
    id: &str,
) -> Result<Option<CommittedSession>, DatabaseError> {
    let result = conn.query_row(
        &format!(
            "SELECT {} FROM committed_sessions WHERE id = ?1",
            SESSION_COLUMNS
        ),
        params![id],
        row_to_session,
    );

    match result {
        Ok(session) => Ok(Some(session)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Lists committed sessions, newest first.
pub fn list_committed_sessions(
    conn: &Connection,
    limit: Option<u32>,
) -> Result<Vec<CommittedSession>, DatabaseError> {
    let limit = limit.map(i64::from).unwrap_or(-1);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM committed_sessions ORDER BY committed_at DESC, rowid DESC LIMIT ?1",
        SESSION_COLUMNS
    ))?;

    let sessions = stmt
        .query_map(params![limit], row_to_session)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(sessions)
}

/// Lists the students of a committed session in recognition order.
pub fn get_committed_entries(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<CommittedEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT student_id, name, roll_number, recognized_at, status
        FROM committed_attendance
        WHERE session_id = ?1
        ORDER BY recognized_at ASC, rowid ASC
        "#,
    )?;

    let entries = stmt
        .query_map(params![session_id], |row| {
            Ok(CommittedEntry {
                student_id: row.get(0)?,
                name: row.get(1)?,
                roll_number: row.get(2)?,
                recognized_at: row.get(3)?,
                status: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Deletes a committed session and its entries.
///
/// Returns `true` if the session existed.
pub fn delete_committed_session(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let rows_affected = conn.execute(
        "DELETE FROM committed_sessions WHERE id = ?1",
        params![id],
    )?;

    if rows_affected > 0 {
        tracing::debug!("Deleted committed session: {}", id);
    }
    Ok(rows_affected > 0)
}

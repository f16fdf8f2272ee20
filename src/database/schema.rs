//! Database schema definitions.
//!
//! Contains SQL statements for creating and managing database tables.

/// SQL statement to create the migrations tracking table.
pub const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQL statement to create the committed sessions table.
pub const CREATE_COMMITTED_SESSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS committed_sessions (
    id TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL,
    subject_name TEXT NOT NULL,
    subject_code TEXT NOT NULL,
    committed_at TEXT NOT NULL,
    student_count INTEGER NOT NULL
);
"#;

/// Index for newest-first history listings.
pub const CREATE_COMMITTED_SESSIONS_COMMITTED_AT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_committed_sessions_committed_at ON committed_sessions(committed_at);
"#;

/// SQL statement to create the per-student attendance table.
pub const CREATE_COMMITTED_ATTENDANCE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS committed_attendance (
    session_id TEXT NOT NULL REFERENCES committed_sessions(id) ON DELETE CASCADE,
    student_id TEXT NOT NULL,
    name TEXT NOT NULL,
    roll_number TEXT NOT NULL,
    recognized_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'present',
    PRIMARY KEY (session_id, student_id)
);
"#;

/// Index for per-student lookups across sessions.
pub const CREATE_COMMITTED_ATTENDANCE_STUDENT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_committed_attendance_student_id ON committed_attendance(student_id);
"#;

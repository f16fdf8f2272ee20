//! Schema migrations for the attendance database.
//!
//! Applied versions are recorded in the `migrations` table.

use rusqlite::Connection;

use crate::database::schema::{
    CREATE_COMMITTED_ATTENDANCE_STUDENT_INDEX, CREATE_COMMITTED_ATTENDANCE_TABLE,
    CREATE_COMMITTED_SESSIONS_COMMITTED_AT_INDEX, CREATE_COMMITTED_SESSIONS_TABLE,
    CREATE_MIGRATIONS_TABLE,
};
use crate::database::DatabaseError;

/// One schema step; `statements` run inside a single transaction
struct Migration {
    version: i32,
    name: &'static str,
    statements: &'static [&'static str],
}

/// Schema history, oldest first
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_committed_sessions_table",
        statements: &[
            CREATE_COMMITTED_SESSIONS_TABLE,
            CREATE_COMMITTED_SESSIONS_COMMITTED_AT_INDEX,
        ],
    },
    Migration {
        version: 2,
        name: "create_committed_attendance_table",
        statements: &[
            CREATE_COMMITTED_ATTENDANCE_TABLE,
            CREATE_COMMITTED_ATTENDANCE_STUDENT_INDEX,
        ],
    },
];

/// Highest applied migration, 0 for a fresh database
pub fn schema_version(conn: &Connection) -> Result<i32, DatabaseError> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn apply(conn: &mut Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;
    for statement in migration.statements {
        tx.execute_batch(statement).map_err(|e| {
            DatabaseError::Migration(format!("{} (v{}): {}", migration.name, migration.version, e))
        })?;
    }
    tx.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        (migration.version, migration.name),
    )?;
    tx.commit()?;
    Ok(())
}

/// Bring the schema up to the newest version
///
/// Each step commits on its own, so a failure leaves the database at the
/// last good version.
pub fn run_migrations(conn: &mut Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(CREATE_MIGRATIONS_TABLE)?;

    let from = schema_version(conn)?;
    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
        apply(conn, migration)?;
        tracing::debug!("Applied schema v{} ({})", migration.version, migration.name);
        applied += 1;
    }

    if applied > 0 {
        tracing::info!(
            "Attendance schema upgraded from v{} to v{}",
            from,
            schema_version(conn)?
        );
    } else {
        tracing::debug!("Attendance schema at v{}", from);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();

        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        let table_exists: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='committed_attendance'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(table_exists, 1);
    }

    #[test]
    fn test_fresh_database_reaches_latest_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_MIGRATIONS_TABLE).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);

        run_migrations(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_partial_schema_is_upgraded() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_MIGRATIONS_TABLE).unwrap();
        apply(&mut conn, &MIGRATIONS[0]).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 1);

        run_migrations(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 2);
        let applied: i32 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 2);
    }

    #[test]
    fn test_attendance_cascades_on_session_delete() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&mut conn).unwrap();

        conn.execute(
            r#"
            INSERT INTO committed_sessions (
                id, subject_id, subject_name, subject_code, committed_at, student_count
            )
            VALUES ('s-1', '7', 'Physics', 'PHY1', '2025-01-15T10:30:00Z', 1)
            "#,
            [],
        )
        .unwrap();
        conn.execute(
            r#"
            INSERT INTO committed_attendance (
                session_id, student_id, name, roll_number, recognized_at
            )
            VALUES ('s-1', '42', 'Ana', 'R42', '2025-01-15T10:29:00Z')
            "#,
            [],
        )
        .unwrap();

        // Status defaults to present
        let status: String = conn
            .query_row(
                "SELECT status FROM committed_attendance WHERE student_id = '42'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "present");

        conn.execute("DELETE FROM committed_sessions WHERE id = 's-1'", [])
            .unwrap();
        let remaining: i32 = conn
            .query_row("SELECT COUNT(*) FROM committed_attendance", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(remaining, 0);
    }
}

//! Database migrations using a versioned migration pattern.
//!
//! Each migration runs exactly once and is tracked in the `schema_migrations` table.
//! Migrations are applied in order by version number.

use rusqlite::{params, Connection};

/// A database migration with a version number, name, and SQL to execute.
pub struct Migration {
    /// Unique version number (migrations run in order)
    pub version: i64,
    /// Human-readable name for the migration
    pub name: &'static str,
    /// SQL to execute (can be multiple statements)
    pub sql: &'static str,
}

/// All migrations in order. New migrations should be added at the end.
pub const MIGRATIONS: &[Migration] = &[
    // ============================================================
    // Initial schema (v1-v2)
    // ============================================================
    Migration {
        version: 1,
        name: "create_session_summaries_table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS session_summaries (
                session_id TEXT PRIMARY KEY,
                file TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                total_lines INTEGER NOT NULL DEFAULT 0,
                successes INTEGER NOT NULL DEFAULT 0,
                errors INTEGER NOT NULL DEFAULT 0,
                crashes INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "create_line_reports_table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS line_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                file TEXT NOT NULL,
                line_number INTEGER NOT NULL,
                code TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                variables TEXT NOT NULL DEFAULT '{}',
                stack_depth INTEGER NOT NULL,
                thread_id INTEGER NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('success','error','warning')),
                error_type TEXT,
                error_message TEXT,
                observations TEXT,
                FOREIGN KEY (session_id) REFERENCES session_summaries(session_id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_line_reports_session ON line_reports(session_id);
            CREATE INDEX IF NOT EXISTS idx_line_reports_file_line ON line_reports(file, line_number);
        "#,
    },
    // ============================================================
    // Incremental migrations (v3+)
    // ============================================================
    Migration {
        version: 3,
        name: "add_line_reports_variables_delta",
        sql: "ALTER TABLE line_reports ADD COLUMN variables_delta TEXT NOT NULL DEFAULT '{}';",
    },
    Migration {
        version: 4,
        name: "add_session_summaries_provenance",
        sql: r#"
            ALTER TABLE session_summaries ADD COLUMN repo_root TEXT;
            ALTER TABLE session_summaries ADD COLUMN commit_hash TEXT;
            ALTER TABLE session_summaries ADD COLUMN dirty_flag INTEGER NOT NULL DEFAULT 0;
        "#,
    },
    Migration {
        version: 5,
        name: "create_file_snapshots_table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS file_snapshots (
                session_id TEXT NOT NULL,
                file TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(session_id, file),
                FOREIGN KEY (session_id) REFERENCES session_summaries(session_id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 6,
        name: "add_line_reports_stack_trace",
        sql: "ALTER TABLE line_reports ADD COLUMN stack_trace TEXT;",
    },
    Migration {
        version: 7,
        name: "create_line_reports_status_index",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_line_reports_session_status
                ON line_reports(session_id, status, id);
            CREATE INDEX IF NOT EXISTS idx_session_summaries_updated
                ON session_summaries(updated_at);
        "#,
    },
];

/// Create the migrations tracking table if it doesn't exist.
fn ensure_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Get the set of already-applied migration versions.
fn get_applied_versions(conn: &Connection) -> rusqlite::Result<std::collections::HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<std::collections::HashSet<i64>>>()?;
    Ok(versions)
}

/// Check if a column exists in a table.
fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )
}

/// Check if a table exists.
fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )
}

/// Check if an index exists.
fn index_exists(conn: &Connection, index: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name=?1",
        [index],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )
}

/// Bootstrap trace databases written before the migration table existed.
///
/// Early recorders created `line_reports` directly and added columns ad hoc.
/// Whatever schema is already present is marked as applied without re-running it.
fn bootstrap_existing_database(conn: &Connection) -> rusqlite::Result<()> {
    if !get_applied_versions(conn)?.is_empty() {
        return Ok(());
    }
    if !table_exists(conn, "line_reports")? {
        return Ok(()); // Fresh database, nothing to bootstrap
    }

    tracing::info!("Bootstrapping existing trace database into migration system");

    let now = chrono::Utc::now().to_rfc3339();
    let mut to_mark: Vec<&Migration> = Vec::new();
    for migration in MIGRATIONS {
        let already_applied = match migration.version {
            1 => table_exists(conn, "session_summaries")?,
            2 => table_exists(conn, "line_reports")?,
            3 => column_exists(conn, "line_reports", "variables_delta")?,
            4 => column_exists(conn, "session_summaries", "dirty_flag")?,
            5 => table_exists(conn, "file_snapshots")?,
            6 => column_exists(conn, "line_reports", "stack_trace")?,
            7 => index_exists(conn, "idx_line_reports_session_status")?,
            _ => false,
        };

        if already_applied {
            to_mark.push(migration);
        }
    }

    let tx = conn.unchecked_transaction()?;
    for migration in to_mark {
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now],
        )?;
    }
    tx.commit()
}

/// Run all pending migrations.
///
/// This is the main entry point for the migration system.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(conn)?;
    bootstrap_existing_database(conn)?;

    let applied = get_applied_versions(conn)?;

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );

        // Execute the migration SQL and record it within a single transaction for atomicity
        let now = chrono::Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        let result = tx.execute_batch(migration.sql).and_then(|_| {
            tx.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.name, now],
            )
        });
        if let Err(e) = result.and_then(|_| tx.commit()) {
            tracing::error!(
                version = migration.version,
                name = migration.name,
                error = %e,
                "Migration failed"
            );
            return Err(e);
        }

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Migration applied successfully"
        );
    }

    Ok(())
}

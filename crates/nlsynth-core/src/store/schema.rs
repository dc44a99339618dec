//! SQLite schema DDL and migration framework for the corpus store.

use rusqlite::Connection;

use crate::errors::SynthResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 2;

/// Core DDL statements, safe to replay on an initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables ──────────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS corpus_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS specifications (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        parameters_json TEXT NOT NULL,
        arity INTEGER NOT NULL,
        return_type TEXT NOT NULL,
        signature_key TEXT NOT NULL,
        description TEXT NOT NULL,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS corpus_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        spec_id TEXT NOT NULL REFERENCES specifications(id),
        implementation TEXT NOT NULL,
        origin TEXT NOT NULL,
        outcome_score REAL NOT NULL DEFAULT 0.0,
        usage_count INTEGER NOT NULL DEFAULT 1,
        last_used_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        checksum INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS synthesis_runs (
        run_id TEXT PRIMARY KEY,
        spec_id TEXT NOT NULL REFERENCES specifications(id),
        entry_id INTEGER NOT NULL REFERENCES corpus_entries(id),
        origin TEXT NOT NULL,
        confidence REAL NOT NULL,
        artifact_location TEXT,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS feedback (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL REFERENCES synthesis_runs(run_id),
        outcome_score REAL NOT NULL,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    // ── indexes ─────────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_specs_arity ON specifications(arity);",
    "CREATE INDEX IF NOT EXISTS idx_entries_spec ON corpus_entries(spec_id, outcome_score DESC, last_used_at DESC);",
    "CREATE INDEX IF NOT EXISTS idx_runs_spec ON synthesis_runs(spec_id);",
];

/// Run all pending migrations, one savepoint per step.
pub fn migrate_schema(conn: &Connection) -> SynthResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT nlsynth_migrate_step;")?;

        let step_result = (|| -> SynthResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                2 => migrate_to_v2(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT nlsynth_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT nlsynth_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT nlsynth_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `corpus_meta`; 0 when absent.
pub fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM corpus_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SynthResult<()> {
    conn.execute(
        "INSERT INTO corpus_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> SynthResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> SynthResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// v1: baseline tables from `SCHEMA_STATEMENTS`.
fn migrate_to_v1(conn: &Connection) -> SynthResult<()> {
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    Ok(())
}

/// v2: feedback lookups by run, and the per-spec signature key for
/// databases created before it existed.
fn migrate_to_v2(conn: &Connection) -> SynthResult<()> {
    if !column_exists(conn, "specifications", "signature_key")? {
        conn.execute_batch(
            "ALTER TABLE specifications ADD COLUMN signature_key TEXT NOT NULL DEFAULT '';",
        )?;
    }
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_feedback_run ON feedback(run_id);
         CREATE INDEX IF NOT EXISTS idx_specs_signature ON specifications(signature_key);",
    )?;
    Ok(())
}

//! SQLite corpus store.
//!
//! Each public method opens its own connection, so the store is `Sync` and
//! can be shared across request threads without a connection pool. WAL mode
//! plus a busy timeout lets readers proceed while a writer holds the lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use crate::errors::{SynthError, SynthResult};
use crate::models::{
    format_ts, parse_ts, CorpusEntry, FeedbackRecord, FeedbackSample, NewCorpusEntry, Origin,
    Parameter, RunRecord, SimilarEntry, Specification, TypeHint,
};
use crate::store::{rank_similar, schema, CorpusStore};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helper: tilde expansion and path resolution
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw == "~" || raw.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if raw.len() > 2 {
                expanded.push(&raw[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

/// Expand `~`, make the path absolute, and create its parent directory.
pub(crate) fn resolve_path(path: &Path) -> SynthResult<PathBuf> {
    let expanded = expand_tilde(path);
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(&expanded)
    };
    if let Some(parent) = resolved.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(SynthError::Store(message)),
    )
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| conversion_error(idx, format!("bad timestamp: {raw}")))
}

fn origin_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Origin> {
    let raw: String = row.get(idx)?;
    raw.parse::<Origin>().map_err(|e| conversion_error(idx, e))
}

const SPEC_COLUMNS: &str = "id, name, parameters_json, return_type, description, created_at";

fn row_to_spec(row: &Row<'_>, offset: usize) -> rusqlite::Result<Specification> {
    let params_json: String = row.get(offset + 2)?;
    let parameters: Vec<Parameter> = serde_json::from_str(&params_json)
        .map_err(|e| conversion_error(offset + 2, e.to_string()))?;
    let return_raw: String = row.get(offset + 3)?;
    let return_type = return_raw
        .parse::<TypeHint>()
        .map_err(|e| conversion_error(offset + 3, e))?;
    Ok(Specification {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        parameters,
        return_type,
        description: row.get(offset + 4)?,
        created_at: ts_column(row, offset + 5)?,
    })
}

const ENTRY_COLUMNS: &str = "id, spec_id, implementation, origin, outcome_score, usage_count, \
                             last_used_at, created_at, checksum";

fn row_to_entry(row: &Row<'_>, offset: usize) -> rusqlite::Result<CorpusEntry> {
    let checksum: i64 = row.get(offset + 8)?;
    Ok(CorpusEntry {
        id: row.get(offset)?,
        spec_id: row.get(offset + 1)?,
        implementation: row.get(offset + 2)?,
        origin: origin_column(row, offset + 3)?,
        outcome_score: row.get(offset + 4)?,
        usage_count: row.get(offset + 5)?,
        last_used_at: ts_column(row, offset + 6)?,
        created_at: ts_column(row, offset + 7)?,
        checksum: checksum as u32,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        run_id: row.get(0)?,
        spec_id: row.get(1)?,
        entry_id: row.get(2)?,
        origin: origin_column(row, 3)?,
        confidence: row.get(4)?,
        artifact_location: row.get(5)?,
        created_at: ts_column(row, 6)?,
    })
}

/// Prefix each column of a comma-separated list with a table alias.
fn qualified(columns: &str, alias: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// SqliteCorpusStore
// ---------------------------------------------------------------------------

/// SQLite-backed corpus store.
#[derive(Clone, Debug)]
pub struct SqliteCorpusStore {
    db_path: PathBuf,
}

impl SqliteCorpusStore {
    /// Resolve the path, create parent directories, and initialise the
    /// schema.
    pub fn open(db_path: impl AsRef<Path>) -> SynthResult<Self> {
        let store = Self {
            db_path: resolve_path(db_path.as_ref())?,
        };
        store.init_schema()?;
        debug!(path = %store.db_path.display(), "corpus store opened");
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> SynthResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Set WAL mode, create tables and indexes, then run pending migrations.
    pub fn init_schema(&self) -> SynthResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    /// Copy the database to `destination` with the SQLite backup API.
    pub fn backup_to(&self, destination: impl AsRef<Path>) -> SynthResult<PathBuf> {
        let resolved = resolve_path(destination.as_ref())?;
        let src_conn = self.connect()?;
        let mut dst_conn = Connection::open(&resolved)?;
        let backup = rusqlite::backup::Backup::new(&src_conn, &mut dst_conn)?;
        backup.run_to_completion(100, Duration::from_millis(10), None)?;
        info!(destination = %resolved.display(), "corpus backup written");
        Ok(resolved)
    }

    /// Replace the database contents with a backup file.
    pub fn restore_from(&self, source: impl AsRef<Path>) -> SynthResult<()> {
        let resolved = expand_tilde(source.as_ref());
        if !resolved.exists() {
            return Err(SynthError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Backup file does not exist: {}", resolved.display()),
            )));
        }
        let src_conn = Connection::open(&resolved)?;
        let mut dst_conn = self.connect()?;
        let backup = rusqlite::backup::Backup::new(&src_conn, &mut dst_conn)?;
        backup.run_to_completion(100, Duration::from_millis(10), None)?;
        info!(source = %resolved.display(), "corpus restored from backup");
        Ok(())
    }

    fn current_entry(conn: &Connection, spec_id: &str) -> SynthResult<Option<CorpusEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM corpus_entries WHERE spec_id = ?1 \
             ORDER BY outcome_score DESC, last_used_at DESC, id DESC LIMIT 1;"
        );
        Ok(conn
            .query_row(&sql, params![spec_id], |row| row_to_entry(row, 0))
            .optional()?)
    }
}

impl CorpusStore for SqliteCorpusStore {
    fn put_specification(&self, spec: &Specification) -> SynthResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR IGNORE INTO specifications(
                id, name, parameters_json, arity, return_type, signature_key, description, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                spec.id,
                spec.name,
                serde_json::to_string(&spec.parameters)?,
                spec.arity() as i64,
                spec.return_type.as_str(),
                spec.signature_key(),
                spec.description,
                format_ts(&spec.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_specification(&self, spec_id: &str) -> SynthResult<Option<Specification>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {SPEC_COLUMNS} FROM specifications WHERE id = ?1;");
        Ok(conn
            .query_row(&sql, params![spec_id], |row| row_to_spec(row, 0))
            .optional()?)
    }

    fn get(&self, spec_id: &str) -> SynthResult<Option<CorpusEntry>> {
        let conn = self.connect()?;
        Self::current_entry(&conn, spec_id)
    }

    fn entries_for(&self, spec_id: &str) -> SynthResult<Vec<CorpusEntry>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM corpus_entries WHERE spec_id = ?1 \
             ORDER BY outcome_score DESC, last_used_at DESC, id DESC;"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![spec_id], |row| row_to_entry(row, 0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn put(&self, entry: NewCorpusEntry) -> SynthResult<CorpusEntry> {
        let conn = self.connect()?;
        let draft = entry.into_entry(0);
        conn.execute(
            "INSERT INTO corpus_entries(
                spec_id, implementation, origin, outcome_score, usage_count,
                last_used_at, created_at, checksum
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                draft.spec_id,
                draft.implementation,
                draft.origin.as_str(),
                draft.outcome_score,
                draft.usage_count,
                format_ts(&draft.last_used_at),
                format_ts(&draft.created_at),
                draft.checksum as i64,
            ],
        )?;
        Ok(CorpusEntry {
            id: conn.last_insert_rowid(),
            ..draft
        })
    }

    fn touch(&self, entry_id: i64, at: DateTime<Utc>) -> SynthResult<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE corpus_entries SET usage_count = usage_count + 1, last_used_at = ?2 \
             WHERE id = ?1;",
            params![entry_id, format_ts(&at)],
        )?;
        if changed == 0 {
            return Err(SynthError::Store(format!("no corpus entry with id {entry_id}")));
        }
        Ok(())
    }

    fn set_outcome_score(&self, entry_id: i64, score: f64) -> SynthResult<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE corpus_entries SET outcome_score = ?2 WHERE id = ?1;",
            params![entry_id, score.clamp(0.0, 1.0)],
        )?;
        if changed == 0 {
            return Err(SynthError::Store(format!("no corpus entry with id {entry_id}")));
        }
        Ok(())
    }

    fn find_similar(
        &self,
        spec: &Specification,
        min_similarity: f64,
        limit: usize,
    ) -> SynthResult<Vec<SimilarEntry>> {
        let conn = self.connect()?;
        // One row per spec: its current entry, dropped when that is a fallback.
        let sql = format!(
            "SELECT {}, {} FROM ( \
                 SELECT *, ROW_NUMBER() OVER ( \
                     PARTITION BY spec_id \
                     ORDER BY outcome_score DESC, last_used_at DESC, id DESC \
                 ) AS row_rank FROM corpus_entries \
             ) e \
             JOIN specifications s ON s.id = e.spec_id \
             WHERE e.row_rank = 1 AND e.origin != ?1 AND s.arity = ?2 AND s.id != ?3;",
            qualified(ENTRY_COLUMNS, "e"),
            qualified(SPEC_COLUMNS, "s"),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![Origin::Fallback.as_str(), spec.arity() as i64, spec.id],
            |row| Ok((row_to_spec(row, 9)?, row_to_entry(row, 0)?)),
        )?;

        let mut candidates: Vec<(Specification, CorpusEntry)> = Vec::new();
        for row in rows {
            candidates.push(row?);
        }
        Ok(rank_similar(spec, candidates, min_similarity, limit))
    }

    fn find_by_signature(&self, signature_key: &str, limit: usize) -> SynthResult<Vec<CorpusEntry>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {} FROM corpus_entries e \
             JOIN specifications s ON s.id = e.spec_id \
             WHERE s.signature_key = ?1 \
             ORDER BY e.outcome_score DESC, e.last_used_at DESC, e.id DESC LIMIT ?2;",
            qualified(ENTRY_COLUMNS, "e"),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![signature_key, limit as i64], |row| {
            row_to_entry(row, 0)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn list_entries(&self, limit: usize) -> SynthResult<Vec<CorpusEntry>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM corpus_entries \
             ORDER BY outcome_score DESC, last_used_at DESC, id ASC LIMIT ?1;"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], |row| row_to_entry(row, 0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn list_specifications(&self) -> SynthResult<Vec<Specification>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {SPEC_COLUMNS} FROM specifications ORDER BY created_at, id;");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row_to_spec(row, 0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn entry_count(&self) -> SynthResult<usize> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM corpus_entries;", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    fn restore_entry(&self, entry: &CorpusEntry) -> SynthResult<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO corpus_entries(
                id, spec_id, implementation, origin, outcome_score, usage_count,
                last_used_at, created_at, checksum
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                entry.id,
                entry.spec_id,
                entry.implementation,
                entry.origin.as_str(),
                entry.outcome_score,
                entry.usage_count,
                format_ts(&entry.last_used_at),
                format_ts(&entry.created_at),
                entry.checksum as i64,
            ],
        )?;
        Ok(changed > 0)
    }

    fn record_run(&self, run: &RunRecord) -> SynthResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO synthesis_runs(
                run_id, spec_id, entry_id, origin, confidence, artifact_location, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                run.run_id,
                run.spec_id,
                run.entry_id,
                run.origin.as_str(),
                run.confidence,
                run.artifact_location,
                format_ts(&run.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> SynthResult<Option<RunRecord>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                "SELECT run_id, spec_id, entry_id, origin, confidence, artifact_location, created_at \
                 FROM synthesis_runs WHERE run_id = ?1;",
                params![run_id],
                row_to_run,
            )
            .optional()?)
    }

    fn record_feedback(
        &self,
        run_id: &str,
        outcome_score: f64,
        at: DateTime<Utc>,
    ) -> SynthResult<FeedbackRecord> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO feedback(run_id, outcome_score, created_at) VALUES (?1, ?2, ?3);",
            params![run_id, outcome_score, format_ts(&at)],
        )?;
        Ok(FeedbackRecord {
            seq: conn.last_insert_rowid(),
            run_id: run_id.to_string(),
            outcome_score,
            created_at: at,
        })
    }

    fn feedback_since(&self, after_seq: i64, limit: usize) -> SynthResult<Vec<FeedbackSample>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT f.seq, f.run_id, r.origin, f.outcome_score \
             FROM feedback f JOIN synthesis_runs r ON r.run_id = f.run_id \
             WHERE f.seq > ?1 ORDER BY f.seq DESC LIMIT ?2;",
        )?;
        let rows = stmt.query_map(params![after_seq, limit as i64], |row| {
            Ok(FeedbackSample {
                seq: row.get(0)?,
                run_id: row.get(1)?,
                origin: row.get(2)?,
                outcome_score: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            match row {
                Ok(sample) => out.push(sample),
                Err(e) => warn!(error = %e, "skipping unreadable feedback row"),
            }
        }
        out.reverse();
        Ok(out)
    }

    fn get_meta(&self, key: &str) -> SynthResult<Option<String>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                "SELECT value FROM corpus_meta WHERE key = ?1 LIMIT 1;",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_meta(&self, key: &str, value: &str) -> SynthResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO corpus_meta(key, value) VALUES(?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::extract;
    use crate::models::now_utc;

    fn open_temp() -> (tempfile::TempDir, SqliteCorpusStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCorpusStore::open(dir.path().join("corpus.db")).unwrap();
        (dir, store)
    }

    fn insert(store: &SqliteCorpusStore, text: &str, origin: Origin, score: f64) -> CorpusEntry {
        let spec = extract(text);
        store.put_specification(&spec).unwrap();
        store
            .put(NewCorpusEntry {
                spec_id: spec.id.clone(),
                implementation: format!("def {}():\n    return 1\n", spec.name),
                origin,
                outcome_score: score,
                created_at: now_utc(),
            })
            .unwrap()
    }

    #[test]
    fn open_initialises_schema_and_is_reopenable() {
        let (dir, store) = open_temp();
        assert_eq!(store.entry_count().unwrap(), 0);
        let conn = store.connect().unwrap();
        assert_eq!(schema::get_schema_version(&conn), schema::SCHEMA_VERSION);
        drop(store);
        let again = SqliteCorpusStore::open(dir.path().join("corpus.db")).unwrap();
        assert_eq!(again.entry_count().unwrap(), 0);
    }

    #[test]
    fn specification_round_trips() {
        let (_dir, store) = open_temp();
        let spec = extract("add two numbers");
        store.put_specification(&spec).unwrap();
        store.put_specification(&spec).unwrap();
        assert_eq!(store.get_specification(&spec.id).unwrap(), Some(spec.clone()));
        assert_eq!(store.list_specifications().unwrap().len(), 1);
        assert!(store.get_specification("missing").unwrap().is_none());
    }

    #[test]
    fn current_entry_tracks_outcome_score() {
        let (_dir, store) = open_temp();
        let first = insert(&store, "sum of squares", Origin::Template, 0.4);
        let spec_id = first.spec_id.clone();
        let second = store
            .put(NewCorpusEntry {
                spec_id: spec_id.clone(),
                implementation: "def other():\n    return 2\n".into(),
                origin: Origin::CorpusAdapted,
                outcome_score: 0.9,
                created_at: now_utc(),
            })
            .unwrap();
        assert_eq!(store.get(&spec_id).unwrap().unwrap().id, second.id);

        store.set_outcome_score(first.id, 1.0).unwrap();
        assert_eq!(store.get(&spec_id).unwrap().unwrap().id, first.id);
        assert_eq!(store.entries_for(&spec_id).unwrap().len(), 2);

        store.touch(first.id, now_utc()).unwrap();
        assert_eq!(store.get(&spec_id).unwrap().unwrap().usage_count, 2);
        assert!(store.touch(9999, now_utc()).is_err());
    }

    #[test]
    fn find_similar_filters_arity_origin_and_self() {
        let (_dir, store) = open_temp();
        insert(&store, "compute the sum of a list of numbers", Origin::Template, 0.8);
        insert(&store, "compute the total of a list of prices", Origin::Fallback, 0.9);
        insert(&store, "add two numbers", Origin::Template, 0.9);

        let target = extract("compute the sum of a list of integers");
        let found = store.find_similar(&target, 0.1, 8).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].spec.description, "compute the sum of a list of numbers");
        assert!(found[0].similarity > 0.1);

        let own = extract("compute the sum of a list of numbers");
        assert!(store.find_similar(&own, 0.1, 8).unwrap().is_empty());
        assert!(store.find_similar(&target, 0.1, 0).unwrap().is_empty());
    }

    #[test]
    fn find_similar_scans_every_spec_regardless_of_id_order() {
        let (_dir, store) = open_temp();
        let params_json =
            serde_json::to_string(&vec![Parameter::new("items", TypeHint::List)]).unwrap();
        let ts = format_ts(&now_utc());
        {
            let mut conn = store.connect().unwrap();
            let tx = conn.transaction().unwrap();
            for i in 0..5001 {
                let id = format!("0{i:015}");
                tx.execute(
                    "INSERT INTO specifications(
                        id, name, parameters_json, arity, return_type, signature_key, description, created_at
                     ) VALUES (?1, ?2, ?3, 1, ?4, '', ?5, ?6);",
                    params![
                        id,
                        format!("filler_{i}"),
                        params_json,
                        TypeHint::Int.as_str(),
                        format!("filler request {i}"),
                        ts
                    ],
                )
                .unwrap();
                tx.execute(
                    "INSERT INTO corpus_entries(
                        spec_id, implementation, origin, outcome_score, usage_count,
                        last_used_at, created_at, checksum
                     ) VALUES (?1, 'def f(items):\n    return 0\n', 'template', 0.5, 1, ?2, ?2, 0);",
                    params![id, ts],
                )
                .unwrap();
            }
            tx.commit().unwrap();
        }

        let late = Specification {
            id: "f".repeat(16),
            ..extract("compute the sum of a list of numbers")
        };
        store.put_specification(&late).unwrap();
        store
            .put(NewCorpusEntry {
                spec_id: late.id.clone(),
                implementation: format!("def {}(items: list) -> int:\n    return sum(items)\n", late.name),
                origin: Origin::Template,
                outcome_score: 0.8,
                created_at: now_utc(),
            })
            .unwrap();

        let target = extract("compute the sum of a list of prices");
        let found = store.find_similar(&target, 0.3, 8).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].spec.id, late.id);
    }

    #[test]
    fn find_similar_uses_current_entry_only() {
        let (_dir, store) = open_temp();
        let good = insert(&store, "sum the values in a list", Origin::Template, 0.5);
        store
            .put(NewCorpusEntry {
                spec_id: good.spec_id.clone(),
                implementation: "def x():\n    return 0\n".into(),
                origin: Origin::Fallback,
                outcome_score: 0.9,
                created_at: now_utc(),
            })
            .unwrap();
        let target = extract("sum the numbers in a list");
        assert!(store.find_similar(&target, 0.1, 4).unwrap().is_empty());

        store.set_outcome_score(good.id, 1.0).unwrap();
        let found = store.find_similar(&target, 0.1, 4).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entry.id, good.id);
    }

    #[test]
    fn find_by_signature_orders_by_score() {
        let (_dir, store) = open_temp();
        let first = insert(&store, "reverse a string", Origin::Template, 0.4);
        let spec = store.get_specification(&first.spec_id).unwrap().unwrap();
        let better = store
            .put(NewCorpusEntry {
                spec_id: spec.id.clone(),
                implementation: format!("def {}(text: str) -> str:\n    return text[::-1]\n", spec.name),
                origin: Origin::CorpusAdapted,
                outcome_score: 0.9,
                created_at: now_utc(),
            })
            .unwrap();
        insert(&store, "add two numbers", Origin::Template, 1.0);

        let key = spec.signature_key();
        let found = store.find_by_signature(&key, 10).unwrap();
        assert_eq!(found.iter().map(|e| e.id).collect::<Vec<_>>(), vec![better.id, first.id]);
        assert_eq!(store.find_by_signature(&key, 1).unwrap().len(), 1);
        assert!(store.find_by_signature("missing()->S", 10).unwrap().is_empty());
    }

    #[test]
    fn runs_and_feedback_are_sequenced() {
        let (_dir, store) = open_temp();
        let entry = insert(&store, "reverse a string", Origin::Template, 1.0);
        let run = RunRecord {
            run_id: "run-1".into(),
            spec_id: entry.spec_id.clone(),
            entry_id: entry.id,
            origin: Origin::Template,
            confidence: 1.0,
            artifact_location: None,
            created_at: now_utc(),
        };
        store.record_run(&run).unwrap();
        assert_eq!(store.get_run("run-1").unwrap(), Some(run));
        assert!(store.get_run("run-2").unwrap().is_none());

        let a = store.record_feedback("run-1", 0.2, now_utc()).unwrap();
        let b = store.record_feedback("run-1", 0.9, now_utc()).unwrap();
        assert!(b.seq > a.seq);

        let all = store.feedback_since(0, 10).unwrap();
        assert_eq!(all.iter().map(|s| s.seq).collect::<Vec<_>>(), vec![a.seq, b.seq]);
        assert_eq!(all[0].origin, "template");

        let newest = store.feedback_since(0, 1).unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].seq, b.seq);
        assert!(store.feedback_since(b.seq, 10).unwrap().is_empty());
    }

    #[test]
    fn meta_upserts() {
        let (_dir, store) = open_temp();
        assert!(store.get_meta("k").unwrap().is_none());
        store.set_meta("k", "1").unwrap();
        store.set_meta("k", "2").unwrap();
        assert_eq!(store.get_meta("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn backup_and_restore() {
        let (dir, store) = open_temp();
        insert(&store, "reverse a string", Origin::Template, 1.0);
        let backup = store.backup_to(dir.path().join("backup.db")).unwrap();
        insert(&store, "add two numbers", Origin::Template, 1.0);
        assert_eq!(store.entry_count().unwrap(), 2);
        store.restore_from(&backup).unwrap();
        assert_eq!(store.entry_count().unwrap(), 1);
        assert!(store.restore_from(dir.path().join("missing.db")).is_err());
    }
}

//! JSON Lines snapshots of the corpus.
//!
//! One tagged record per line:
//! `{"record":"specification","schema_version":1,...}` and
//! `{"record":"corpus_entry","schema_version":1,...}`. Entry records carry
//! the CRC32 of their implementation, verified on import. Specifications
//! always precede the entries that reference them, so a snapshot replays
//! front to back.

use std::fs::OpenOptions;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{SynthError, SynthResult};
use crate::models::{CorpusEntry, Specification, SNAPSHOT_SCHEMA_VERSION};
use crate::store::database::resolve_path;
use crate::store::CorpusStore;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum SnapshotRecord {
    Specification {
        schema_version: i64,
        #[serde(flatten)]
        spec: Specification,
    },
    CorpusEntry {
        schema_version: i64,
        #[serde(flatten)]
        entry: CorpusEntry,
    },
}

impl SnapshotRecord {
    pub fn specification(spec: Specification) -> Self {
        SnapshotRecord::Specification {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            spec,
        }
    }

    pub fn corpus_entry(entry: CorpusEntry) -> Self {
        SnapshotRecord::CorpusEntry {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            entry,
        }
    }
}

/// Counters reported by export and import.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub specifications: usize,
    pub entries: usize,
    pub skipped: usize,
    pub rejected: usize,
}

fn write_record<W: Write>(writer: &mut W, record: &SnapshotRecord) -> SynthResult<()> {
    serde_json::to_writer(&mut *writer, record)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Write every specification and entry in `store` as JSON Lines.
pub fn export_jsonl<W: Write>(store: &dyn CorpusStore, writer: W) -> SynthResult<SnapshotStats> {
    let mut writer = BufWriter::new(writer);
    let mut stats = SnapshotStats::default();
    let specs = store.list_specifications()?;
    for spec in &specs {
        write_record(&mut writer, &SnapshotRecord::specification(spec.clone()))?;
        stats.specifications += 1;
    }
    let mut entries = store.list_entries(usize::MAX)?;
    entries.sort_by_key(|e| e.id);
    for entry in entries {
        write_record(&mut writer, &SnapshotRecord::corpus_entry(entry))?;
        stats.entries += 1;
    }
    writer.flush()?;
    info!(
        specifications = stats.specifications,
        entries = stats.entries,
        "corpus snapshot exported"
    );
    Ok(stats)
}

/// Replay a JSON Lines snapshot into `store`.
///
/// Entries whose checksum does not match their implementation, or whose
/// schema version is newer than this build understands, are rejected and
/// counted; entries already present are skipped. Malformed lines abort the
/// import with a JSON error naming the line.
pub fn import_jsonl<R: BufRead>(store: &dyn CorpusStore, reader: R) -> SynthResult<SnapshotStats> {
    let mut stats = SnapshotStats::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: SnapshotRecord = serde_json::from_str(&line).map_err(|e| {
            SynthError::Store(format!("snapshot line {}: {e}", idx + 1))
        })?;
        match record {
            SnapshotRecord::Specification {
                schema_version,
                spec,
            } => {
                if schema_version > SNAPSHOT_SCHEMA_VERSION {
                    warn!(line = idx + 1, schema_version, "unsupported snapshot record");
                    stats.rejected += 1;
                    continue;
                }
                store.put_specification(&spec)?;
                stats.specifications += 1;
            }
            SnapshotRecord::CorpusEntry {
                schema_version,
                entry,
            } => {
                if schema_version > SNAPSHOT_SCHEMA_VERSION || !entry.checksum_matches() {
                    warn!(
                        line = idx + 1,
                        entry_id = entry.id,
                        "rejecting snapshot entry (version or checksum mismatch)"
                    );
                    stats.rejected += 1;
                    continue;
                }
                if store.restore_entry(&entry)? {
                    stats.entries += 1;
                } else {
                    stats.skipped += 1;
                }
            }
        }
    }
    info!(
        specifications = stats.specifications,
        entries = stats.entries,
        skipped = stats.skipped,
        rejected = stats.rejected,
        "corpus snapshot imported"
    );
    Ok(stats)
}

/// Append-only journal of persisted records.
pub struct JsonlJournal {
    path: std::path::PathBuf,
    lock: Mutex<()>,
}

impl JsonlJournal {
    pub fn open(path: impl AsRef<Path>) -> SynthResult<Self> {
        Ok(Self {
            path: resolve_path(path.as_ref())?,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records as a single write under the journal lock.
    pub fn append(&self, records: &[SnapshotRecord]) -> SynthResult<()> {
        let mut buf = Vec::new();
        for record in records {
            write_record(&mut buf, record)?;
        }
        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&buf)?;
        Ok(())
    }
}

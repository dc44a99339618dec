//! Persistence of synthesized artifacts, keyed by run id.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::errors::{SynthError, SynthResult};
use crate::store::database::resolve_path;

/// Destination for emitted source files.
pub trait ArtifactStore: Send + Sync {
    /// Persist `source` for `run_id` and return its location.
    fn write(&self, run_id: &str, source: &str) -> SynthResult<String>;

    fn read(&self, location: &str) -> SynthResult<String>;
}

/// Run ids are UUIDs; anything else must not escape the artifact root.
fn validate_run_id(run_id: &str) -> SynthResult<()> {
    let ok = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(SynthError::Persistence(format!("invalid run id for artifact: {run_id:?}")))
    }
}

/// Writes `<root>/<run_id>.py`.
#[derive(Clone, Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> SynthResult<Self> {
        // resolve_path creates the parent; the root itself is created here.
        let root = resolve_path(root.as_ref())?;
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for FsArtifactStore {
    fn write(&self, run_id: &str, source: &str) -> SynthResult<String> {
        validate_run_id(run_id)?;
        let path = self.root.join(format!("{run_id}.py"));
        // Write to a sibling temp file first so readers never see a partial
        // artifact.
        let tmp = self.root.join(format!(".{run_id}.py.tmp"));
        std::fs::write(&tmp, source)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| SynthError::Persistence(format!("{}: {e}", path.display())))?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn read(&self, location: &str) -> SynthResult<String> {
        Ok(std::fs::read_to_string(location)?)
    }
}

/// Keeps artifacts in process memory under `mem://<run_id>` locations.
#[derive(Default)]
pub struct MemoryArtifactStore {
    files: RwLock<IndexMap<String, String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn write(&self, run_id: &str, source: &str) -> SynthResult<String> {
        validate_run_id(run_id)?;
        let location = format!("mem://{run_id}");
        self.files
            .write()
            .insert(location.clone(), source.to_string());
        Ok(location)
    }

    fn read(&self, location: &str) -> SynthResult<String> {
        self.files
            .read()
            .get(location)
            .cloned()
            .ok_or_else(|| SynthError::Persistence(format!("no artifact at {location}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_store_round_trips_by_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("artifacts")).unwrap();
        let location = store.write("run-1", "def f():\n    return 1\n").unwrap();
        assert!(location.ends_with("run-1.py"));
        assert_eq!(store.read(&location).unwrap(), "def f():\n    return 1\n");
        assert!(!store.root().join(".run-1.py.tmp").exists());
    }

    #[test]
    fn path_like_run_ids_are_refused() {
        let store = MemoryArtifactStore::new();
        for bad in ["", "../escape", "a/b", "x.py"] {
            assert!(matches!(
                store.write(bad, "x"),
                Err(SynthError::Persistence(_))
            ));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn memory_store_reports_missing() {
        let store = MemoryArtifactStore::new();
        let location = store.write("abc", "pass\n").unwrap();
        assert_eq!(store.read(&location).unwrap(), "pass\n");
        assert!(store.read("mem://nope").is_err());
        assert_eq!(store.len(), 1);
    }
}

//! Step snapshots as individual XML files.

use crate::paths::NcliPaths;
use ncli_core::error::{NcliError, Result};
use ncli_core::testsuite::{SnapshotKey, SnapshotKind, SnapshotStore};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Keeps one file per step and kind in a flat directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(paths: &NcliPaths) -> Self {
        Self::with_dir(paths.snapshot_dir())
    }

    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &SnapshotKey, kind: SnapshotKind) -> PathBuf {
        self.dir.join(key.file_name(kind))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn read(&self, key: &SnapshotKey, kind: SnapshotKind) -> Result<Option<String>> {
        let path = self.path_for(key, kind);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NcliError::io(format!("cannot read {}: {e}", path.display()))),
        }
    }

    fn write(&mut self, key: &SnapshotKey, kind: SnapshotKind, content: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key, kind);
        fs::write(&path, content)
            .map_err(|e| NcliError::io(format!("cannot write {}: {e}", path.display())))?;
        debug!(path = %path.display(), "wrote {kind} snapshot");
        Ok(())
    }

    fn remove_test(&mut self, suite: &str, test: &str) -> Result<()> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let prefix = format!("{suite}_{test}_");
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_snapshot = name.ends_with("_record.xml") || name.ends_with("_run.xml");
            if !is_snapshot || !name.starts_with(&prefix) {
                continue;
            }
            // a longer test name sharing the prefix has another underscore before the step
            let step_part = &name[prefix.len()..];
            let step_part = step_part
                .trim_end_matches(".xml")
                .trim_end_matches("_record")
                .trim_end_matches("_run");
            if step_part.contains('_') {
                continue;
            }
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!("cannot remove snapshot {}: {e}", entry.path().display());
            }
        }
        Ok(())
    }
}

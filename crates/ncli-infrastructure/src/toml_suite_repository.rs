//! TOML-backed `SuiteRepository`.

use crate::paths::NcliPaths;
use crate::storage::AtomicTomlFile;
use ncli_core::error::Result;
use ncli_core::testsuite::{SuiteRepository, SuiteSet};
use std::path::PathBuf;
use tracing::debug;

/// Suites stored as `[[suite]]` tables in `test-suites.toml`.
///
/// Run-time results are not part of the file; only definitions and
/// recorded steps are written back.
#[derive(Debug, Clone)]
pub struct TomlSuiteRepository {
    file: AtomicTomlFile<SuiteSet>,
}

impl TomlSuiteRepository {
    pub fn new(paths: &NcliPaths) -> Self {
        Self::with_path(paths.suites_file())
    }

    /// Repository on an explicit file, used by `--suites` and tests.
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            file: AtomicTomlFile::new(path),
        }
    }
}

impl SuiteRepository for TomlSuiteRepository {
    fn load(&self) -> Result<SuiteSet> {
        let suites = self.file.load_or_default()?;
        suites.validate()?;
        debug!(
            path = %self.file.path().display(),
            "loaded {} test suites",
            suites.suites.len()
        );
        Ok(suites)
    }

    fn save(&mut self, suites: &SuiteSet) -> Result<()> {
        self.file.save(suites)?;
        debug!(path = %self.file.path().display(), "saved test suites");
        Ok(())
    }
}

//! Persistence contracts for suites and data snapshots.

use super::model::SuiteSet;
use crate::error::Result;
use std::collections::BTreeMap;

/// Loads and saves the whole suite set as one document.
pub trait SuiteRepository: Send {
    /// Returns an empty set when nothing has been saved yet.
    fn load(&self) -> Result<SuiteSet>;

    fn save(&mut self, suites: &SuiteSet) -> Result<()>;
}

/// Which copy of a step's data payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SnapshotKind {
    /// Captured while recording, the reference copy
    Record,
    /// Captured by the latest run
    Run,
}

/// Identifies the snapshot of one step.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotKey {
    pub suite: String,
    pub test: String,
    pub step: String,
}

impl SnapshotKey {
    pub fn new(suite: &str, test: &str, step: &str) -> Self {
        Self {
            suite: suite.to_string(),
            test: test.to_string(),
            step: step.to_string(),
        }
    }

    /// `{suite}_{test}_{step}_{record|run}.xml`
    pub fn file_name(&self, kind: SnapshotKind) -> String {
        format!("{}_{}_{}_{}.xml", self.suite, self.test, self.step, kind)
    }
}

/// Stores step data payloads as text.
pub trait SnapshotStore: Send {
    fn read(&self, key: &SnapshotKey, kind: SnapshotKind) -> Result<Option<String>>;

    fn write(&mut self, key: &SnapshotKey, kind: SnapshotKind, content: &str) -> Result<()>;

    /// Drops both copies of every step of a test.
    fn remove_test(&mut self, suite: &str, test: &str) -> Result<()>;
}

/// Suite repository kept in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySuiteRepository {
    pub suites: SuiteSet,
    pub saves: usize,
}

impl SuiteRepository for MemorySuiteRepository {
    fn load(&self) -> Result<SuiteSet> {
        Ok(self.suites.clone())
    }

    fn save(&mut self, suites: &SuiteSet) -> Result<()> {
        self.suites = suites.clone();
        self.saves += 1;
        Ok(())
    }
}

/// Snapshot store kept in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    entries: BTreeMap<(SnapshotKey, SnapshotKind), String>,
}

impl MemorySnapshotStore {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn read(&self, key: &SnapshotKey, kind: SnapshotKind) -> Result<Option<String>> {
        Ok(self.entries.get(&(key.clone(), kind)).cloned())
    }

    fn write(&mut self, key: &SnapshotKey, kind: SnapshotKind, content: &str) -> Result<()> {
        self.entries
            .insert((key.clone(), kind), content.to_string());
        Ok(())
    }

    fn remove_test(&mut self, suite: &str, test: &str) -> Result<()> {
        self.entries
            .retain(|(k, _), _| !(k.suite == suite && k.test == test));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_file_name() {
        let key = SnapshotKey::new("s1", "t1", "3");
        assert_eq!(key.file_name(SnapshotKind::Record), "s1_t1_3_record.xml");
        assert_eq!(key.file_name(SnapshotKind::Run), "s1_t1_3_run.xml");
    }

    #[test]
    fn test_memory_snapshot_remove_test() {
        let mut store = MemorySnapshotStore::default();
        store
            .write(&SnapshotKey::new("s", "t", "1"), SnapshotKind::Record, "<a/>")
            .unwrap();
        store
            .write(&SnapshotKey::new("s", "u", "1"), SnapshotKind::Record, "<b/>")
            .unwrap();
        store.remove_test("s", "t").unwrap();
        assert_eq!(store.len(), 1);
    }
}

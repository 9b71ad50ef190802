//! Test-suite fixture model shared by the run and record engines.
//!
//! # Module Structure
//!
//! - `model`: `Suite` / `Test` / `Step` with their expectations and run results
//! - `repository`: persistence contracts (`SuiteRepository`, `SnapshotStore`)

pub mod model;
pub mod repository;

pub use model::{DataKind, MustPass, ResponseType, Step, StepOutcome, Suite, SuiteSet, Test};
pub use repository::{
    MemorySnapshotStore, MemorySuiteRepository, SnapshotKey, SnapshotKind, SnapshotStore,
    SuiteRepository,
};

//! File-backed collaborators for the ncli core: platform paths, atomic TOML
//! storage, the suite repository, the snapshot store, `config.toml` and the
//! saved session targets.

pub mod config_service;
pub mod file_snapshot_store;
pub mod paths;
pub mod session_config_repository;
pub mod storage;
pub mod toml_suite_repository;

pub use crate::config_service::{ConfigService, LoggingSettings, NcliConfig};
pub use crate::file_snapshot_store::FileSnapshotStore;
pub use crate::paths::{NcliPaths, PathError};
pub use crate::session_config_repository::{SessionConfig, SessionConfigRepository};
pub use crate::toml_suite_repository::TomlSuiteRepository;

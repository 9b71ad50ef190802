//! Wires the core to its file-backed collaborators.

use ncli_core::ServerContext;
use ncli_core::error::Result;
use ncli_core::schema::BuiltinSchema;
use ncli_infrastructure::{
    ConfigService, FileSnapshotStore, NcliConfig, NcliPaths, TomlSuiteRepository,
};
use ncli_interaction::{DeviceProfile, LoopbackTransport};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Keep every file under this directory instead of the platform dirs
    pub home: Option<PathBuf>,
    /// Suite file other than `test-suites.toml`
    pub suites_file: Option<PathBuf>,
    pub profile: DeviceProfile,
}

/// A ready context plus the handles the front ends need.
pub struct Client {
    pub context: ServerContext,
    pub transport: LoopbackTransport,
    pub config: NcliConfig,
    pub paths: NcliPaths,
}

impl Client {
    pub fn build(options: ClientOptions) -> Result<Self> {
        let paths = match &options.home {
            Some(home) => NcliPaths::under(home),
            None => NcliPaths::resolve()?,
        };
        let config = ConfigService::new(&paths).load()?;
        let suites = match &options.suites_file {
            Some(path) => TomlSuiteRepository::with_path(path.clone()),
            None => TomlSuiteRepository::new(&paths),
        };
        let transport = LoopbackTransport::new(options.profile);

        let context = ServerContext::new(
            Box::new(transport.clone()),
            Box::new(BuiltinSchema::standard()),
        )
        .with_defaults(config.defaults.clone())
        .with_suite_repository(Box::new(suites))?
        .with_snapshot_store(Box::new(FileSnapshotStore::new(&paths)));

        debug!(
            config_dir = %paths.config_dir().display(),
            "client {} ready with {} suites",
            context.id(),
            context.suites().suites.len()
        );
        Ok(Self {
            context,
            transport,
            config,
            paths,
        })
    }
}

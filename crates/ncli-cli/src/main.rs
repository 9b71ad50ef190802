use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ncli_execution::ClientOptions;

mod commands;

#[derive(Parser)]
#[command(name = "ncli-batch")]
#[command(about = "ncli batch runner - replay NETCONF test suites", long_about = None)]
struct Cli {
    /// Keep config, suites and snapshots under this directory
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Suite file to use instead of test-suites.toml
    #[arg(long, global = true)]
    suites: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test suites and exit non-zero if any step fails
    Run(RunArgs),
    /// List the suites in the suite file
    List,
    /// Print one suite definition
    Show {
        /// Suite name
        suite: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Suites to run; all suites when empty
    pub suites: Vec<String>,

    /// Saved session (sessions.toml) to connect with
    #[arg(long, conflicts_with = "host")]
    pub session: Option<String>,

    /// Host to connect to
    #[arg(long, default_value = "localhost")]
    pub host: String,

    #[arg(long, default_value_t = 830)]
    pub port: u16,

    #[arg(long)]
    pub user: Option<String>,

    /// Seconds allowed for connecting and for each suite
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Print reports as JSON
    #[arg(long)]
    pub json: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let options = ClientOptions {
        home: cli.home,
        suites_file: cli.suites,
        ..ClientOptions::default()
    };

    match cli.command {
        Commands::Run(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            let passed = runtime.block_on(commands::run::execute(options, &args))?;
            Ok(if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::List => {
            commands::suites::list(options)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { suite } => {
            commands::suites::show(options, &suite)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

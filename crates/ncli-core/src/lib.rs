//! Core of the ncli NETCONF client: sessions, command modes, lock
//! orchestration, request correlation, assignments and the test-suite
//! run and record engines.
//!
//! The crate does no I/O of its own beyond reading and writing files named
//! in assignments and scripts. The network side is a `Transport`, time is
//! a `Clock`, and suites are persisted through `SuiteRepository` and
//! `SnapshotStore` implementations supplied by the caller.

pub mod assign;
pub mod command;
pub mod document;
pub mod error;
pub mod lock;
pub mod notif;
pub mod record;
pub mod rpc;
pub mod schema;
pub mod script;
pub mod server;
pub mod session;
pub mod test_run;
pub mod testsuite;
pub mod transport;
pub mod vars;

pub use error::{NcliError, Result};
pub use server::{ClientEvent, DEFAULT_SESSION, ServerContext};

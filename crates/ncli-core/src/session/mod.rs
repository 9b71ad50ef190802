//! Session domain module.
//!
//! # Module Structure
//!
//! - `state`: connection state and command mode (`SessionPhase`, `ConnectionState`, `CommandMode`)
//! - `prefs`: per-session preferences and config variables (`SessionPrefs`)
//! - `model`: the session itself (`Session`) and its automatic-sequence bookkeeping

mod model;
mod prefs;
mod state;

pub use model::{AutoloadState, AutotestState, AutotestStep, LockOutcome, PostConnect, Session};
pub use prefs::{CONFIG_VARS, SessionPrefs};
pub use state::{CommandMode, Connected, ConnectionState, SessionPhase, Waiting};

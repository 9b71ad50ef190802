//! Runtime side of ncli: the async event loop, tracing setup and the
//! wiring of the core to its collaborators.

pub mod bootstrap;
pub mod logging;
pub mod runner;
pub mod session_layer;

pub use bootstrap::{Client, ClientOptions};
pub use logging::{LogConfig, init_tracing};
pub use runner::{EventLoop, LineOutcome, LoopInput, LoopOutput};
pub use session_layer::{SessionEventLayer, SessionLog, SessionLogEntry};

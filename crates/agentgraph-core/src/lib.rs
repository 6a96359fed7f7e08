//! Agentgraph Core - task graph model, trace log, run memory, and errors

pub mod error;
pub mod memory;
pub mod trace;
pub mod types;

pub use error::{Error, Result};
pub use memory::Memory;
pub use trace::{Level, Trace, TraceEvent};
pub use types::*;

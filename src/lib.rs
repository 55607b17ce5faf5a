//! Bytecode instrumentation for a JVM profiler back end.
//!
//! Class bytes arrive from the target VM as load events. Depending on the active profiling
//! mode, methods get calls into the profiler runtime injected at entry, exit, allocation sites
//! or chosen lines, and the rewritten classfiles are handed back for redefinition. See
//! [`Orchestrator`] for the event loop and [`instr`] for the rewriting primitives.

#[macro_use]
extern crate log;

pub mod bytecode;
pub mod config;
pub mod error;
pub mod instr;
pub mod orchestrator;
pub mod policy;
pub mod protocol;
pub mod repository;
pub mod util;

pub use crate::config::{ClassFilter, InstrumentationConfig, RuntimeNames};
pub use crate::error::{ClassFormatError, FragmentError, InstrError, ScanError};
pub use crate::orchestrator::Orchestrator;
pub use crate::policy::{ProfilePointSpec, ProfilingMode, RootMethodSpec};
pub use crate::protocol::{Command, InstrumentMethodGroup};
pub use crate::repository::{ClassRepository, MemoryRepository};

/// Installs the `env_logger` backend. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

//! Crate implementing the CLI commands.

mod cli;
mod config;
mod error;
mod interp;
mod recorder;
mod run;
pub mod script;

pub use self::cli::{CliAction, CliOpts};
pub use self::config::{BreakpointConfig, FileModeConfig, ModeConfig, SessionConfig};
pub use self::error::ScriptError;
pub use self::interp::{Interpreter, RunOutcome};
pub use self::recorder::{EventLog, SessionRecorder};
pub use self::run::{evaluate_run, parse_session_config, run_script};

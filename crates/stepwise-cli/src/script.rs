//! Execution scripts.
//!
//! A script is a KDL document standing in for compiled code: it defines
//! functions (their sequence points, variables and bodies) and drives the
//! session (runs, breakpoint toggles, debug-mode changes) in document order.
//!
//! ```kdl
//! function "main" file="main.py" {
//!     local "x"
//!     point line=1
//!     point line=2
//!     body {
//!         step 0
//!         call "helper" 20 into="x"
//!         step 1
//!         return local="x"
//!     }
//! }
//!
//! breakpoint "main.py" line=2
//! run "main"
//! ```

use stepwise_engine::SourceSpan;

use crate::config::{BreakpointConfig, FileModeConfig, ModeConfig};

/// Parsed execution script.
#[derive(Debug, knus::Decode)]
pub struct Script {
    /// Top-level items, in document order.
    #[knus(children)]
    pub items: Vec<ScriptItem>,
}

/// Top-level node of an execution script.
#[derive(Debug, knus::Decode)]
pub enum ScriptItem {
    /// Defines a plain function. A redefinition is a new version.
    Function(FunctionDef),

    /// Defines a coroutine function. A redefinition is a new version.
    Generator(FunctionDef),

    /// Changes the global debug mode.
    DebugMode(DebugModeItem),

    /// Changes the debug mode of one file.
    FileMode(FileModeConfig),

    /// Arms a breakpoint.
    Breakpoint(BreakpointConfig),

    /// Disarms a breakpoint.
    ClearBreakpoint(BreakpointConfig),

    /// Drops the debug state of a file.
    ResetFile(ResetFileItem),

    /// Runs a function on the main thread.
    Run(RunItem),

    /// Runs a function on a new thread, waiting for it to finish.
    Spawn(RunItem),
}

/// Function definition.
#[derive(Debug, knus::Decode)]
pub struct FunctionDef {
    /// Function name.
    #[knus(argument)]
    pub name: String,

    /// Source file of the sequence points without an explicit one.
    #[knus(property)]
    pub file: String,

    /// Parameters, in call order.
    #[knus(children(name = "param"))]
    pub params: Vec<VariableDef>,

    /// Plain locals.
    #[knus(children(name = "local"))]
    pub locals: Vec<VariableDef>,

    /// Locals shared with nested closures.
    #[knus(children(name = "captured"))]
    pub captured: Vec<VariableDef>,

    /// Sequence points, in cookie order.
    #[knus(children(name = "point"))]
    pub points: Vec<PointDef>,

    /// Function body.
    #[knus(child, default)]
    pub body: Block,
}

/// Variable declaration.
#[derive(Debug, knus::Decode)]
pub struct VariableDef {
    /// Variable name.
    #[knus(argument)]
    pub name: String,

    /// Runtime type name.
    #[knus(property(name = "type"))]
    pub ty: Option<String>,
}

/// Sequence point declaration.
#[derive(Debug, knus::Decode)]
pub struct PointDef {
    /// Source file, when not the function's.
    #[knus(property)]
    pub file: Option<String>,

    /// Start line.
    #[knus(property)]
    pub line: u32,

    /// Start column.
    #[knus(property, default = 1)]
    pub column: u32,

    /// End line (the start line by default).
    #[knus(property)]
    pub end_line: Option<u32>,

    /// End column (the start column by default).
    #[knus(property)]
    pub end_column: Option<u32>,
}

impl PointDef {
    /// Span of the point, `default_file` standing for a missing file.
    pub fn span(&self, default_file: &str) -> SourceSpan {
        let file = self.file.as_deref().unwrap_or(default_file);
        let end_line = self.end_line.unwrap_or(self.line);
        let end_column = self.end_column.unwrap_or(self.column);

        SourceSpan::from_lines(file, (self.line, self.column), (end_line, end_column))
    }
}

/// Sequence of statements.
#[derive(Debug, Default, knus::Decode)]
pub struct Block {
    /// Statements, in execution order.
    #[knus(children)]
    pub statements: Vec<Statement>,
}

/// Statement of a function body.
#[derive(Debug, knus::Decode)]
pub enum Statement {
    /// Reaches a sequence point.
    Step(StepStmt),

    /// Assigns a local.
    Set(SetStmt),

    /// Calls a plain function.
    Call(CallStmt),

    /// Runs a coroutine function until it completes.
    Iterate(IterateStmt),

    /// Throws a user exception.
    Throw(OperandStmt),

    /// Returns from the function.
    Return(OperandStmt),

    /// Suspends a coroutine, producing a value.
    Yield(OperandStmt),

    /// Runs statements, catching the user exceptions they throw.
    Try(TryStmt),
}

/// `step <cookie>`
#[derive(Debug, knus::Decode)]
pub struct StepStmt {
    /// Location cookie reached.
    #[knus(argument)]
    pub cookie: usize,
}

/// `set "<local>" <value>` or `set "<local>" local="<other>"`
#[derive(Debug, knus::Decode)]
pub struct SetStmt {
    /// Assigned local.
    #[knus(argument)]
    pub name: String,

    /// Integer literal.
    #[knus(argument)]
    pub value: Option<i64>,

    /// Local copied from.
    #[knus(property)]
    pub local: Option<String>,
}

/// `call "<function>" <args>.. [into="<local>"]`
#[derive(Debug, knus::Decode)]
pub struct CallStmt {
    /// Called function.
    #[knus(argument)]
    pub function: String,

    /// Integer arguments.
    #[knus(arguments)]
    pub args: Vec<i64>,

    /// Local receiving the returned value.
    #[knus(property)]
    pub into: Option<String>,
}

/// `iterate "<generator>" <args>.. [limit=<n>] [into="<local>"]`
#[derive(Debug, knus::Decode)]
pub struct IterateStmt {
    /// Coroutine function.
    #[knus(argument)]
    pub function: String,

    /// Integer arguments.
    #[knus(arguments)]
    pub args: Vec<i64>,

    /// Maximum number of values pulled.
    #[knus(property)]
    pub limit: Option<usize>,

    /// Local receiving the last produced value.
    #[knus(property)]
    pub into: Option<String>,
}

/// Statement taking an optional operand: a literal or a local.
#[derive(Debug, knus::Decode)]
pub struct OperandStmt {
    /// Integer literal.
    #[knus(argument)]
    pub value: Option<i64>,

    /// Local read.
    #[knus(property)]
    pub local: Option<String>,
}

/// `try [catch="<local>"] { .. }`
#[derive(Debug, knus::Decode)]
pub struct TryStmt {
    /// Local receiving the caught exception value.
    #[knus(property)]
    pub catch: Option<String>,

    /// Guarded statements.
    #[knus(children)]
    pub body: Vec<Statement>,
}

/// `debug-mode "<mode>"`
#[derive(Debug, knus::Decode)]
pub struct DebugModeItem {
    /// New global mode.
    #[knus(argument)]
    pub mode: ModeConfig,
}

/// `reset-file "<path>"`
#[derive(Debug, knus::Decode)]
pub struct ResetFileItem {
    /// Path of the source file.
    #[knus(argument)]
    pub file: String,
}

/// `run "<function>" <args>..`
#[derive(Debug, knus::Decode)]
pub struct RunItem {
    /// Function run.
    #[knus(argument)]
    pub function: String,

    /// Integer arguments.
    #[knus(arguments)]
    pub args: Vec<i64>,
}

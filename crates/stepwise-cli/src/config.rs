use stepwise_engine::{DebugMode, SourceSpan};

/// Configuration of a debug session.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct SessionConfig {
    /// Initial global debug mode.
    #[knus(child, default = ModeConfig::TracePoints, unwrap(argument))]
    pub debug_mode: ModeConfig,

    /// Maximum number of frames dumped with each exception.
    #[knus(child, default = 0, unwrap(argument))]
    pub backtrace_depth: usize,

    /// Per-file debug modes, overriding the global one.
    #[knus(children(name = "file-mode"))]
    pub file_modes: Vec<FileModeConfig>,

    /// Breakpoints armed for the whole session.
    #[knus(children(name = "breakpoint"))]
    pub breakpoints: Vec<BreakpointConfig>,
}

/// Debug mode, as written in KDL documents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, knus::DecodeScalar)]
pub enum ModeConfig {
    /// No event at all.
    Disabled,

    /// Exception events only.
    ExceptionsOnly,

    /// Armed locations, frame and exception events.
    TracePoints,

    /// Every sequence point.
    FullyEnabled,
}

impl From<ModeConfig> for DebugMode {
    fn from(mode: ModeConfig) -> Self {
        match mode {
            ModeConfig::Disabled => Self::Disabled,
            ModeConfig::ExceptionsOnly => Self::ExceptionsOnly,
            ModeConfig::TracePoints => Self::TracePoints,
            ModeConfig::FullyEnabled => Self::FullyEnabled,
        }
    }
}

/// Debug mode of a single source file.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct FileModeConfig {
    /// Path of the source file.
    #[knus(argument)]
    pub file: String,

    /// Debug mode of the file.
    #[knus(argument)]
    pub mode: ModeConfig,
}

/// Breakpoint placed on a source position.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct BreakpointConfig {
    /// Path of the source file.
    #[knus(argument)]
    pub file: String,

    /// Line of the breakpoint.
    #[knus(property)]
    pub line: u32,

    /// Column of the breakpoint.
    #[knus(property, default = 1)]
    pub column: u32,
}

impl BreakpointConfig {
    /// Source span matched against sequence points.
    pub fn span(&self) -> SourceSpan {
        SourceSpan::from_lines(
            self.file.as_str(),
            (self.line, self.column),
            (self.line, self.column),
        )
    }
}

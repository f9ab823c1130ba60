use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::function::FunctionInfo;

/// How much instrumentation is reported to the event subscriber.
///
/// Modes are ordered: each one reports everything the previous one does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DebugMode {
    /// Nothing is reported. Frames are still tracked.
    #[default]
    Disabled = 0,

    /// Only exceptions (thrown, unwinding, escaping a thread) are reported.
    ExceptionsOnly = 1,

    /// Frame enter/exit and armed trace points are reported as well.
    TracePoints = 2,

    /// Every sequence point is reported (stepping).
    FullyEnabled = 3,
}

impl DebugMode {
    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Disabled,
            1 => Self::ExceptionsOnly,
            2 => Self::TracePoints,
            _ => Self::FullyEnabled,
        }
    }

    /// Name of the mode, in kebab case.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::ExceptionsOnly => "exceptions-only",
            Self::TracePoints => "trace-points",
            Self::FullyEnabled => "fully-enabled",
        }
    }
}

impl fmt::Display for DebugMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when parsing an unknown [DebugMode].
#[derive(thiserror::Error, Debug)]
#[error("unknown debug mode \"{0}\"")]
pub struct UnknownDebugMode(pub String);

impl FromStr for DebugMode {
    type Err = UnknownDebugMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Disabled,
            Self::ExceptionsOnly,
            Self::TracePoints,
            Self::FullyEnabled,
        ]
        .into_iter()
        .find(|mode| mode.label() == s)
        .ok_or_else(|| UnknownDebugMode(s.to_owned()))
    }
}

/// Debug state of one source file.
///
/// It is shared by every sequence point of the file, so instrumented code
/// reads the file's mode without going through the context.
pub struct DebugSourceFile {
    path: Arc<str>,
    mode: AtomicU8,
    functions: Mutex<Vec<Weak<FunctionInfo>>>,
}

impl DebugSourceFile {
    pub(crate) fn new(path: Arc<str>, mode: DebugMode) -> Self {
        Self {
            path,
            mode: AtomicU8::new(mode as u8),
            functions: Mutex::new(Vec::new()),
        }
    }

    /// Path of the file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current debug mode of the file.
    #[inline]
    pub fn mode(&self) -> DebugMode {
        DebugMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Overrides the debug mode of this file only.
    ///
    /// The next global mode change overwrites it.
    pub fn set_mode(&self, mode: DebugMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    pub(crate) fn add_function(&self, function: &Arc<FunctionInfo>) {
        let mut functions = self.functions.lock();

        if !functions
            .iter()
            .any(|f| std::ptr::eq(f.as_ptr(), Arc::as_ptr(function)))
        {
            functions.push(Arc::downgrade(function));
        }
    }

    /// Live functions registered with sequence points in this file.
    pub fn functions(&self) -> Vec<Arc<FunctionInfo>> {
        let mut functions = self.functions.lock();
        functions.retain(|f| f.strong_count() > 0);
        functions.iter().filter_map(Weak::upgrade).collect()
    }
}

impl fmt::Debug for DebugSourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugSourceFile")
            .field("path", &self.path)
            .field("mode", &self.mode())
            .finish()
    }
}

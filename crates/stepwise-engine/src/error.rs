use crate::value::Exception;

/// Event subscriber error.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct SubscriberError(pub Box<dyn std::error::Error + Send + Sync>);

impl SubscriberError {
    /// Wraps an arbitrary error raised by an event subscriber.
    pub fn new(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(error.into())
    }
}

/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A location cookie doesn't address the function's sequence-point table.
    #[error("sequence point {1} out of range for function {0}")]
    InvalidSequencePoint(String, usize),

    /// A sequence point was declared without any source file.
    #[error("sequence point {0} has no source file")]
    MissingSourceFile(usize),

    /// A frame was popped from an empty thread stack.
    #[error("frame stack of thread {0} is empty")]
    StackUnderflow(u64),

    /// The function was already registered with a debug context.
    #[error("function {0} is already registered")]
    AlreadyRegistered(String),

    /// Linking two function versions would create a cycle.
    #[error("version chain of function {0} would become cyclic")]
    VersionCycle(String),

    /// The function has no generator loop to redirect to.
    #[error("function {0} has no generator loop")]
    NoGeneratorLoop(String),

    /// The coroutine has already run to completion.
    #[error("generator {0} has already completed")]
    GeneratorExhausted(String),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Non-local exit of an instrumented body.
///
/// Instrumented code propagates this with `?`. Only [Unwind::Throw] is a
/// user-visible exception; the other variants pass through user handlers
/// untouched (see [Activation::catch](crate::instrument::Activation::catch)).
#[derive(thiserror::Error, Debug)]
pub enum Unwind {
    /// A user exception is propagating.
    #[error("unhandled exception: {0}")]
    Throw(Exception),

    /// The leaf coroutine frame must continue in the generator loop.
    #[error("redirect to generator loop")]
    RedirectToGeneratorLoop,

    /// The event subscriber failed.
    #[error(transparent)]
    Subscriber(#[from] SubscriberError),

    /// The engine was misused.
    #[error(transparent)]
    Engine(#[from] Error),
}

impl Unwind {
    /// Returns the propagating user exception, if any.
    pub const fn exception(&self) -> Option<&Exception> {
        match self {
            Self::Throw(exception) => Some(exception),
            _ => None,
        }
    }
}

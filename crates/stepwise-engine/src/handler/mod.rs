use std::fmt;
use std::sync::Arc;

use crate::error::SubscriberError;
use crate::function::FunctionInfo;
use crate::thread::ThreadStack;
use crate::value::{Exception, Value};

/// Kind of an instrumentation event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TraceEventKind {
    /// A function activation was entered.
    FrameEnter,

    /// A function activation is about to return (normally or not).
    FrameExit,

    /// A sequence point was reached.
    TracePoint,

    /// An exception was thrown.
    Exception,

    /// An activation is being unwound by a propagating exception.
    ExceptionUnwind,

    /// The thread stack was emptied, by an escaping exception or while
    /// stepping.
    ThreadExit,
}

impl TraceEventKind {
    /// Name of the event kind, in kebab case.
    pub const fn label(self) -> &'static str {
        match self {
            Self::FrameEnter => "frame-enter",
            Self::FrameExit => "frame-exit",
            Self::TracePoint => "trace-point",
            Self::Exception => "exception",
            Self::ExceptionUnwind => "exception-unwind",
            Self::ThreadExit => "thread-exit",
        }
    }
}

impl fmt::Display for TraceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Event-specific data.
#[derive(Clone, Copy, Debug)]
pub enum EventPayload<'a> {
    /// No payload.
    None,

    /// Value returned by the exiting activation (`None` for exceptional exits
    /// and functions returning nothing).
    ReturnValue(Option<&'a Value>),

    /// The thrown exception.
    Exception(&'a Exception),
}

/// Instrumentation event, as handed to an [EventSubscriber].
#[derive(Clone, Copy, Debug)]
pub struct TraceEvent<'a> {
    /// Kind of the event.
    pub kind: TraceEventKind,

    /// Stack of the thread raising the event.
    pub thread: &'a Arc<ThreadStack>,

    /// Leaf function of the thread (`None` for [TraceEventKind::ThreadExit]).
    pub function: Option<&'a Arc<FunctionInfo>>,

    /// Location cookie within `function`.
    pub location: Option<usize>,

    /// Index of the leaf frame (`usize::MAX` for [TraceEventKind::ThreadExit]).
    pub depth: usize,

    /// Event-specific data.
    pub payload: EventPayload<'a>,
}

impl TraceEvent<'_> {
    /// Returns the exception carried by the event, if any.
    pub const fn exception(&self) -> Option<&Exception> {
        match self.payload {
            EventPayload::Exception(exception) => Some(exception),
            _ => None,
        }
    }

    /// Returns the value carried by a [TraceEventKind::FrameExit] event.
    pub const fn return_value(&self) -> Option<&Value> {
        match self.payload {
            EventPayload::ReturnValue(value) => value,
            _ => None,
        }
    }
}

/// Trait for implementing the debugger side of a [DebugContext](crate::DebugContext).
///
/// Exactly one subscriber is registered per context. It is invoked
/// synchronously on the thread raising the event, and may be invoked
/// concurrently from several threads (never twice at once for the same
/// thread).
pub trait EventSubscriber: Send + Sync {
    /// Function called for each dispatched event.
    ///
    /// The subscriber can inspect (and modify) the frames of `event.thread`
    /// for as long as this call lasts. Returning an error aborts the
    /// instrumented code, which sees [Unwind::Subscriber](crate::Unwind::Subscriber).
    fn on_event(&self, event: &TraceEvent<'_>) -> Result<(), SubscriberError>;
}

impl<F> EventSubscriber for F
where
    F: Fn(&TraceEvent<'_>) -> Result<(), SubscriberError> + Send + Sync,
{
    fn on_event(&self, event: &TraceEvent<'_>) -> Result<(), SubscriberError> {
        self(event)
    }
}

/// Subscriber ignoring every event, for runtimes without a debugger attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSubscriber;

impl EventSubscriber for NoopSubscriber {
    fn on_event(&self, _event: &TraceEvent<'_>) -> Result<(), SubscriberError> {
        Ok(())
    }
}

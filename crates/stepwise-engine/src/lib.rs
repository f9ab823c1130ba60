//! This crate provides the debugging layer of a dynamic-language runtime:
//! the metadata the compiler attaches to each function, the per-thread frame
//! stacks mirroring live activations, and the dispatcher notifying a debugger
//! of what instrumented code does.
//!
//! Three parties are involved:
//! - The compiler describes each function with [FunctionInfo] (sequence
//!   points, variables, scopes) and emits bodies reporting their progress
//!   through an [Activation](instrument::Activation).
//! - The runtime owns a [DebugContext], registers functions with it, and runs
//!   bodies with [invoke](instrument::invoke) or, for coroutine functions,
//!   [Generator](instrument::Generator).
//! - The debugger implements [EventSubscriber] and toggles breakpoints and
//!   debug modes through the context, from any thread.
//!
//! # Consuming instrumentation events
//!
//! ```
//! use stepwise_engine::handler::{EventSubscriber, TraceEvent, TraceEventKind};
//! use stepwise_engine::instrument::invoke;
//! use stepwise_engine::{DebugContext, DebugMode, FunctionInfo, SourceSpan, SubscriberError};
//!
//! struct BreakpointLogger;
//!
//! impl EventSubscriber for BreakpointLogger {
//!     fn on_event(&self, event: &TraceEvent<'_>) -> Result<(), SubscriberError> {
//!         if event.kind == TraceEventKind::TracePoint {
//!             let function = event.function.map(|f| f.name());
//!             tracing::info!(?function, location = event.location, "breakpoint hit");
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let context = DebugContext::builder()
//!     .with_subscriber(BreakpointLogger)
//!     .debug_mode(DebugMode::TracePoints)
//!     .build();
//!
//! let mut builder = FunctionInfo::builder("main");
//! let line_1 = builder
//!     .sequence_point(SourceSpan::from_lines("main.py", (1, 1), (1, 12)))
//!     .unwrap();
//! let main = builder.build();
//! context.register_function(&main).unwrap();
//!
//! // place a breakpoint on line 1
//! context.set_breakpoint(&SourceSpan::from_lines("main.py", (1, 1), (1, 1)), true);
//!
//! invoke(&context, &main, [], |activation| {
//!     activation.sequence_point(line_1)?;
//!     Ok(None)
//! })
//! .unwrap();
//! ```

mod context;
mod error;
mod frame;
mod function;

/// Module containing the event subscriber trait.
pub mod handler;

pub mod instrument;

mod span;
mod thread;
mod value;

pub use self::context::{Builder, DebugContext, DebugMode, DebugSourceFile, UnknownDebugMode};
pub use self::error::{Error, Result, SubscriberError, Unwind};
pub use self::frame::{CapturedCell, Frame, Locals};
pub use self::function::{FunctionBuilder, FunctionInfo, VariableFlags, VariableInfo};
pub use self::handler::{EventSubscriber, NoopSubscriber};
pub use self::span::{SourcePosition, SourceSpan};
pub use self::thread::{LeafActivation, ThreadStack};
pub use self::value::{DebugValue, Exception, Value, downcast, value};

//! Entry points called by compiled code.
//!
//! A compiled body receives an [Activation] and reports its progress through
//! it. Non-local exits are [Unwind] values propagated with `?`:
//!
//! ```
//! use stepwise_engine::instrument::{Activation, invoke};
//! use stepwise_engine::{DebugContext, FunctionInfo, NoopSubscriber, SourceSpan, downcast, value};
//!
//! let context = DebugContext::builder().with_subscriber(NoopSubscriber).build();
//!
//! let mut builder = FunctionInfo::builder("answer");
//! let start = builder
//!     .sequence_point(SourceSpan::from_lines("answer.py", (1, 1), (1, 10)))
//!     .unwrap();
//! let answer = builder.build();
//! context.register_function(&answer).unwrap();
//!
//! let ret = invoke(&context, &answer, [], |activation: &mut Activation<'_>| {
//!     activation.sequence_point(start)?;
//!     Ok(Some(value(42_i64)))
//! })
//! .unwrap();
//!
//! assert_eq!(ret.as_ref().and_then(downcast::<i64>), Some(&42));
//! ```

mod generator;

use std::sync::Arc;

pub use self::generator::{Coroutine, Generator, GeneratorFactory, GeneratorStep};
use crate::context::{DebugContext, DebugMode};
use crate::error::Unwind;
use crate::frame::{CapturedCell, Frame, Locals};
use crate::function::FunctionInfo;
use crate::handler::{EventPayload, TraceEventKind};
use crate::thread::ThreadStack;
use crate::value::{Exception, Value};

/// Runs one activation of `function` on the calling thread.
///
/// `args` are bound to the parameters, in declaration order. The frame is
/// pushed before `body` runs and popped after it returns, whatever the
/// outcome.
pub fn invoke<F>(
    context: &DebugContext,
    function: &Arc<FunctionInfo>,
    args: impl IntoIterator<Item = Value>,
    body: F,
) -> Result<Option<Value>, Unwind>
where
    F: FnOnce(&mut Activation<'_>) -> Result<Option<Value>, Unwind>,
{
    invoke_on(context, context.current_thread(), function, args, body)
}

fn invoke_on<F>(
    context: &DebugContext,
    thread: Arc<ThreadStack>,
    function: &Arc<FunctionInfo>,
    args: impl IntoIterator<Item = Value>,
    body: F,
) -> Result<Option<Value>, Unwind>
where
    F: FnOnce(&mut Activation<'_>) -> Result<Option<Value>, Unwind>,
{
    let locals = Locals::for_function(function);
    bind_arguments(function, locals.as_deref(), args);

    let depth = thread.push_frame(function.clone(), locals.clone());
    let mut activation = Activation::new(context, thread, function.clone(), depth, locals);

    let result = activation.enter().and_then(|()| body(&mut activation));
    activation.finish(result, Option::as_ref)
}

pub(crate) fn bind_arguments(
    function: &FunctionInfo,
    locals: Option<&Locals>,
    args: impl IntoIterator<Item = Value>,
) {
    let Some(locals) = locals else {
        return;
    };

    let params = function.variables().iter().filter(|var| var.is_parameter());
    for (param, arg) in params.zip(args) {
        locals.set(param.global_index(), Some(arg));
    }
}

/// Mode ruling the enter/exit events of `function`.
pub(crate) fn entry_mode(context: &DebugContext, function: &FunctionInfo) -> DebugMode {
    function
        .source_file(0)
        .map_or_else(|| context.debug_mode(), |file| file.mode())
}

/// One live activation of an instrumented function.
pub struct Activation<'a> {
    context: &'a DebugContext,
    thread: Arc<ThreadStack>,
    function: Arc<FunctionInfo>,
    depth: usize,
    location: Option<usize>,
    locals: Option<Arc<Locals>>,

    /// Frame of a coroutine activation.
    frame: Option<Arc<Frame>>,
    in_generator_loop: bool,

    /// Location at which the fast path was redirected, already reported.
    redirected_at: Option<usize>,
    popped: bool,
}

impl<'a> Activation<'a> {
    fn new(
        context: &'a DebugContext,
        thread: Arc<ThreadStack>,
        function: Arc<FunctionInfo>,
        depth: usize,
        locals: Option<Arc<Locals>>,
    ) -> Self {
        Self {
            context,
            thread,
            function,
            depth,
            location: None,
            locals,
            frame: None,
            in_generator_loop: false,
            redirected_at: None,
            popped: false,
        }
    }

    pub(crate) fn resumed(
        context: &'a DebugContext,
        thread: Arc<ThreadStack>,
        frame: Arc<Frame>,
        depth: usize,
        in_generator_loop: bool,
    ) -> Self {
        Self {
            context,
            thread,
            function: frame.function().clone(),
            depth,
            location: frame.location(),
            locals: frame.locals().cloned(),
            frame: Some(frame),
            in_generator_loop,
            redirected_at: None,
            popped: false,
        }
    }

    /// Debug context the activation runs in.
    pub const fn context(&self) -> &'a DebugContext {
        self.context
    }

    /// Stack of the thread running the activation.
    pub fn thread(&self) -> &Arc<ThreadStack> {
        &self.thread
    }

    /// Executing function.
    pub fn function(&self) -> &Arc<FunctionInfo> {
        &self.function
    }

    /// Index of the activation in its thread stack.
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Last reached location cookie.
    pub const fn location(&self) -> Option<usize> {
        self.location
    }

    /// Frame of a coroutine activation.
    pub fn frame(&self) -> Option<&Arc<Frame>> {
        self.frame.as_ref()
    }

    /// Whether the activation is a coroutine advance running in the
    /// generator loop.
    pub const fn in_generator_loop(&self) -> bool {
        self.in_generator_loop
    }

    /// Reads a variable by global index.
    pub fn local(&self, index: usize) -> Option<Value> {
        self.locals.as_ref()?.get(index)
    }

    /// Writes a variable by global index, returning whether it exists.
    pub fn set_local(&self, index: usize, value: Value) -> bool {
        self.locals
            .as_ref()
            .is_some_and(|locals| locals.set(index, Some(value)))
    }

    /// Returns the shared cell of a captured variable, for a nested closure.
    pub fn capture(&self, index: usize) -> Option<CapturedCell> {
        self.locals.as_ref()?.captured_cell(index)
    }

    fn location_mode(&self, cookie: usize) -> DebugMode {
        self.function
            .source_file(cookie)
            .map_or_else(|| entry_mode(self.context, &self.function), |file| file.mode())
    }

    fn sync_location(&self) {
        self.thread.set_location(self.depth, self.location);
    }

    fn frame_event(&self, kind: TraceEventKind, payload: EventPayload<'_>) -> Result<(), Unwind> {
        if entry_mode(self.context, &self.function) < DebugMode::TracePoints {
            return Ok(());
        }

        self.sync_location();
        self.context.dispatch(&self.thread, kind, payload)
    }

    pub(crate) fn enter(&self) -> Result<(), Unwind> {
        self.frame_event(TraceEventKind::FrameEnter, EventPayload::None)
    }

    /// Records that the sequence point `cookie` is about to execute.
    ///
    /// A trace-point event is dispatched if the location is armed, if the
    /// file is being stepped, or if the activation runs in the generator loop.
    #[inline]
    pub fn sequence_point(&mut self, cookie: usize) -> Result<(), Unwind> {
        if cookie >= self.function.sequence_points().len() {
            return Err(crate::Error::InvalidSequencePoint(self.function.name().to_owned(), cookie).into());
        }

        self.location = Some(cookie);
        if let Some(frame) = &self.frame {
            frame.set_location(self.location);
        }

        if self.redirected_at.take() == Some(cookie) {
            return Ok(());
        }

        let armed = match self.location_mode(cookie) {
            DebugMode::FullyEnabled => true,
            DebugMode::TracePoints => {
                self.in_generator_loop || self.function.is_trace_point(cookie)
            }
            DebugMode::Disabled | DebugMode::ExceptionsOnly => false,
        };

        if !armed {
            return Ok(());
        }

        self.sync_location();
        self.context
            .dispatch(&self.thread, TraceEventKind::TracePoint, EventPayload::None)
    }

    /// Throws a user exception carrying `value`.
    ///
    /// The returned value is meant to be propagated with `?` (or `Err(..)`).
    pub fn throw(&mut self, value: Value) -> Unwind {
        self.raise(Exception::new(value))
    }

    /// Throws (or rethrows) a user exception, keeping its identity.
    pub fn raise(&mut self, exception: Exception) -> Unwind {
        let mode = match self.location {
            Some(cookie) => self.location_mode(cookie),
            None => entry_mode(self.context, &self.function),
        };

        if mode >= DebugMode::ExceptionsOnly {
            self.sync_location();

            let payload = EventPayload::Exception(&exception);
            if let Err(unwind) = self
                .context
                .dispatch(&self.thread, TraceEventKind::Exception, payload)
            {
                return unwind;
            }
        }

        Unwind::Throw(exception)
    }

    /// Splits the outcome of a guarded block for a user exception handler.
    ///
    /// Only user exceptions are handed over; the other unwinds keep
    /// propagating.
    pub fn catch<T>(&self, result: Result<T, Unwind>) -> Result<Result<T, Exception>, Unwind> {
        match result {
            Ok(value) => Ok(Ok(value)),
            Err(Unwind::Throw(exception)) => Ok(Err(exception)),
            Err(unwind) => Err(unwind),
        }
    }

    /// Calls a nested function from this activation.
    pub fn call<F>(
        &mut self,
        function: &Arc<FunctionInfo>,
        args: impl IntoIterator<Item = Value>,
        body: F,
    ) -> Result<Option<Value>, Unwind>
    where
        F: FnOnce(&mut Activation<'_>) -> Result<Option<Value>, Unwind>,
    {
        self.sync_location();
        invoke_on(self.context, self.thread.clone(), function, args, body)
    }

    /// Continues the activation in the generator loop, the current location
    /// having been reported already.
    pub(crate) fn switch_to_generator_loop(&mut self) {
        if let Some(frame) = &self.frame {
            frame.enter_generator_loop();
        }

        self.in_generator_loop = true;
        self.redirected_at = self.location;

        tracing::debug!(
            function = self.function.name(),
            location = self.location,
            "switched to generator loop"
        );
    }

    /// Reports the end of the activation and pops its frame.
    ///
    /// The exit event is reported on every path but the redirect to the
    /// generator loop. A redirect requested while exiting is left pending for
    /// the next coroutine advance.
    pub(crate) fn finish<T>(
        &mut self,
        result: Result<T, Unwind>,
        return_value: impl FnOnce(&T) -> Option<&Value>,
    ) -> Result<T, Unwind> {
        let result = match result {
            Ok(value) => self
                .exit_event(
                    TraceEventKind::FrameExit,
                    EventPayload::ReturnValue(return_value(&value)),
                )
                .map(|()| value),
            Err(Unwind::RedirectToGeneratorLoop) => Err(Unwind::RedirectToGeneratorLoop),
            Err(Unwind::Throw(exception)) => {
                let unwound = self.unwind_event(&exception);
                let exited =
                    self.exit_event(TraceEventKind::FrameExit, EventPayload::ReturnValue(None));

                unwound.and(exited).and(Err(Unwind::Throw(exception)))
            }
            Err(unwind) => {
                // the original failure wins over a failing exit event
                let _ = self.exit_event(TraceEventKind::FrameExit, EventPayload::ReturnValue(None));
                Err(unwind)
            }
        };

        self.sync_location();
        self.popped = true;
        let emptied = self.thread.pop_frame()?;

        if emptied && self.reports_thread_exit(&result) {
            let exited = self.ignore_redirect(self.context.dispatch(
                &self.thread,
                TraceEventKind::ThreadExit,
                EventPayload::None,
            ));

            if let (Ok(_) | Err(Unwind::Throw(_)), Err(unwind)) = (&result, exited) {
                return Err(unwind);
            }
        }

        result
    }

    /// Whether emptying the thread stack with `result` is reported.
    ///
    /// Any exit is reported when the file is being stepped, an escaping
    /// exception as soon as exceptions are.
    fn reports_thread_exit<T>(&self, result: &Result<T, Unwind>) -> bool {
        match (entry_mode(self.context, &self.function), result) {
            (_, Err(Unwind::RedirectToGeneratorLoop)) => false,
            (DebugMode::FullyEnabled, _) => true,
            (mode, Err(Unwind::Throw(_))) => mode >= DebugMode::ExceptionsOnly,
            _ => false,
        }
    }

    fn unwind_event(&self, exception: &Exception) -> Result<(), Unwind> {
        let mode = match self.location {
            Some(cookie) => self.location_mode(cookie),
            None => entry_mode(self.context, &self.function),
        };

        if mode < DebugMode::ExceptionsOnly {
            return Ok(());
        }

        self.sync_location();
        self.ignore_redirect(self.context.dispatch(
            &self.thread,
            TraceEventKind::ExceptionUnwind,
            EventPayload::Exception(exception),
        ))
    }

    fn exit_event(&self, kind: TraceEventKind, payload: EventPayload<'_>) -> Result<(), Unwind> {
        self.ignore_redirect(self.frame_event(kind, payload))
    }

    fn ignore_redirect(&self, res: Result<(), Unwind>) -> Result<(), Unwind> {
        match res {
            Err(Unwind::RedirectToGeneratorLoop) => Ok(()),
            res => res,
        }
    }
}

impl Drop for Activation<'_> {
    fn drop(&mut self) {
        if !self.popped {
            let _ = self.thread.pop_frame();
        }
    }
}

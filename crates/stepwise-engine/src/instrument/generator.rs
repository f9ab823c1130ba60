use std::fmt;
use std::sync::Arc;

use super::{Activation, bind_arguments, entry_mode};
use crate::context::{DebugContext, DebugMode};
use crate::error::Unwind;
use crate::frame::{Frame, Locals};
use crate::function::FunctionInfo;
use crate::value::Value;

/// Creates the resumable state of a coroutine function.
pub trait GeneratorFactory: Send + Sync {
    /// Creates a fresh coroutine, suspended before its first statement.
    fn create(&self) -> Box<dyn Coroutine>;
}

impl<F> GeneratorFactory for F
where
    F: Fn() -> Box<dyn Coroutine> + Send + Sync,
{
    fn create(&self) -> Box<dyn Coroutine> {
        self()
    }
}

/// Explicit resumable state of a suspend/resume function body.
pub trait Coroutine: Send {
    /// Runs the body from its saved state up to its next suspension point
    /// (or its end).
    ///
    /// When [Unwind::RedirectToGeneratorLoop] is raised at a sequence point,
    /// `resume` is called again in the generator loop: the state must still
    /// be the one it had when that sequence point was reported, so the body
    /// continues from there.
    fn resume(&mut self, activation: &mut Activation<'_>) -> Result<GeneratorStep, Unwind>;
}

/// Outcome of one coroutine advance.
#[derive(Clone, Debug)]
pub enum GeneratorStep {
    /// The body suspended, producing a value.
    Yielded(Value),

    /// The body ran to completion.
    Completed(Option<Value>),
}

impl GeneratorStep {
    /// Value produced by the advance.
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Yielded(value) => Some(value),
            Self::Completed(value) => value.as_ref(),
        }
    }
}

/// Logical activation of a coroutine function, driven by repeated advances.
///
/// Its frame is created on the first advance and kept across suspensions: it
/// is only on the thread stack while an advance runs.
pub struct Generator {
    function: Arc<FunctionInfo>,
    coroutine: Box<dyn Coroutine>,
    locals: Option<Arc<Locals>>,
    frame: Option<Arc<Frame>>,
    completed: bool,
}

impl Generator {
    /// Creates the coroutine of `function`, binding `args` to its parameters.
    pub fn new(
        function: &Arc<FunctionInfo>,
        args: impl IntoIterator<Item = Value>,
    ) -> crate::Result<Self> {
        let Some(factory) = function.generator_factory() else {
            return Err(crate::Error::NoGeneratorLoop(function.name().to_owned()));
        };

        let locals = Locals::for_function(function);
        bind_arguments(function, locals.as_deref(), args);

        Ok(Self {
            function: function.clone(),
            coroutine: factory.create(),
            locals,
            frame: None,
            completed: false,
        })
    }

    /// Coroutine function.
    pub fn function(&self) -> &Arc<FunctionInfo> {
        &self.function
    }

    /// Frame of the logical activation, once advanced.
    pub fn frame(&self) -> Option<&Arc<Frame>> {
        self.frame.as_ref()
    }

    /// Whether the body ran to completion (or failed).
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Resumes the body on the calling thread until its next suspension.
    ///
    /// The advance runs in the generator loop if the function's file is being
    /// stepped or a switch was requested through
    /// [Frame::request_generator_loop]; a switch requested during a fast-path
    /// advance restarts it in the loop.
    pub fn advance(&mut self, context: &DebugContext) -> Result<GeneratorStep, Unwind> {
        if self.completed {
            return Err(crate::Error::GeneratorExhausted(self.function.name().to_owned()).into());
        }

        let thread = context.current_thread();

        let frame = match self.frame.take() {
            Some(frame) if frame.thread_id() == thread.id() => frame,
            Some(frame) => {
                tracing::debug!(
                    function = self.function.name(),
                    from = frame.thread_id(),
                    to = thread.id(),
                    "generator frame rebound"
                );
                frame.rebind(thread.id())
            }
            None => Frame::new(
                thread.id(),
                self.function.clone(),
                None,
                self.locals.clone(),
            ),
        };
        self.frame = Some(frame.clone());

        let requested = frame.take_force_switch();
        let in_loop = requested || entry_mode(context, &self.function) == DebugMode::FullyEnabled;
        if in_loop {
            frame.enter_generator_loop();
        }

        let depth = thread.push_materialized(frame.clone());
        let mut activation = Activation::resumed(context, thread, frame.clone(), depth, in_loop);

        let entered = match activation.enter() {
            Err(Unwind::RedirectToGeneratorLoop) if !activation.in_generator_loop() => {
                activation.switch_to_generator_loop();
                Ok(())
            }
            entered => entered,
        };

        let coroutine = &mut self.coroutine;
        let result = entered.and_then(|()| {
            loop {
                match coroutine.resume(&mut activation) {
                    Err(Unwind::RedirectToGeneratorLoop) if !activation.in_generator_loop() => {
                        activation.switch_to_generator_loop();
                    }
                    result => break result,
                }
            }
        });

        let result = activation.finish(result, GeneratorStep::value);
        frame.leave_generator_loop();

        self.completed = !matches!(result, Ok(GeneratorStep::Yielded(_)));

        result
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("function", &self.function.name())
            .field("frame", &self.frame)
            .field("completed", &self.completed)
            .finish()
    }
}

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use stepwise_engine::instrument::{Activation, Coroutine, Generator, GeneratorStep, invoke};
use stepwise_engine::{
    DebugContext, Exception, FunctionInfo, SourceSpan, Unwind, Value, VariableFlags, VariableInfo,
    value,
};

use crate::error::ScriptError;
use crate::recorder::EventLog;
use crate::script::{FunctionDef, OperandStmt, ScriptItem, Statement, VariableDef};

/// Type name of variables declared without one.
const DEFAULT_TYPE: &str = "object";

/// Outcome of one top-level run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Function run.
    pub function: String,

    /// ID of the thread stack the run used.
    pub thread: u64,

    /// Returned value, or the exception that escaped the run.
    pub result: Result<Option<Value>, Exception>,
}

/// Script body of a function, attached as its payload.
struct FunctionBody(Arc<[Statement]>);

/// How control leaves a statement.
enum Flow {
    Next,
    Return(Option<Value>),
    Yield(Value),
}

/// Latest version of every function defined so far.
#[derive(Default)]
struct Program {
    functions: Mutex<IndexMap<String, Arc<FunctionInfo>>>,
}

/// Executes scripts against a debug context.
pub struct Interpreter {
    context: Arc<DebugContext>,
    program: Arc<Program>,

    /// Breakpoints re-armed on every new definition.
    breakpoints: Vec<SourceSpan>,
}

impl Interpreter {
    /// Creates an interpreter with no function defined.
    pub fn new(context: Arc<DebugContext>) -> Self {
        Self {
            context,
            program: Arc::default(),
            breakpoints: Vec::new(),
        }
    }

    /// Debug context the script runs in.
    pub fn context(&self) -> &Arc<DebugContext> {
        &self.context
    }

    /// Arms a breakpoint, now and in every function defined later.
    pub fn add_breakpoint(&mut self, span: SourceSpan) -> usize {
        let count = self.context.set_breakpoint(&span, true);
        self.breakpoints.push(span);
        count
    }

    /// Disarms a breakpoint.
    pub fn remove_breakpoint(&mut self, span: &SourceSpan) -> usize {
        self.breakpoints.retain(|armed| armed != span);
        self.context.set_breakpoint(span, false)
    }

    /// Executes the items of a script in order, logging each run outcome.
    pub fn execute(&mut self, items: Vec<ScriptItem>, log: &EventLog) -> Result<(), ScriptError> {
        for item in items {
            match item {
                ScriptItem::Function(def) => {
                    self.define(def, false)?;
                }
                ScriptItem::Generator(def) => {
                    self.define(def, true)?;
                }
                ScriptItem::DebugMode(item) => self.context.set_debug_mode(item.mode.into()),
                ScriptItem::FileMode(item) => self
                    .context
                    .source_file(&item.file)
                    .set_mode(item.mode.into()),
                ScriptItem::Breakpoint(breakpoint) => {
                    self.add_breakpoint(breakpoint.span());
                }
                ScriptItem::ClearBreakpoint(breakpoint) => {
                    self.remove_breakpoint(&breakpoint.span());
                }
                ScriptItem::ResetFile(item) => {
                    self.context.reset_source_file(&item.file);
                }
                ScriptItem::Run(run) => log.push_outcome(&self.run(&run.function, &run.args)?),
                ScriptItem::Spawn(run) => log.push_outcome(&self.spawn(&run.function, &run.args)?),
            }
        }

        Ok(())
    }

    /// Compiles and registers a function.
    ///
    /// Redefining a name inserts the new function as the latest version of
    /// the previous one.
    pub fn define(
        &mut self,
        def: FunctionDef,
        generator: bool,
    ) -> Result<Arc<FunctionInfo>, ScriptError> {
        let FunctionDef {
            name,
            file,
            params,
            locals,
            captured,
            points,
            body,
        } = def;

        if has_misplaced_yield(&body.statements, generator) {
            return Err(ScriptError::MisplacedYield(name));
        }

        let mut builder = FunctionInfo::builder(name.as_str());
        for param in &params {
            builder.parameter(&param.name, type_name(param));
        }
        for local in &locals {
            builder.local(&local.name, type_name(local));
        }
        for local in &captured {
            builder.variable(
                Some(local.name.as_str()),
                type_name(local),
                VariableFlags::LOCAL.captured(),
            );
        }
        for point in &points {
            builder
                .sequence_point(point.span(&file))
                .map_err(|source| definition_error(&name, source))?;
        }

        let statements: Arc<[Statement]> = body.statements.into();
        let mut builder = builder.payload(FunctionBody(statements.clone()));

        if generator {
            let program = Arc::downgrade(&self.program);
            builder = builder.generator(move || {
                Box::new(ScriptCoroutine {
                    program: program.clone(),
                    body: statements.clone(),
                    pc: 0,
                }) as Box<dyn Coroutine>
            });
        }

        let function = builder.build();
        self.context
            .register_function(&function)
            .map_err(|source| definition_error(&name, source))?;

        let previous = self
            .program
            .functions
            .lock()
            .insert(name.clone(), function.clone());

        let version = match previous {
            Some(previous) => self
                .context
                .insert_version(&previous, &function)
                .map_err(|source| definition_error(&name, source))?,
            None => 0,
        };

        for span in &self.breakpoints {
            self.context.set_breakpoint(span, true);
        }

        tracing::debug!(function = %name, version, generator, "function defined");

        Ok(function)
    }

    /// Runs a function to completion on the calling thread.
    ///
    /// A coroutine function is advanced until it completes, its outcome being
    /// the last value it produced.
    pub fn run(&self, name: &str, args: &[i64]) -> Result<RunOutcome, ScriptError> {
        let function = self
            .program
            .lookup(name)
            .ok_or_else(|| ScriptError::UnknownFunction(name.to_owned()))?;

        let thread = self.context.current_thread().id();
        let args = args.iter().map(|&arg| value(arg));

        let res = if function.generator_factory().is_some() {
            self.program.iterate(&self.context, &function, args, None)
        } else {
            invoke(&self.context, &function, args, |activation| {
                self.program.execute(activation)
            })
        };

        let result = match res {
            Ok(value) => Ok(value),
            Err(Unwind::Throw(exception)) => Err(exception),
            Err(source) => {
                return Err(ScriptError::Aborted {
                    function: name.to_owned(),
                    source,
                });
            }
        };

        tracing::debug!(function = name, thread, ok = result.is_ok(), "run finished");

        Ok(RunOutcome {
            function: name.to_owned(),
            thread,
            result,
        })
    }

    /// Runs a function on a new thread, waiting for it.
    pub fn spawn(&self, name: &str, args: &[i64]) -> Result<RunOutcome, ScriptError> {
        std::thread::scope(|s| {
            s.spawn(|| self.run(name, args))
                .join()
                .unwrap_or_else(|_| Err(ScriptError::ThreadPanicked(name.to_owned())))
        })
    }
}

fn definition_error(function: &str, source: stepwise_engine::Error) -> ScriptError {
    ScriptError::Definition {
        function: function.to_owned(),
        source,
    }
}

fn type_name(variable: &VariableDef) -> &str {
    variable.ty.as_deref().unwrap_or(DEFAULT_TYPE)
}

fn contains_yield(statements: &[Statement]) -> bool {
    statements.iter().any(|statement| match statement {
        Statement::Yield(_) => true,
        Statement::Try(guarded) => contains_yield(&guarded.body),
        _ => false,
    })
}

/// Coroutines only suspend from the top level of their body.
fn has_misplaced_yield(statements: &[Statement], generator: bool) -> bool {
    if !generator {
        return contains_yield(statements);
    }

    statements
        .iter()
        .any(|statement| matches!(statement, Statement::Try(guarded) if contains_yield(&guarded.body)))
}

fn body_of(function: &FunctionInfo) -> Option<Arc<[Statement]>> {
    let body = function.payload()?.downcast_ref::<FunctionBody>()?;
    Some(body.0.clone())
}

/// Value of variables assigned nothing.
fn none() -> Value {
    value(())
}

/// Throws a runtime error, the way the runtime reports a faulty program.
fn runtime_error(activation: &mut Activation<'_>, message: String) -> Unwind {
    activation.throw(value(message))
}

fn variable_index(activation: &Activation<'_>, name: &str) -> Option<usize> {
    activation
        .function()
        .variable(name)
        .map(VariableInfo::global_index)
}

fn read_local(activation: &mut Activation<'_>, name: &str) -> Result<Value, Unwind> {
    let Some(index) = variable_index(activation, name) else {
        return Err(runtime_error(
            activation,
            format!("name '{name}' is not defined"),
        ));
    };

    match activation.local(index) {
        Some(value) => Ok(value),
        None => Err(runtime_error(
            activation,
            format!("local '{name}' referenced before assignment"),
        )),
    }
}

fn write_local(activation: &mut Activation<'_>, name: &str, value: Value) -> Result<(), Unwind> {
    match variable_index(activation, name) {
        Some(index) if activation.set_local(index, value) => Ok(()),
        _ => Err(runtime_error(
            activation,
            format!("name '{name}' is not defined"),
        )),
    }
}

fn operand(activation: &mut Activation<'_>, op: &OperandStmt) -> Result<Option<Value>, Unwind> {
    match (&op.local, op.value) {
        (Some(local), _) => read_local(activation, local).map(Some),
        (None, Some(literal)) => Ok(Some(value(literal))),
        (None, None) => Ok(None),
    }
}

impl Program {
    fn lookup(&self, name: &str) -> Option<Arc<FunctionInfo>> {
        self.functions.lock().get(name).cloned()
    }

    /// Body of a plain function.
    fn execute(&self, activation: &mut Activation<'_>) -> Result<Option<Value>, Unwind> {
        let Some(body) = body_of(activation.function()) else {
            return Ok(None);
        };

        match self.exec_block(activation, &body)? {
            Flow::Next => Ok(None),
            Flow::Return(value) => Ok(value),
            // rejected when defined
            Flow::Yield(value) => Ok(Some(value)),
        }
    }

    /// Advances a new coroutine until it completes, or `limit` values.
    fn iterate(
        &self,
        context: &DebugContext,
        function: &Arc<FunctionInfo>,
        args: impl IntoIterator<Item = Value>,
        limit: Option<usize>,
    ) -> Result<Option<Value>, Unwind> {
        let mut generator = Generator::new(function, args)?;
        let mut last = None;
        let mut pulled = 0;

        while limit.is_none_or(|limit| pulled < limit) {
            match generator.advance(context)? {
                GeneratorStep::Yielded(value) => {
                    last = Some(value);
                    pulled += 1;
                }
                GeneratorStep::Completed(value) => {
                    if value.is_some() {
                        last = value;
                    }
                    break;
                }
            }
        }

        Ok(last)
    }

    fn exec_block(
        &self,
        activation: &mut Activation<'_>,
        statements: &[Statement],
    ) -> Result<Flow, Unwind> {
        for statement in statements {
            match self.exec(activation, statement)? {
                Flow::Next => (),
                flow => return Ok(flow),
            }
        }

        Ok(Flow::Next)
    }

    fn exec(&self, activation: &mut Activation<'_>, statement: &Statement) -> Result<Flow, Unwind> {
        match statement {
            Statement::Step(step) => activation.sequence_point(step.cookie)?,
            Statement::Set(set) => {
                let value = match (&set.local, set.value) {
                    (Some(local), _) => read_local(activation, local)?,
                    (None, Some(literal)) => value(literal),
                    (None, None) => none(),
                };
                write_local(activation, &set.name, value)?;
            }
            Statement::Call(call) => {
                let returned = self.call(activation, &call.function, &call.args)?;
                if let Some(into) = &call.into {
                    write_local(activation, into, returned.unwrap_or_else(none))?;
                }
            }
            Statement::Iterate(iterate) => {
                let generator = self
                    .lookup(&iterate.function)
                    .filter(|function| function.generator_factory().is_some());

                let Some(generator) = generator else {
                    return Err(runtime_error(
                        activation,
                        format!("'{}' is not a generator", iterate.function),
                    ));
                };

                let args = iterate.args.iter().map(|&arg| value(arg));
                let last = self.iterate(activation.context(), &generator, args, iterate.limit)?;

                if let Some(into) = &iterate.into {
                    write_local(activation, into, last.unwrap_or_else(none))?;
                }
            }
            Statement::Throw(op) => {
                let thrown = operand(activation, op)?.unwrap_or_else(none);
                return Err(activation.throw(thrown));
            }
            Statement::Return(op) => return Ok(Flow::Return(operand(activation, op)?)),
            Statement::Yield(op) => {
                return Ok(Flow::Yield(operand(activation, op)?.unwrap_or_else(none)));
            }
            Statement::Try(guarded) => {
                let res = self.exec_block(activation, &guarded.body);

                match activation.catch(res)? {
                    Ok(Flow::Next) => (),
                    Ok(flow) => return Ok(flow),
                    Err(exception) => {
                        tracing::debug!(
                            function = activation.function().name(),
                            %exception,
                            "exception caught"
                        );

                        if let Some(local) = &guarded.catch {
                            write_local(activation, local, exception.value().clone())?;
                        }
                    }
                }
            }
        }

        Ok(Flow::Next)
    }

    fn call(
        &self,
        activation: &mut Activation<'_>,
        name: &str,
        args: &[i64],
    ) -> Result<Option<Value>, Unwind> {
        let Some(function) = self.lookup(name) else {
            return Err(runtime_error(
                activation,
                format!("name '{name}' is not defined"),
            ));
        };

        if function.generator_factory().is_some() {
            return Err(runtime_error(
                activation,
                format!("'{name}' is a generator"),
            ));
        }

        let args = args.iter().map(|&arg| value(arg)).collect::<Vec<_>>();
        activation.call(&function, args, |callee| self.execute(callee))
    }
}

/// Resumable state of a script coroutine: the index of the next top-level
/// statement.
struct ScriptCoroutine {
    program: Weak<Program>,
    body: Arc<[Statement]>,
    pc: usize,
}

impl Coroutine for ScriptCoroutine {
    fn resume(&mut self, activation: &mut Activation<'_>) -> Result<GeneratorStep, Unwind> {
        let Some(program) = self.program.upgrade() else {
            return Ok(GeneratorStep::Completed(None));
        };
        let body = self.body.clone();

        while let Some(statement) = body.get(self.pc) {
            // a statement is only done once it ran through
            let flow = program.exec(activation, statement)?;
            self.pc += 1;

            match flow {
                Flow::Next => (),
                Flow::Return(value) => {
                    self.pc = body.len();
                    return Ok(GeneratorStep::Completed(value));
                }
                Flow::Yield(value) => return Ok(GeneratorStep::Yielded(value)),
            }
        }

        Ok(GeneratorStep::Completed(None))
    }
}

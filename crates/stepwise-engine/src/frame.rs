use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::function::{FunctionInfo, VariableInfo};
use crate::span::SourceSpan;
use crate::value::Value;

/// Sentinel stored in atomics for "no location reached yet".
const NO_LOCATION: usize = usize::MAX;

/// Shared box holding a captured variable.
///
/// Closures created by the instrumented body and the debugger both go through
/// the same cell, so writes are observed on both sides.
pub type CapturedCell = Arc<Mutex<Option<Value>>>;

/// Storage of an activation's variables, addressed by global index.
///
/// Direct and captured variables are accessed the same way; only captured
/// ones can be shared outside the activation with [Locals::captured_cell].
pub struct Locals {
    slots: Box<[LocalSlot]>,
}

enum LocalSlot {
    Direct(Mutex<Option<Value>>),
    Captured(CapturedCell),
}

impl LocalSlot {
    fn cell(&self) -> &Mutex<Option<Value>> {
        match self {
            Self::Direct(cell) => cell,
            Self::Captured(cell) => cell,
        }
    }
}

impl Locals {
    /// Allocates the locals of one activation of `function`.
    ///
    /// Functions without variables get no storage at all.
    pub fn for_function(function: &FunctionInfo) -> Option<Arc<Self>> {
        if function.variables().is_empty() {
            return None;
        }

        let slots = function
            .variables()
            .iter()
            .map(|var| {
                if var.is_captured() {
                    LocalSlot::Captured(Arc::default())
                } else {
                    LocalSlot::Direct(Mutex::new(None))
                }
            })
            .collect();

        Some(Arc::new(Self { slots }))
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there is no slot.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Reads the slot at the given global index.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.slots.get(index).and_then(|slot| slot.cell().lock().clone())
    }

    /// Writes the slot at the given global index, returning whether it exists.
    pub fn set(&self, index: usize, value: Option<Value>) -> bool {
        match self.slots.get(index) {
            Some(slot) => {
                *slot.cell().lock() = value;
                true
            }
            None => false,
        }
    }

    /// Returns the shared cell of a captured variable.
    pub fn captured_cell(&self, index: usize) -> Option<CapturedCell> {
        match self.slots.get(index)? {
            LocalSlot::Captured(cell) => Some(cell.clone()),
            LocalSlot::Direct(_) => None,
        }
    }
}

#[derive(Clone, Copy, Default)]
struct GeneratorFlags {
    in_loop: bool,
    force_switch: bool,
}

/// Debugger view of one live activation.
///
/// Frames are only materialized when something needs them (an event
/// subscriber walking the stack, or a coroutine keeping its logical frame
/// across suspensions).
pub struct Frame {
    thread_id: u64,
    function: Arc<FunctionInfo>,
    location: AtomicUsize,
    locals: Option<Arc<Locals>>,
    generator: Mutex<GeneratorFlags>,
    in_traceback: AtomicBool,
}

impl Frame {
    pub(crate) fn new(
        thread_id: u64,
        function: Arc<FunctionInfo>,
        location: Option<usize>,
        locals: Option<Arc<Locals>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            thread_id,
            function,
            location: AtomicUsize::new(location.unwrap_or(NO_LOCATION)),
            locals,
            generator: Mutex::new(GeneratorFlags::default()),
            in_traceback: AtomicBool::new(false),
        })
    }

    /// Creates the same logical frame, owned by another thread.
    ///
    /// A pending switch to the generator loop is carried over.
    pub(crate) fn rebind(&self, thread_id: u64) -> Arc<Self> {
        let flags = *self.generator.lock();

        let frame = Self::new(
            thread_id,
            self.function.clone(),
            self.location(),
            self.locals.clone(),
        );
        frame.generator.lock().force_switch = flags.force_switch;
        frame
    }

    /// ID of the thread owning this frame.
    pub const fn thread_id(&self) -> u64 {
        self.thread_id
    }

    /// Metadata of the executing function (the version this frame runs).
    pub fn function(&self) -> &Arc<FunctionInfo> {
        &self.function
    }

    /// Current location cookie, `None` before the first sequence point.
    pub fn location(&self) -> Option<usize> {
        match self.location.load(Ordering::Acquire) {
            NO_LOCATION => None,
            cookie => Some(cookie),
        }
    }

    /// Source span of the current location.
    pub fn location_span(&self) -> Option<&SourceSpan> {
        self.location()
            .and_then(|cookie| self.function.sequence_point(cookie))
    }

    pub(crate) fn set_location(&self, location: Option<usize>) {
        self.location
            .store(location.unwrap_or(NO_LOCATION), Ordering::Release);
    }

    /// Locals storage of the activation.
    pub fn locals(&self) -> Option<&Arc<Locals>> {
        self.locals.as_ref()
    }

    /// Variables visible at the current location.
    ///
    /// Before the first sequence point, every variable is reported.
    pub fn visible_variables(&self) -> Vec<&VariableInfo> {
        match self.location() {
            Some(cookie) => self.function.variables_in_scope(cookie).collect(),
            None => self.function.variables().iter().collect(),
        }
    }

    /// Reads a variable by name.
    pub fn get_local(&self, name: &str) -> Option<Value> {
        let var = self.function.variable(name)?;
        self.locals.as_ref()?.get(var.global_index())
    }

    /// Writes a variable by name, returning whether it exists.
    pub fn set_local(&self, name: &str, value: Value) -> bool {
        let (Some(var), Some(locals)) = (self.function.variable(name), self.locals.as_ref()) else {
            return false;
        };
        locals.set(var.global_index(), Some(value))
    }

    /// Whether a coroutine advance currently runs this frame in the generator
    /// loop.
    pub fn in_generator_loop(&self) -> bool {
        self.generator.lock().in_loop
    }

    /// Whether a switch to the generator loop is pending.
    pub fn force_switch_to_generator_loop(&self) -> bool {
        self.generator.lock().force_switch
    }

    /// Requests that the coroutine running in this frame continues in the
    /// generator loop, where every sequence point is observable.
    ///
    /// If the frame is mid-advance on the fast path, the advance is redirected
    /// as soon as the current event returns; otherwise the next advance starts
    /// in the loop.
    pub fn request_generator_loop(&self) -> crate::Result<()> {
        if !self.function.is_generator() {
            return Err(crate::Error::NoGeneratorLoop(
                self.function.name().to_owned(),
            ));
        }

        let mut flags = self.generator.lock();
        if !flags.in_loop {
            flags.force_switch = true;
        }

        Ok(())
    }

    /// Checks the generator flags for the mutual-exclusion invariant and
    /// returns whether a redirect to the generator loop is due.
    pub(crate) fn redirect_pending(&self) -> bool {
        let flags = *self.generator.lock();
        assert!(
            !(flags.in_loop && flags.force_switch),
            "frame of {} is both in the generator loop and switching to it",
            self.function.name()
        );
        flags.force_switch
    }

    /// Enters the generator loop, consuming any pending switch request.
    pub(crate) fn enter_generator_loop(&self) {
        let mut flags = self.generator.lock();
        flags.force_switch = false;
        flags.in_loop = true;
    }

    pub(crate) fn leave_generator_loop(&self) {
        self.generator.lock().in_loop = false;
    }

    /// Consumes a pending switch request.
    pub(crate) fn take_force_switch(&self) -> bool {
        std::mem::take(&mut self.generator.lock().force_switch)
    }

    /// Whether an event subscriber is currently running for this frame.
    pub fn is_in_traceback(&self) -> bool {
        self.in_traceback.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_traceback(&self, value: bool) {
        self.in_traceback.store(value, Ordering::Release);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("thread_id", &self.thread_id)
            .field("function", &self.function.name())
            .field("location", &self.location())
            .finish()
    }
}

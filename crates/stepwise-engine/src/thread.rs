use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::frame::{Frame, Locals};
use crate::function::FunctionInfo;
use crate::value::Exception;

/// Stack of the live instrumented activations of one OS thread.
///
/// Activations are recorded cheaply; their [Frame] is only created when an
/// event subscriber (or a coroutine) asks for it.
pub struct ThreadStack {
    id: u64,
    os_thread: ThreadId,
    name: Option<String>,
    frames: Mutex<Vec<FrameRecord>>,
    thrown_exception: Mutex<Option<Exception>>,
    in_traceback: AtomicBool,
}

struct FrameRecord {
    function: Arc<FunctionInfo>,
    location: Option<usize>,
    locals: Option<Arc<Locals>>,
    frame: Option<Arc<Frame>>,
}

/// Leaf activation of a thread, resolved without materializing its frame.
#[derive(Clone, Debug)]
pub struct LeafActivation {
    /// Executing function.
    pub function: Arc<FunctionInfo>,

    /// Current location cookie.
    pub location: Option<usize>,

    /// Index of the activation in the stack (0 is the outermost).
    pub depth: usize,
}

impl ThreadStack {
    pub(crate) fn new(id: u64, os_thread: ThreadId, name: Option<String>) -> Self {
        Self {
            id,
            os_thread,
            name,
            frames: Mutex::new(Vec::new()),
            thrown_exception: Mutex::new(None),
            in_traceback: AtomicBool::new(false),
        }
    }

    /// Numeric ID of the thread, unique within its debug context.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// ID of the OS thread.
    pub const fn os_thread_id(&self) -> ThreadId {
        self.os_thread
    }

    /// Name of the OS thread, if it had one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Pushes a new activation of `function`, returning its depth.
    ///
    /// Only instrumentation glue should call this; every push must be matched
    /// by one [pop_frame](Self::pop_frame).
    pub fn push_frame(&self, function: Arc<FunctionInfo>, locals: Option<Arc<Locals>>) -> usize {
        let mut frames = self.frames.lock();
        frames.push(FrameRecord {
            function,
            location: None,
            locals,
            frame: None,
        });
        frames.len() - 1
    }

    /// Pushes an already materialized frame (a resumed coroutine).
    pub(crate) fn push_materialized(&self, frame: Arc<Frame>) -> usize {
        debug_assert_eq!(frame.thread_id(), self.id);

        let mut frames = self.frames.lock();
        frames.push(FrameRecord {
            function: frame.function().clone(),
            location: frame.location(),
            locals: frame.locals().cloned(),
            frame: Some(frame),
        });
        frames.len() - 1
    }

    /// Pops the leaf activation, returning whether the stack is now empty.
    pub fn pop_frame(&self) -> crate::Result<bool> {
        let mut frames = self.frames.lock();

        if frames.pop().is_none() {
            return Err(crate::Error::StackUnderflow(self.id));
        }

        Ok(frames.is_empty())
    }

    /// Updates the location of the activation at `depth`.
    pub(crate) fn set_location(&self, depth: usize, location: Option<usize>) {
        let mut frames = self.frames.lock();

        if let Some(record) = frames.get_mut(depth) {
            record.location = location;
            if let Some(frame) = &record.frame {
                frame.set_location(location);
            }
        }
    }

    /// Number of live activations.
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Returns the leaf frame, if it has already been materialized.
    pub fn leaf_frame(&self) -> Option<Arc<Frame>> {
        self.frames.lock().last().and_then(|record| record.frame.clone())
    }

    /// Returns the leaf activation without materializing its frame.
    pub fn leaf_activation(&self) -> Option<LeafActivation> {
        let frames = self.frames.lock();

        frames.last().map(|record| LeafActivation {
            function: record.function.clone(),
            location: record.location,
            depth: frames.len() - 1,
        })
    }

    /// Returns the frame of the activation at `depth`, materializing it.
    pub fn frame(&self, depth: usize) -> Option<Arc<Frame>> {
        let mut frames = self.frames.lock();
        let is_leaf = depth + 1 == frames.len();
        let record = frames.get_mut(depth)?;
        Some(self.materialize(record, is_leaf))
    }

    /// Returns the leaf frame, materializing it.
    pub fn materialize_leaf_frame(&self) -> Option<Arc<Frame>> {
        let mut frames = self.frames.lock();
        let record = frames.last_mut()?;
        Some(self.materialize(record, true))
    }

    /// Returns every frame, outermost first (innermost last).
    pub fn frames(&self) -> Vec<Arc<Frame>> {
        let mut frames = self.frames.lock();
        let leaf = frames.len().saturating_sub(1);

        frames
            .iter_mut()
            .enumerate()
            .map(|(depth, record)| self.materialize(record, depth == leaf))
            .collect()
    }

    /// The reentrancy flag of a frame is only ever set on the leaf.
    fn materialize(&self, record: &mut FrameRecord, is_leaf: bool) -> Arc<Frame> {
        record
            .frame
            .get_or_insert_with(|| {
                let frame = Frame::new(
                    self.id,
                    record.function.clone(),
                    record.location,
                    record.locals.clone(),
                );
                frame.set_in_traceback(is_leaf && self.is_in_traceback());
                frame
            })
            .clone()
    }

    /// Exception being reported to the event subscriber, if any.
    pub fn thrown_exception(&self) -> Option<Exception> {
        self.thrown_exception.lock().clone()
    }

    pub(crate) fn stash_exception(&self, exception: Option<Exception>) {
        *self.thrown_exception.lock() = exception;
    }

    /// Whether the event subscriber is currently running on this thread.
    pub fn is_in_traceback(&self) -> bool {
        self.in_traceback.load(Ordering::Acquire)
    }

    /// Sets the reentrancy flag, returning its previous value.
    pub(crate) fn swap_in_traceback(&self, value: bool) -> bool {
        self.in_traceback.swap(value, Ordering::AcqRel)
    }
}

impl fmt::Debug for ThreadStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadStack")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("frames", &self.frame_count())
            .finish()
    }
}

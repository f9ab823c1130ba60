mod builder;
mod dispatch;
mod source_file;

use std::cell::RefCell;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use indexmap::IndexMap;
use parking_lot::Mutex;

pub use self::builder::Builder;
use self::builder::NeedsSubscriber;
pub use self::source_file::{DebugMode, DebugSourceFile, UnknownDebugMode};
use crate::function::FunctionInfo;
use crate::handler::EventSubscriber;
use crate::span::SourceSpan;
use crate::thread::ThreadStack;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Stack of the current thread within the last context it ran in.
    static CURRENT_THREAD: RefCell<Option<CachedThread>> = const { RefCell::new(None) };
}

struct CachedThread {
    context_id: u64,
    context: Weak<DebugContext>,
    stack: Arc<ThreadStack>,
}

impl Drop for CachedThread {
    fn drop(&mut self) {
        if let Some(context) = self.context.upgrade() {
            context.release_thread(&self.stack);
        }
    }
}

/// Debug state of one language runtime.
///
/// It holds the global debug mode, the event subscriber, the debug state of
/// every source file with registered functions, and the frame stack of every
/// thread running instrumented code.
pub struct DebugContext {
    id: u64,
    this: Weak<DebugContext>,
    mode: AtomicU8,
    subscriber: Box<dyn EventSubscriber>,
    source_files: Mutex<IndexMap<Arc<str>, Arc<DebugSourceFile>>>,
    threads: Mutex<IndexMap<ThreadId, Arc<ThreadStack>>>,
    next_thread_id: AtomicU64,

    /// Serializes writers of trace-point bitmaps and version links.
    breakpoints: Mutex<()>,
}

impl DebugContext {
    /// Creates a debug context builder.
    pub const fn builder() -> Builder<NeedsSubscriber> {
        Builder::new()
    }

    fn new(subscriber: Box<dyn EventSubscriber>, mode: DebugMode) -> Arc<Self> {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(context = id, %mode, "debug context created");

        Arc::new_cyclic(|this| Self {
            id,
            this: this.clone(),
            mode: AtomicU8::new(mode as u8),
            subscriber,
            source_files: Mutex::new(IndexMap::new()),
            threads: Mutex::new(IndexMap::new()),
            next_thread_id: AtomicU64::new(1),
            breakpoints: Mutex::new(()),
        })
    }

    /// Global debug mode.
    pub fn debug_mode(&self) -> DebugMode {
        DebugMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Sets the global debug mode.
    ///
    /// The new mode is visible on every registered source file when this
    /// returns.
    pub fn set_debug_mode(&self, mode: DebugMode) {
        let files = self.source_files.lock();

        self.mode.store(mode as u8, Ordering::Release);
        for file in files.values() {
            file.set_mode(mode);
        }

        tracing::debug!(%mode, files = files.len(), "debug mode changed");
    }

    pub(crate) fn subscriber(&self) -> &dyn EventSubscriber {
        self.subscriber.as_ref()
    }

    /// Returns the debug state of a source file, creating it if needed.
    pub fn source_file(&self, path: &str) -> Arc<DebugSourceFile> {
        self.source_file_entry(&Arc::from(path))
    }

    fn source_file_entry(&self, path: &Arc<str>) -> Arc<DebugSourceFile> {
        let mut files = self.source_files.lock();

        if let Some(file) = files.get(path) {
            return file.clone();
        }

        tracing::debug!(path = &**path, "source file registered");

        let file = Arc::new(DebugSourceFile::new(path.clone(), self.debug_mode()));
        files.insert(path.clone(), file.clone());
        file
    }

    /// Returns the debug state of a source file, if it exists.
    pub fn lookup_source_file(&self, path: &str) -> Option<Arc<DebugSourceFile>> {
        self.source_files.lock().get(path).cloned()
    }

    /// Debug state of every registered source file.
    pub fn source_files(&self) -> Vec<Arc<DebugSourceFile>> {
        self.source_files.lock().values().cloned().collect()
    }

    /// Drops the debug state of a source file, returning whether it existed.
    ///
    /// Functions registered before keep the state they were bound to, so this
    /// is meant for files whose code is about to be reloaded.
    pub fn reset_source_file(&self, path: &str) -> bool {
        let removed = self.source_files.lock().shift_remove(path).is_some();

        if removed {
            tracing::debug!(path, "source file reset");
        }

        removed
    }

    /// Registers a function, binding each of its sequence points to the
    /// debug state of its source file.
    pub fn register_function(&self, function: &Arc<FunctionInfo>) -> crate::Result<()> {
        if function.is_registered() {
            return Err(crate::Error::AlreadyRegistered(function.name().to_owned()));
        }

        let files = function
            .sequence_points()
            .iter()
            .map(|point| self.source_file_entry(point.file_arc()))
            .collect::<Box<[_]>>();

        for file in files.iter() {
            file.add_function(function);
        }

        if !function.bind_source_files(files) {
            return Err(crate::Error::AlreadyRegistered(function.name().to_owned()));
        }

        tracing::debug!(
            function = function.name(),
            sequence_points = function.sequence_points().len(),
            "function registered"
        );

        Ok(())
    }

    /// Finds the sequence points matching `span`, in every registered
    /// function of the span's file and in every version of these functions.
    ///
    /// At most one sequence point is returned per function version: the first
    /// one intersecting `span`.
    pub fn find_sequence_points(&self, span: &SourceSpan) -> Vec<(Arc<FunctionInfo>, usize)> {
        let Some(file) = self.lookup_source_file(span.file()) else {
            return Vec::new();
        };

        let mut visited = Vec::<Arc<FunctionInfo>>::new();
        let mut found = Vec::new();

        for function in file.functions() {
            for version in function.versions() {
                if visited.iter().any(|v| Arc::ptr_eq(v, &version)) {
                    continue;
                }

                if let Some(cookie) = span.locate_in(&version) {
                    found.push((version.clone(), cookie));
                }
                visited.push(version);
            }
        }

        found
    }

    /// Arms (or disarms) the sequence points matching `span`, returning how
    /// many were toggled.
    pub fn set_breakpoint(&self, span: &SourceSpan, enabled: bool) -> usize {
        let points = self.find_sequence_points(span);

        let _guard = self.breakpoints.lock();
        for (function, cookie) in &points {
            function.set_trace_point(*cookie, enabled);
        }

        tracing::debug!(%span, enabled, count = points.len(), "breakpoint toggled");

        points.len()
    }

    /// Arms (or disarms) one sequence point of a function.
    pub fn set_trace_point(
        &self,
        function: &FunctionInfo,
        cookie: usize,
        enabled: bool,
    ) -> crate::Result<()> {
        let _guard = self.breakpoints.lock();

        if function.set_trace_point(cookie, enabled) {
            Ok(())
        } else {
            Err(crate::Error::InvalidSequencePoint(
                function.name().to_owned(),
                cookie,
            ))
        }
    }

    /// Links `newer` as the latest version of the function `older` belongs
    /// to, returning its version number.
    ///
    /// Frames still running an older version keep using it.
    pub fn insert_version(
        &self,
        older: &Arc<FunctionInfo>,
        newer: &Arc<FunctionInfo>,
    ) -> crate::Result<u32> {
        let _guard = self.breakpoints.lock();

        let version = older.append_version(newer)?;

        tracing::debug!(function = newer.name(), version, "function version inserted");

        Ok(version)
    }

    /// Returns the stack of the calling thread, creating it on first use.
    pub fn current_thread(&self) -> Arc<ThreadStack> {
        let cached = CURRENT_THREAD.try_with(|slot| {
            slot.borrow()
                .as_ref()
                .filter(|cached| cached.context_id == self.id)
                .map(|cached| cached.stack.clone())
        });

        if let Ok(Some(stack)) = cached {
            return stack;
        }

        let stack = self.register_current_thread();

        // the thread-local is gone while the thread is exiting
        let _ = CURRENT_THREAD.try_with(|slot| {
            slot.replace(Some(CachedThread {
                context_id: self.id,
                context: self.this.clone(),
                stack: stack.clone(),
            }))
        });

        stack
    }

    fn register_current_thread(&self) -> Arc<ThreadStack> {
        let current = std::thread::current();
        let mut threads = self.threads.lock();

        threads
            .entry(current.id())
            .or_insert_with(|| {
                let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);

                tracing::debug!(tid = id, name = current.name(), "thread stack created");

                Arc::new(ThreadStack::new(
                    id,
                    current.id(),
                    current.name().map(str::to_owned),
                ))
            })
            .clone()
    }

    /// Forgets the stack of a thread leaving this context.
    ///
    /// Stacks with live frames are kept: the thread will come back to them.
    fn release_thread(&self, stack: &Arc<ThreadStack>) {
        if stack.frame_count() > 0 {
            return;
        }

        let mut threads = self.threads.lock();
        if threads
            .get(&stack.os_thread_id())
            .is_some_and(|s| Arc::ptr_eq(s, stack))
        {
            threads.shift_remove(&stack.os_thread_id());
            tracing::debug!(tid = stack.id(), "thread stack released");
        }
    }

    /// Stacks of the threads with at least one live frame.
    pub fn threads(&self) -> Vec<Arc<ThreadStack>> {
        self.threads
            .lock()
            .values()
            .filter(|stack| stack.frame_count() > 0)
            .cloned()
            .collect()
    }
}

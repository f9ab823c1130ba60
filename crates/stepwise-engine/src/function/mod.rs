mod builder;
mod variable;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

pub use self::builder::FunctionBuilder;
pub use self::variable::{VariableFlags, VariableInfo};
use crate::context::DebugSourceFile;
use crate::instrument::GeneratorFactory;
use crate::span::SourceSpan;

/// Debug metadata of one compiled function.
///
/// Everything but the trace-point bitmap and the version links is immutable
/// once built. Both mutable parts are written through
/// [DebugContext](crate::DebugContext), which serializes writers; the bitmap
/// is read lock-free by instrumented code.
pub struct FunctionInfo {
    name: String,

    /// Sequence points, in the order the compiler established them.
    sequence_points: Box<[SourceSpan]>,

    variables: Box<[VariableInfo]>,

    /// Variable indices grouped by lexical depth.
    scopes: Box<[Box<[usize]>]>,

    /// Variable indices visible at each sequence point.
    variables_in_scope: Box<[Box<[usize]>]>,

    generator_factory: Option<Arc<dyn GeneratorFactory>>,

    payload: Option<Arc<dyn Any + Send + Sync>>,

    /// One armed flag per sequence point.
    trace_points: Box<[AtomicBool]>,

    versions: Mutex<VersionLinks>,

    /// Per-file debug state of each sequence point, set on registration.
    source_files: OnceLock<Box<[Arc<DebugSourceFile>]>>,
}

struct VersionLinks {
    version: u32,
    previous: Option<Arc<FunctionInfo>>,
    next: Option<Weak<FunctionInfo>>,
}

impl FunctionInfo {
    /// Creates a function builder.
    pub fn builder(name: impl Into<String>) -> FunctionBuilder {
        FunctionBuilder::new(name.into())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        name: String,
        sequence_points: Vec<SourceSpan>,
        variables: Vec<VariableInfo>,
        scopes: Vec<Box<[usize]>>,
        variables_in_scope: Vec<Box<[usize]>>,
        generator_factory: Option<Arc<dyn GeneratorFactory>>,
        payload: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        let trace_points = sequence_points
            .iter()
            .map(|_| AtomicBool::new(false))
            .collect();

        Self {
            name,
            sequence_points: sequence_points.into_boxed_slice(),
            variables: variables.into_boxed_slice(),
            scopes: scopes.into_boxed_slice(),
            variables_in_scope: variables_in_scope.into_boxed_slice(),
            generator_factory,
            payload,
            trace_points,
            versions: Mutex::new(VersionLinks {
                version: 0,
                previous: None,
                next: None,
            }),
            source_files: OnceLock::new(),
        }
    }

    /// Name of the function.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sequence-point table, indexed by location cookie.
    pub fn sequence_points(&self) -> &[SourceSpan] {
        &self.sequence_points
    }

    /// Returns the span of the given location cookie.
    pub fn sequence_point(&self, cookie: usize) -> Option<&SourceSpan> {
        self.sequence_points.get(cookie)
    }

    /// All variables of the function, ordered by global index.
    pub fn variables(&self) -> &[VariableInfo] {
        &self.variables
    }

    /// Returns the variable with the given (unique) name.
    pub fn variable(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.iter().find(|var| var.name() == name)
    }

    /// Variables grouped by lexical depth (index 0 is the function scope).
    pub fn scopes(&self) -> impl Iterator<Item = impl Iterator<Item = &VariableInfo>> {
        self.scopes
            .iter()
            .map(|scope| scope.iter().map(|&i| &self.variables[i]))
    }

    /// Variables visible at the given location cookie, outermost first.
    pub fn variables_in_scope(&self, cookie: usize) -> impl Iterator<Item = &VariableInfo> {
        self.variables_in_scope
            .get(cookie)
            .into_iter()
            .flat_map(|scope| scope.iter().map(|&i| &self.variables[i]))
    }

    /// Factory of the resumable form of the body, for coroutine functions.
    pub fn generator_factory(&self) -> Option<&Arc<dyn GeneratorFactory>> {
        self.generator_factory.as_ref()
    }

    /// Whether the body is a suspend/resume construct.
    pub const fn is_generator(&self) -> bool {
        self.generator_factory.is_some()
    }

    /// Language-specific payload attached by the compiler.
    pub fn payload(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.payload.as_ref()
    }

    /// Returns whether the given location is armed.
    ///
    /// Out-of-range cookies are never armed.
    #[inline]
    pub fn is_trace_point(&self, cookie: usize) -> bool {
        self.trace_points
            .get(cookie)
            .is_some_and(|bit| bit.load(Ordering::Acquire))
    }

    /// Snapshot of the trace-point bitmap.
    pub fn trace_points(&self) -> Vec<bool> {
        self.trace_points
            .iter()
            .map(|bit| bit.load(Ordering::Acquire))
            .collect()
    }

    /// Arms or disarms a location, returning whether the cookie is valid.
    ///
    /// Writers are serialized by the debug context.
    pub(crate) fn set_trace_point(&self, cookie: usize, enabled: bool) -> bool {
        match self.trace_points.get(cookie) {
            Some(bit) => {
                bit.store(enabled, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Version number within the function's version chain (0 for the first).
    pub fn version(&self) -> u32 {
        self.versions.lock().version
    }

    /// Previous (older) version of this function.
    pub fn previous_version(&self) -> Option<Arc<FunctionInfo>> {
        self.versions.lock().previous.clone()
    }

    /// Next (newer) version of this function, if still alive.
    pub fn next_version(&self) -> Option<Arc<FunctionInfo>> {
        self.versions.lock().next.as_ref().and_then(Weak::upgrade)
    }

    /// Returns the newest live version of this function.
    pub fn latest_version(self: &Arc<Self>) -> Arc<FunctionInfo> {
        let mut latest = self.clone();
        while let Some(next) = latest.next_version() {
            latest = next;
        }
        latest
    }

    /// Returns every live version of this function, oldest first.
    pub fn versions(self: &Arc<Self>) -> Vec<Arc<FunctionInfo>> {
        let mut oldest = self.clone();
        while let Some(previous) = oldest.previous_version() {
            oldest = previous;
        }

        let mut versions = vec![oldest];
        while let Some(next) = versions.last().and_then(|v| v.next_version()) {
            versions.push(next);
        }
        versions
    }

    /// Links `newer` after the latest version of `self`.
    ///
    /// Writers are serialized by the debug context.
    pub(crate) fn append_version(
        self: &Arc<Self>,
        newer: &Arc<FunctionInfo>,
    ) -> crate::Result<u32> {
        let chain = self.versions();

        let newer_is_linked = {
            let links = newer.versions.lock();
            links.previous.is_some() || links.next.as_ref().is_some_and(|n| n.strong_count() > 0)
        };

        if newer_is_linked || chain.iter().any(|v| Arc::ptr_eq(v, newer)) {
            return Err(crate::Error::VersionCycle(newer.name.clone()));
        }

        let latest = chain.last().cloned().unwrap_or_else(|| self.clone());

        let version = {
            let mut latest_links = latest.versions.lock();
            latest_links.next = Some(Arc::downgrade(newer));
            latest_links.version.saturating_add(1)
        };

        let mut newer_links = newer.versions.lock();
        newer_links.version = version;
        newer_links.previous = Some(latest);

        Ok(version)
    }

    pub(crate) fn bind_source_files(&self, files: Box<[Arc<DebugSourceFile>]>) -> bool {
        self.source_files.set(files).is_ok()
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.source_files.get().is_some()
    }

    /// Debug state of the file containing the given sequence point.
    pub(crate) fn source_file(&self, cookie: usize) -> Option<&Arc<DebugSourceFile>> {
        self.source_files.get().and_then(|files| files.get(cookie))
    }
}

impl fmt::Debug for FunctionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionInfo")
            .field("name", &self.name)
            .field("version", &self.version())
            .field("sequence_points", &self.sequence_points.len())
            .field("variables", &self.variables.len())
            .field("is_generator", &self.is_generator())
            .finish()
    }
}

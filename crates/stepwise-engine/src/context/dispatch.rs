use std::sync::Arc;

use super::DebugContext;
use crate::error::Unwind;
use crate::frame::Frame;
use crate::handler::{EventPayload, TraceEvent, TraceEventKind};
use crate::thread::ThreadStack;

/// Marks a thread as running the event subscriber.
///
/// Dropping it clears the reentrancy flags and the stashed exception, which
/// also happens when the subscriber fails or panics.
struct TracebackGuard<'a> {
    thread: &'a ThreadStack,
}

impl<'a> TracebackGuard<'a> {
    /// Returns `None` if the subscriber is already running on the thread.
    fn enter(thread: &'a ThreadStack) -> Option<Self> {
        if thread.swap_in_traceback(true) {
            return None;
        }

        if let Some(frame) = thread.leaf_frame() {
            frame.set_in_traceback(true);
        }

        Some(Self { thread })
    }
}

impl Drop for TracebackGuard<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.thread.leaf_frame() {
            frame.set_in_traceback(false);
        }

        self.thread.stash_exception(None);
        self.thread.swap_in_traceback(false);
    }
}

impl DebugContext {
    /// Reports an event of the calling thread to the event subscriber.
    ///
    /// After the subscriber returns, a pending redirect of the leaf frame to
    /// its generator loop is raised as [Unwind::RedirectToGeneratorLoop].
    pub(crate) fn dispatch(
        &self,
        thread: &Arc<ThreadStack>,
        kind: TraceEventKind,
        payload: EventPayload<'_>,
    ) -> Result<(), Unwind> {
        let Some(guard) = TracebackGuard::enter(thread) else {
            tracing::trace!(tid = thread.id(), %kind, "event suppressed in subscriber");
            return Ok(());
        };

        let leaf = match kind {
            TraceEventKind::ThreadExit => None,
            _ => thread.leaf_activation(),
        };

        if let EventPayload::Exception(exception) = payload {
            thread.stash_exception(Some(exception.clone()));
        }

        let event = TraceEvent {
            kind,
            thread,
            function: leaf.as_ref().map(|leaf| &leaf.function),
            location: leaf.as_ref().and_then(|leaf| leaf.location),
            depth: leaf.as_ref().map_or(usize::MAX, |leaf| leaf.depth),
            payload,
        };

        tracing::trace!(
            tid = thread.id(),
            %kind,
            function = event.function.map(|f| f.name()),
            location = event.location,
            depth = event.depth,
            "dispatching event"
        );

        let res = self.subscriber().on_event(&event);
        drop(guard);

        if let Err(e) = res {
            tracing::debug!(tid = thread.id(), %kind, error = %e, "event subscriber failed");
            return Err(e.into());
        }

        if thread.leaf_frame().as_deref().is_some_and(Frame::redirect_pending) {
            tracing::debug!(tid = thread.id(), "redirecting to generator loop");
            return Err(Unwind::RedirectToGeneratorLoop);
        }

        Ok(())
    }
}

use std::sync::Arc;

use super::{DebugContext, DebugMode};
use crate::handler::EventSubscriber;

/// Builder for [DebugContext].
///
/// It is usually created by calling [DebugContext::builder], and allows to
/// specify the event subscriber and the initial debug mode.
pub struct Builder<S> {
    state: S,
}

impl Builder<NeedsSubscriber> {
    pub(super) const fn new() -> Self {
        Self {
            state: NeedsSubscriber,
        }
    }

    /// Specifies the subscriber of instrumentation events.
    pub fn with_subscriber<H>(self, subscriber: H) -> Builder<ReadyToBuild>
    where
        H: EventSubscriber + 'static,
    {
        Builder {
            state: ReadyToBuild {
                subscriber: Box::new(subscriber),
                mode: DebugMode::default(),
            },
        }
    }
}

impl Builder<ReadyToBuild> {
    /// Specifies the initial debug mode (defaults to [DebugMode::Disabled]).
    pub fn debug_mode(mut self, mode: DebugMode) -> Self {
        self.state.mode = mode;
        self
    }

    /// Builds the debug context.
    pub fn build(self) -> Arc<DebugContext> {
        DebugContext::new(self.state.subscriber, self.state.mode)
    }
}

pub struct NeedsSubscriber;

pub struct ReadyToBuild {
    subscriber: Box<dyn EventSubscriber>,
    mode: DebugMode,
}

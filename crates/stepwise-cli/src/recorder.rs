use std::sync::Arc;

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use parking_lot::Mutex;
use stepwise_engine::handler::{EventPayload, EventSubscriber, TraceEvent, TraceEventKind};
use stepwise_engine::{Frame, SubscriberError, ThreadStack, Value, downcast};

use crate::interp::RunOutcome;

/// Ordered log of a debug session, shared between the subscriber and the
/// script driver.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<KdlNode>>>);

impl EventLog {
    /// Appends a node to the log.
    pub fn push(&self, node: KdlNode) {
        self.0.lock().push(node);
    }

    /// Appends the outcome of a top-level run.
    pub fn push_outcome(&self, outcome: &RunOutcome) {
        let mut node = KdlNode::new("run");
        node.entries_mut()
            .push(KdlEntry::new(outcome.function.as_str()));
        node.entries_mut()
            .push(KdlEntry::new_prop("thread", i128::from(outcome.thread)));

        match &outcome.result {
            Ok(Some(value)) => node.entries_mut().push(value_entry(Some("returned"), value)),
            Ok(None) => (),
            Err(exception) => node
                .entries_mut()
                .push(value_entry(Some("raised"), exception.value())),
        }

        self.push(node);
    }

    /// Renders the log as a KDL document.
    pub fn to_document(&self) -> KdlDocument {
        let mut kdl = KdlDocument::new();
        kdl.nodes_mut().extend(self.0.lock().iter().cloned());
        kdl.autoformat();
        kdl
    }
}

/// Event subscriber logging every event as a KDL node.
pub struct SessionRecorder {
    log: EventLog,
    backtrace_depth: usize,
}

impl SessionRecorder {
    /// Initializes the subscriber with the log it appends to.
    pub const fn new(log: EventLog, backtrace_depth: usize) -> Self {
        Self {
            log,
            backtrace_depth,
        }
    }
}

impl EventSubscriber for SessionRecorder {
    fn on_event(&self, event: &TraceEvent<'_>) -> Result<(), SubscriberError> {
        let mut node = KdlNode::new(event.kind.label());

        if let Some(function) = event.function {
            node.entries_mut().push(KdlEntry::new(function.name()));
        }

        node.entries_mut()
            .push(KdlEntry::new_prop("thread", i128::from(event.thread.id())));

        if event.kind != TraceEventKind::ThreadExit {
            node.entries_mut()
                .push(KdlEntry::new_prop("depth", event.depth as i128));
        }

        if let Some((function, location)) = event.function.zip(event.location) {
            node.entries_mut()
                .push(KdlEntry::new_prop("location", location as i128));

            if let Some(span) = function.sequence_point(location) {
                node.entries_mut()
                    .push(KdlEntry::new_prop("line", i128::from(span.start().line)));
            }
        }

        match event.payload {
            EventPayload::None | EventPayload::ReturnValue(None) => (),
            EventPayload::ReturnValue(Some(value)) => {
                node.entries_mut().push(value_entry(Some("return"), value));
            }
            EventPayload::Exception(exception) => {
                node.entries_mut()
                    .push(value_entry(Some("value"), exception.value()));
            }
        }

        match event.kind {
            TraceEventKind::TracePoint => {
                if let Some(locals) = event
                    .thread
                    .materialize_leaf_frame()
                    .and_then(|frame| locals_node(&frame))
                {
                    node.ensure_children().nodes_mut().push(locals);
                }
            }
            TraceEventKind::Exception if self.backtrace_depth > 0 => {
                node.ensure_children()
                    .nodes_mut()
                    .push(backtrace_node(event.thread, self.backtrace_depth));
            }
            _ => (),
        }

        self.log.push(node);

        Ok(())
    }
}

fn value_entry(key: Option<&str>, value: &Value) -> KdlEntry {
    let value = if let Some(int) = downcast::<i64>(value) {
        KdlValue::from(i128::from(*int))
    } else if let Some(string) = downcast::<String>(value) {
        KdlValue::from(string.as_str())
    } else if downcast::<()>(value).is_some() {
        KdlValue::Null
    } else {
        KdlValue::from(format!("{value:?}"))
    };

    match key {
        Some(key) => KdlEntry::new_prop(key, value),
        None => KdlEntry::new(value),
    }
}

/// Visible locals holding a value.
fn locals_node(frame: &Frame) -> Option<KdlNode> {
    let mut node = KdlNode::new("locals");

    for variable in frame.visible_variables() {
        if variable.is_hidden() {
            continue;
        }

        let Some(value) = frame.get_local(variable.name()) else {
            continue;
        };

        let mut local = KdlNode::new(variable.name());
        local.entries_mut().push(value_entry(None, &value));
        node.ensure_children().nodes_mut().push(local);
    }

    node.children().is_some().then_some(node)
}

/// Innermost frames first.
fn backtrace_node(thread: &ThreadStack, depth: usize) -> KdlNode {
    let mut node = KdlNode::new("backtrace");

    for frame in thread.frames().iter().rev().take(depth) {
        let mut element = KdlNode::new("frame");
        element
            .entries_mut()
            .push(KdlEntry::new(frame.function().name()));

        if let Some(span) = frame.location_span() {
            element
                .entries_mut()
                .push(KdlEntry::new_prop("file", span.file()));
            element
                .entries_mut()
                .push(KdlEntry::new_prop("line", i128::from(span.start().line)));
        }

        node.ensure_children().nodes_mut().push(element);
    }

    node
}

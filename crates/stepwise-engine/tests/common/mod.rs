use std::sync::Arc;

use parking_lot::Mutex;
use stepwise_engine::handler::{EventPayload, EventSubscriber, TraceEvent, TraceEventKind};
use stepwise_engine::{DebugContext, DebugMode, FunctionInfo, SourceSpan, SubscriberError, Value};

/// Event as seen by the test subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recorded {
    pub tid: u64,
    pub kind: TraceEventKind,
    pub function: Option<String>,
    pub location: Option<usize>,
    pub depth: usize,
    pub payload: Option<String>,
}

impl Recorded {
    /// Compact form used by assertions: `kind function@location`.
    pub fn short(&self) -> String {
        let function = self.function.as_deref().unwrap_or("-");
        let location = self
            .location
            .map_or_else(|| "-".to_owned(), |l| l.to_string());

        match &self.payload {
            Some(payload) => format!("{} {function}@{location} {payload}", self.kind),
            None => format!("{} {function}@{location}", self.kind),
        }
    }
}

type Hook = dyn Fn(&TraceEvent<'_>) -> Result<(), SubscriberError> + Send + Sync;

/// Subscriber recording every event, optionally running a hook afterwards.
#[derive(Clone)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Recorded>>>,
    hook: Option<Arc<Hook>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            events: Arc::default(),
            hook: None,
        }
    }

    pub fn with_hook<F>(hook: F) -> Self
    where
        F: Fn(&TraceEvent<'_>) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        Self {
            events: Arc::default(),
            hook: Some(Arc::new(hook)),
        }
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    pub fn short(&self) -> Vec<String> {
        self.events().iter().map(Recorded::short).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSubscriber for Recorder {
    fn on_event(&self, event: &TraceEvent<'_>) -> Result<(), SubscriberError> {
        let payload = match event.payload {
            EventPayload::None => None,
            EventPayload::ReturnValue(value) => value.map(|v| format!("{v:?}")),
            EventPayload::Exception(exception) => Some(format!("!{exception}")),
        };

        self.events.lock().push(Recorded {
            tid: event.thread.id(),
            kind: event.kind,
            function: event.function.map(|f| f.name().to_owned()),
            location: event.location,
            depth: event.depth,
            payload,
        });

        match &self.hook {
            Some(hook) => hook(event),
            None => Ok(()),
        }
    }
}

pub fn context(recorder: &Recorder, mode: DebugMode) -> Arc<DebugContext> {
    DebugContext::builder()
        .with_subscriber(recorder.clone())
        .debug_mode(mode)
        .build()
}

/// Builds a function with one sequence point per line of `file`.
pub fn function(name: &str, file: &str, lines: &[u32]) -> Arc<FunctionInfo> {
    let mut builder = FunctionInfo::builder(name);
    for &line in lines {
        builder
            .sequence_point(SourceSpan::from_lines(file, (line, 1), (line, 30)))
            .unwrap();
    }
    builder.build()
}

pub fn line(file: &str, line: u32) -> SourceSpan {
    SourceSpan::from_lines(file, (line, 1), (line, 1))
}

pub fn int(v: i64) -> Value {
    stepwise_engine::value(v)
}

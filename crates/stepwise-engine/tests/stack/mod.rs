use std::sync::{Arc, OnceLock, Weak};

use stepwise_engine::handler::TraceEventKind;
use stepwise_engine::instrument::{Activation, invoke};
use stepwise_engine::{
    DebugContext, DebugMode, FunctionInfo, NoopSubscriber, SourceSpan, SubscriberError, Unwind, Value,
    VariableFlags, downcast,
};
use test_log::test;

use crate::common::{Recorder, context, function, int};

fn recurse(
    function: &Arc<FunctionInfo>,
    activation: &mut Activation<'_>,
    remaining: usize,
) -> Result<Option<Value>, Unwind> {
    activation.sequence_point(0)?;

    let thread = activation.thread().clone();
    assert_eq!(thread.frame_count(), activation.depth() + 1);
    assert!(thread.frames().iter().all(|f| f.thread_id() == thread.id()));

    if remaining == 0 {
        return Ok(None);
    }

    activation.call(function, [], |inner| recurse(function, inner, remaining - 1))
}

#[test]
fn frame_count_follows_activations() {
    let context = DebugContext::builder()
        .with_subscriber(NoopSubscriber)
        .build();
    let f = function("f", "stack.py", &[1]);
    context.register_function(&f).unwrap();

    invoke(&context, &f, [], |activation| recurse(&f, activation, 4)).unwrap();

    assert_eq!(context.current_thread().frame_count(), 0);
    assert!(context.threads().is_empty());
}

#[test]
fn popping_empty_stack_is_rejected() {
    let context = DebugContext::builder()
        .with_subscriber(NoopSubscriber)
        .build();

    let res = context.current_thread().pop_frame();

    assert!(matches!(res, Err(stepwise_engine::Error::StackUnderflow(_))));
}

#[test]
fn concurrent_threads_keep_separate_stacks() {
    const THREADS: usize = 8;
    const DEPTH: usize = 40;

    let recorder = Recorder::new();
    let context = context(&recorder, DebugMode::TracePoints);
    let f = function("f", "stack.py", &[1]);
    context.register_function(&f).unwrap();

    let tids = std::thread::scope(|s| {
        let handles = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    invoke(&context, &f, [], |activation| recurse(&f, activation, DEPTH - 1))
                        .unwrap();

                    let thread = context.current_thread();
                    assert_eq!(thread.frame_count(), 0);
                    thread.id()
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    let events = recorder.events();
    for tid in tids {
        let count = |kind: TraceEventKind| {
            events
                .iter()
                .filter(|e| e.tid == tid && e.kind == kind)
                .count()
        };

        assert_eq!(count(TraceEventKind::FrameEnter), DEPTH);
        assert_eq!(count(TraceEventKind::FrameExit), DEPTH);

        let max_depth = events
            .iter()
            .filter(|e| e.tid == tid)
            .map(|e| e.depth)
            .max();
        assert_eq!(max_depth, Some(DEPTH - 1));
    }

    assert!(context.threads().is_empty());
}

#[test]
fn emptying_a_stepped_stack_exits_thread() {
    let recorder = Recorder::new();
    let context = context(&recorder, DebugMode::FullyEnabled);
    let f = function("f", "exit.py", &[1]);
    context.register_function(&f).unwrap();

    invoke(&context, &f, [], |activation| {
        activation.sequence_point(0)?;
        Ok(Some(int(1)))
    })
    .unwrap();

    assert_eq!(
        recorder.short(),
        [
            "frame-enter f@-",
            "trace-point f@0",
            "frame-exit f@0 1",
            "thread-exit -@-",
        ]
    );

    // an exit without exception is only reported while stepping
    recorder.clear();
    context.set_debug_mode(DebugMode::TracePoints);
    invoke(&context, &f, [], |_| Ok(None)).unwrap();
    assert_eq!(recorder.short(), ["frame-enter f@-", "frame-exit f@-"]);
}

#[test]
fn frames_are_materialized_on_demand() {
    let recorder = Recorder::with_hook(|event| {
        if event.kind == TraceEventKind::TracePoint {
            assert!(event.thread.leaf_frame().is_none());

            let frame = event.thread.materialize_leaf_frame().unwrap();
            assert_eq!(frame.location(), Some(1));
            assert_eq!(frame.function().name(), "inner");
            assert!(frame.is_in_traceback());

            let outer = event.thread.frame(0).unwrap();
            assert_eq!(outer.location(), Some(0));
            assert!(!outer.is_in_traceback());
        }
        Ok(())
    });
    let context = context(&recorder, DebugMode::TracePoints);
    let outer = function("outer", "lazy.py", &[1]);
    let inner = function("inner", "lazy.py", &[5, 6]);
    context.register_function(&outer).unwrap();
    context.register_function(&inner).unwrap();
    context.set_trace_point(&inner, 1, true).unwrap();

    invoke(&context, &outer, [], |activation| {
        activation.sequence_point(0)?;
        activation.call(&inner, [], |activation| {
            activation.sequence_point(0)?;
            activation.sequence_point(1)?;
            Ok(None)
        })
    })
    .unwrap();

    assert_eq!(
        recorder.short(),
        [
            "frame-enter outer@-",
            "frame-enter inner@-",
            "trace-point inner@1",
            "frame-exit inner@1",
            "frame-exit outer@0",
        ]
    );
}

#[test]
fn subscriber_reads_and_writes_locals() {
    let recorder = Recorder::with_hook(|event| {
        if event.kind == TraceEventKind::TracePoint {
            let frame = event.thread.materialize_leaf_frame().unwrap();

            let names = frame
                .visible_variables()
                .iter()
                .map(|v| v.name().to_owned())
                .collect::<Vec<_>>();
            assert_eq!(names, ["a", "counter"]);

            let a = frame.get_local("a").unwrap();
            assert_eq!(downcast::<i64>(&a), Some(&20));

            assert!(frame.set_local("counter", int(22)));
            assert!(!frame.set_local("missing", int(0)));
        }
        Ok(())
    });
    let context = context(&recorder, DebugMode::FullyEnabled);

    let mut builder = FunctionInfo::builder("f");
    builder.parameter("a", "int");
    let counter = builder
        .variable(Some("counter"), "int", VariableFlags::LOCAL.captured())
        .global_index();
    let point = builder
        .sequence_point(SourceSpan::from_lines("locals.py", (1, 1), (1, 9)))
        .unwrap();
    let f = builder.build();
    context.register_function(&f).unwrap();

    let ret = invoke(&context, &f, [int(20)], |activation| {
        let cell = activation.capture(counter).unwrap();
        activation.set_local(counter, int(0));

        activation.sequence_point(point)?;

        // the closure cell observes the debugger's write
        let seen = cell.lock().clone();
        Ok(seen)
    })
    .unwrap();

    assert_eq!(ret.as_ref().and_then(downcast::<i64>), Some(&22));
}

#[test]
fn subscriber_running_instrumented_code_is_not_reentered() {
    let helper = function("helper", "helper.py", &[1]);
    let slot = Arc::new(OnceLock::<Weak<DebugContext>>::new());

    let recorder = {
        let helper = helper.clone();
        let slot = slot.clone();

        Recorder::with_hook(move |event| {
            assert!(event.thread.is_in_traceback());

            let in_main = event.function.is_some_and(|f| f.name() == "f");
            if event.kind == TraceEventKind::TracePoint && in_main {
                let context = slot.get().and_then(Weak::upgrade).unwrap();

                invoke(&context, &helper, [], |activation| {
                    activation.sequence_point(0)?;
                    Ok(None)
                })
                .map_err(SubscriberError::new)?;
            }
            Ok(())
        })
    };
    let context = context(&recorder, DebugMode::FullyEnabled);
    slot.set(Arc::downgrade(&context)).unwrap();

    let f = function("f", "main.py", &[1]);
    context.register_function(&f).unwrap();
    context.register_function(&helper).unwrap();

    invoke(&context, &f, [], |activation| {
        activation.sequence_point(0)?;
        Ok(None)
    })
    .unwrap();

    assert_eq!(
        recorder.short(),
        [
            "frame-enter f@-",
            "trace-point f@0",
            "frame-exit f@0",
            "thread-exit -@-",
        ]
    );
    assert!(!context.current_thread().is_in_traceback());
}

use std::sync::Arc;

use stepwise_engine::handler::TraceEventKind;
use stepwise_engine::instrument::{Activation, invoke};
use stepwise_engine::{DebugContext, DebugMode, FunctionInfo, SubscriberError, Unwind, Value};
use test_log::test;

use crate::common::{Recorder, context, function, int, line};

struct Chain {
    a: Arc<FunctionInfo>,
    b: Arc<FunctionInfo>,
    c: Arc<FunctionInfo>,
}

impl Chain {
    fn register(context: &DebugContext) -> Self {
        let chain = Self {
            a: function("A", "exc.py", &[1]),
            b: function("B", "exc.py", &[10]),
            c: function("C", "exc.py", &[20]),
        };
        for f in [&chain.a, &chain.b, &chain.c] {
            context.register_function(f).unwrap();
        }
        chain
    }

    /// Runs B, which calls C, which throws `thrown`.
    fn call_b(
        &self,
        activation: &mut Activation<'_>,
        thrown: &Value,
    ) -> Result<Option<Value>, Unwind> {
        activation.call(&self.b, [], |b| {
            b.sequence_point(0)?;
            b.call(&self.c, [], |c| {
                c.sequence_point(0)?;
                Err(c.throw(thrown.clone()))
            })
        })
    }
}

#[test]
fn handled_exception_unwinds_up_to_handler() {
    let recorder = Recorder::new();
    let context = context(&recorder, DebugMode::TracePoints);
    let chain = Chain::register(&context);
    let thrown = int(7);

    let ret = invoke(&context, &chain.a, [], |a| {
        a.sequence_point(0)?;
        let res = chain.call_b(a, &thrown);

        match a.catch(res)? {
            Ok(value) => Ok(value),
            Err(exception) => Ok(Some(exception.value().clone())),
        }
    })
    .unwrap();

    assert!(ret.is_some_and(|v| Arc::ptr_eq(&v, &thrown)));
    assert_eq!(
        recorder.short(),
        [
            "frame-enter A@-",
            "frame-enter B@-",
            "frame-enter C@-",
            "exception C@0 !7",
            "exception-unwind C@0 !7",
            "frame-exit C@0",
            "exception-unwind B@0 !7",
            "frame-exit B@0",
            "frame-exit A@0 7",
        ]
    );

    let depths = recorder
        .events()
        .iter()
        .filter(|e| e.kind == TraceEventKind::ExceptionUnwind)
        .map(|e| e.depth)
        .collect::<Vec<_>>();
    assert_eq!(depths, [2, 1]);
}

#[test]
fn unhandled_exception_exits_thread() {
    let recorder = Recorder::new();
    let context = context(&recorder, DebugMode::ExceptionsOnly);
    let chain = Chain::register(&context);
    let thrown = int(7);

    let res = invoke(&context, &chain.a, [], |a| {
        a.sequence_point(0)?;
        chain.call_b(a, &thrown)
    });

    let Err(Unwind::Throw(exception)) = res else {
        panic!("expected the exception to escape");
    };
    assert!(Arc::ptr_eq(exception.value(), &thrown));

    assert_eq!(
        recorder.short(),
        [
            "exception C@0 !7",
            "exception-unwind C@0 !7",
            "exception-unwind B@0 !7",
            "exception-unwind A@0 !7",
            "thread-exit -@-",
        ]
    );

    let last = recorder.events().pop().unwrap();
    assert_eq!(last.depth, usize::MAX);
    assert_eq!(last.payload, None);
    assert_eq!(context.current_thread().frame_count(), 0);
}

#[test]
fn rethrow_keeps_exception_identity() {
    let recorder = Recorder::new();
    let context = context(&recorder, DebugMode::ExceptionsOnly);
    let chain = Chain::register(&context);
    let thrown = int(3);

    let caught = invoke(&context, &chain.a, [], |a| {
        let res = a.call(&chain.b, [], |b| {
            b.sequence_point(0)?;
            let res = b.call(&chain.c, [], |c| Err(c.throw(thrown.clone())));

            match b.catch(res)? {
                Ok(value) => Ok(value),
                Err(exception) => Err(b.raise(exception)),
            }
        });

        match a.catch(res)? {
            Ok(_) => Ok(None),
            Err(exception) => Ok(Some(exception.value().clone())),
        }
    })
    .unwrap();

    assert!(caught.is_some_and(|v| Arc::ptr_eq(&v, &thrown)));
    assert_eq!(
        recorder.short(),
        [
            "exception C@- !3",
            "exception-unwind C@- !3",
            "exception B@0 !3",
            "exception-unwind B@0 !3",
        ]
    );
}

#[test]
fn thrown_exception_is_stashed_during_event() {
    let recorder = Recorder::with_hook(|event| {
        match event.exception() {
            Some(exception) => {
                let stashed = event.thread.thrown_exception().unwrap();
                assert!(stashed.ptr_eq(exception));
            }
            None => assert!(event.thread.thrown_exception().is_none()),
        }
        Ok(())
    });
    let context = context(&recorder, DebugMode::ExceptionsOnly);
    let f = function("f", "stash.py", &[1]);
    context.register_function(&f).unwrap();

    let res = invoke(&context, &f, [], |activation| {
        activation.sequence_point(0)?;
        Err(activation.throw(int(1)))
    });

    assert!(matches!(res, Err(Unwind::Throw(_))));
    assert!(context.current_thread().thrown_exception().is_none());
    assert_eq!(recorder.events().len(), 3);
}

#[test]
fn failing_subscriber_aborts_and_cleans_up() {
    let recorder = Recorder::with_hook(|event| {
        if event.kind == TraceEventKind::Exception {
            return Err(SubscriberError::new("debugger went away"));
        }
        Ok(())
    });
    let context = context(&recorder, DebugMode::TracePoints);
    let chain = Chain::register(&context);
    let thrown = int(5);

    let res = invoke(&context, &chain.a, [], |a| {
        let res = chain.call_b(a, &thrown);
        // subscriber failures are not exceptions
        a.catch(res)?.map_err(|_| Unwind::Throw(stepwise_engine::Exception::new(int(0))))
    });

    let Err(Unwind::Subscriber(error)) = res else {
        panic!("expected the subscriber error");
    };
    assert_eq!(error.to_string(), "debugger went away");

    let thread = context.current_thread();
    assert_eq!(thread.frame_count(), 0);
    assert!(thread.thrown_exception().is_none());
    assert!(!thread.is_in_traceback());

    assert_eq!(
        recorder.short(),
        [
            "frame-enter A@-",
            "frame-enter B@-",
            "frame-enter C@-",
            "exception C@0 !5",
            "frame-exit C@0",
            "frame-exit B@0",
            "frame-exit A@-",
        ]
    );
}

#[test]
fn failing_unwind_event_still_exits_frames() {
    let recorder = Recorder::with_hook(|event| {
        if event.kind == TraceEventKind::ExceptionUnwind {
            return Err(SubscriberError::new("boom"));
        }
        Ok(())
    });
    let context = context(&recorder, DebugMode::TracePoints);
    let chain = Chain::register(&context);
    let thrown = int(5);

    let res = invoke(&context, &chain.a, [], |a| chain.call_b(a, &thrown));

    assert!(matches!(res, Err(Unwind::Subscriber(_))));
    assert_eq!(context.current_thread().frame_count(), 0);
    assert_eq!(
        recorder.short(),
        [
            "frame-enter A@-",
            "frame-enter B@-",
            "frame-enter C@-",
            "exception C@0 !5",
            "exception-unwind C@0 !5",
            "frame-exit C@0",
            "frame-exit B@0",
            "frame-exit A@-",
        ]
    );
}

#[test]
fn failing_trace_point_still_exits_frames() {
    let recorder = Recorder::with_hook(|event| {
        let in_inner = event.function.is_some_and(|f| f.name() == "inner");
        if event.kind == TraceEventKind::TracePoint && in_inner {
            return Err(SubscriberError::new("boom"));
        }
        Ok(())
    });
    let context = context(&recorder, DebugMode::TracePoints);
    let outer = function("outer", "fail.py", &[1]);
    let inner = function("inner", "fail.py", &[5]);
    context.register_function(&outer).unwrap();
    context.register_function(&inner).unwrap();
    context.set_breakpoint(&line("fail.py", 1), true);
    context.set_breakpoint(&line("fail.py", 5), true);

    let res = invoke(&context, &outer, [], |activation| {
        activation.sequence_point(0)?;
        activation.call(&inner, [], |activation| {
            activation.sequence_point(0)?;
            Ok(Some(int(1)))
        })
    });

    let Err(Unwind::Subscriber(error)) = res else {
        panic!("expected the subscriber error");
    };
    assert_eq!(error.to_string(), "boom");
    assert_eq!(
        recorder.short(),
        [
            "frame-enter outer@-",
            "trace-point outer@0",
            "frame-enter inner@-",
            "trace-point inner@0",
            "frame-exit inner@0",
            "frame-exit outer@0",
        ]
    );
}

#[test]
fn catch_never_hands_over_internal_unwinds() {
    let context = DebugContext::builder()
        .with_subscriber(stepwise_engine::NoopSubscriber)
        .build();
    let f = function("f", "catch.py", &[1]);
    context.register_function(&f).unwrap();

    invoke(&context, &f, [], |activation| {
        let redirect: Result<(), Unwind> = Err(Unwind::RedirectToGeneratorLoop);
        assert!(matches!(
            activation.catch(redirect),
            Err(Unwind::RedirectToGeneratorLoop)
        ));

        let failure: Result<(), Unwind> = Err(SubscriberError::new("boom").into());
        assert!(matches!(activation.catch(failure), Err(Unwind::Subscriber(_))));

        let thrown: Result<(), Unwind> = Err(activation.throw(int(2)));
        assert!(matches!(activation.catch(thrown), Ok(Err(_))));

        Ok(None)
    })
    .unwrap();
}

#[test]
fn disabled_mode_reports_nothing_but_tracks_frames() {
    let recorder = Recorder::new();
    let context = context(&recorder, DebugMode::Disabled);
    let f = function("f", "quiet.py", &[1, 2]);
    context.register_function(&f).unwrap();
    context.set_trace_point(&f, 1, true).unwrap();

    let res = invoke(&context, &f, [], |activation| {
        activation.sequence_point(0)?;
        activation.sequence_point(1)?;
        assert_eq!(activation.thread().frame_count(), 1);
        Err(activation.throw(int(9)))
    });

    assert!(matches!(res, Err(Unwind::Throw(_))));
    assert!(recorder.events().is_empty());
}

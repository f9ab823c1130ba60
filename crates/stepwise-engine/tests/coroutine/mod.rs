use std::sync::Arc;

use parking_lot::Mutex;
use stepwise_engine::handler::TraceEventKind;
use stepwise_engine::instrument::{Activation, Coroutine, Generator, GeneratorStep};
use stepwise_engine::{DebugMode, FunctionInfo, SourceSpan, Unwind, downcast};
use test_log::test;

use crate::common::{Recorder, context, int};

/// Yields 0, 1, .. up to `limit` (excluded).
///
/// Sequence points: 0 is the loop head, 1 the yield, 2 the return. The state
/// only moves past a sequence point once it has been reported.
struct Counter {
    state: usize,
    next: i64,
    limit: i64,
}

impl Coroutine for Counter {
    fn resume(&mut self, activation: &mut Activation<'_>) -> Result<GeneratorStep, Unwind> {
        loop {
            match self.state {
                0 => {
                    activation.sequence_point(0)?;
                    self.state = if self.next < self.limit { 1 } else { 2 };
                }
                1 => {
                    activation.sequence_point(1)?;
                    self.state = 0;
                    self.next += 1;
                    return Ok(GeneratorStep::Yielded(int(self.next - 1)));
                }
                _ => {
                    activation.sequence_point(2)?;
                    return Ok(GeneratorStep::Completed(None));
                }
            }
        }
    }
}

fn counter(limit: i64) -> Arc<FunctionInfo> {
    let mut builder = FunctionInfo::builder("counter");
    for line in 1..=3 {
        builder
            .sequence_point(SourceSpan::from_lines("gen.py", (line, 1), (line, 20)))
            .unwrap();
    }

    builder
        .generator(move || {
            Box::new(Counter {
                state: 0,
                next: 0,
                limit,
            }) as Box<dyn Coroutine>
        })
        .build()
}

fn yielded(step: &GeneratorStep) -> Option<i64> {
    match step {
        GeneratorStep::Yielded(value) => downcast::<i64>(value).copied(),
        GeneratorStep::Completed(_) => None,
    }
}

#[test]
fn each_advance_reenters_the_same_frame() {
    let loop_flags = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let loop_flags = loop_flags.clone();
        Recorder::with_hook(move |event| {
            if event.kind != TraceEventKind::ThreadExit {
                let frame = event.thread.leaf_frame().unwrap();
                loop_flags.lock().push(frame.in_generator_loop());
            }
            Ok(())
        })
    };
    let context = context(&recorder, DebugMode::FullyEnabled);
    let f = counter(5);
    context.register_function(&f).unwrap();

    let mut generator = Generator::new(&f, []).unwrap();

    let first = generator.advance(&context).unwrap();
    let frame = generator.frame().unwrap().clone();
    assert!(!frame.in_generator_loop());
    assert_eq!(frame.location(), Some(1));

    let second = generator.advance(&context).unwrap();
    assert!(Arc::ptr_eq(&frame, generator.frame().unwrap()));
    assert!(!frame.in_generator_loop());

    assert_eq!((yielded(&first), yielded(&second)), (Some(0), Some(1)));
    assert_eq!(
        recorder.short(),
        [
            "frame-enter counter@-",
            "trace-point counter@0",
            "trace-point counter@1",
            "frame-exit counter@1 0",
            "thread-exit -@-",
            "frame-enter counter@1",
            "trace-point counter@0",
            "trace-point counter@1",
            "frame-exit counter@1 1",
            "thread-exit -@-",
        ]
    );
    assert!(loop_flags.lock().iter().all(|&in_loop| in_loop));
    assert_eq!(context.current_thread().frame_count(), 0);
}

#[test]
fn fast_path_is_redirected_to_generator_loop() {
    let recorder = Recorder::with_hook(|event| {
        if event.kind == TraceEventKind::TracePoint && event.location == Some(0) {
            let frame = event.thread.leaf_frame().unwrap();
            if !frame.in_generator_loop() {
                frame.request_generator_loop().unwrap();
                assert!(frame.force_switch_to_generator_loop());
            }
        }
        Ok(())
    });
    let context = context(&recorder, DebugMode::TracePoints);
    let f = counter(5);
    context.register_function(&f).unwrap();
    context.set_trace_point(&f, 0, true).unwrap();

    let mut generator = Generator::new(&f, []).unwrap();
    let step = generator.advance(&context).unwrap();

    assert_eq!(yielded(&step), Some(0));
    // the location the redirect happened at is not reported twice
    assert_eq!(
        recorder.short(),
        [
            "frame-enter counter@-",
            "trace-point counter@0",
            "trace-point counter@1",
            "frame-exit counter@1 0",
        ]
    );

    let frame = generator.frame().unwrap();
    assert!(!frame.in_generator_loop());
    assert!(!frame.force_switch_to_generator_loop());
}

#[test]
fn switch_requested_while_suspended_applies_to_next_advance() {
    let recorder = Recorder::new();
    let context = context(&recorder, DebugMode::TracePoints);
    let f = counter(5);
    context.register_function(&f).unwrap();

    let mut generator = Generator::new(&f, []).unwrap();
    generator.advance(&context).unwrap();
    assert_eq!(
        recorder.short(),
        ["frame-enter counter@-", "frame-exit counter@1 0"]
    );

    recorder.clear();
    generator.frame().unwrap().request_generator_loop().unwrap();
    generator.advance(&context).unwrap();

    assert_eq!(
        recorder.short(),
        [
            "frame-enter counter@1",
            "trace-point counter@0",
            "trace-point counter@1",
            "frame-exit counter@1 1",
        ]
    );

    // back on the fast path once the requested advance is over
    recorder.clear();
    generator.advance(&context).unwrap();
    assert_eq!(
        recorder.short(),
        ["frame-enter counter@1", "frame-exit counter@1 2"]
    );
}

#[test]
fn fast_path_advance_keeps_the_suspension_location() {
    let recorder = Recorder::new();
    let context = context(&recorder, DebugMode::Disabled);
    let f = counter(5);
    context.register_function(&f).unwrap();

    let mut generator = Generator::new(&f, []).unwrap();
    generator.advance(&context).unwrap();

    assert!(recorder.events().is_empty());
    assert_eq!(generator.frame().unwrap().location(), Some(1));

    context.set_debug_mode(DebugMode::TracePoints);
    let step = generator.advance(&context).unwrap();

    assert_eq!(yielded(&step), Some(1));
    assert_eq!(
        recorder.short(),
        ["frame-enter counter@1", "frame-exit counter@1 1"]
    );
}

#[test]
fn completed_generator_is_exhausted() {
    let recorder = Recorder::new();
    let context = context(&recorder, DebugMode::Disabled);
    let f = counter(2);
    context.register_function(&f).unwrap();

    let mut generator = Generator::new(&f, []).unwrap();
    let mut values = Vec::new();
    loop {
        match generator.advance(&context).unwrap() {
            GeneratorStep::Yielded(value) => values.push(downcast::<i64>(&value).copied()),
            GeneratorStep::Completed(value) => {
                assert!(value.is_none());
                break;
            }
        }
    }

    assert_eq!(values, [Some(0), Some(1)]);
    assert!(generator.is_completed());
    assert!(matches!(
        generator.advance(&context),
        Err(Unwind::Engine(stepwise_engine::Error::GeneratorExhausted(_)))
    ));
}

#[test]
fn generator_moved_to_another_thread_is_rebound() {
    let recorder = Recorder::new();
    let context = context(&recorder, DebugMode::TracePoints);
    let f = counter(5);
    context.register_function(&f).unwrap();

    let mut generator = Generator::new(&f, []).unwrap();
    generator.advance(&context).unwrap();
    let first_owner = generator.frame().unwrap().thread_id();

    let (generator, step) = std::thread::scope(|s| {
        s.spawn(|| {
            let step = generator.advance(&context).unwrap();
            (generator, step)
        })
        .join()
        .unwrap()
    });

    let frame = generator.frame().unwrap();
    assert_ne!(frame.thread_id(), first_owner);
    assert_eq!(frame.location(), Some(1));
    assert_eq!(yielded(&step), Some(1));

    let enters = recorder
        .events()
        .into_iter()
        .filter(|e| e.kind == TraceEventKind::FrameEnter)
        .map(|e| (e.tid, e.location))
        .collect::<Vec<_>>();
    assert_eq!(enters, [(first_owner, None), (frame.thread_id(), Some(1))]);
}

#[test]
fn only_coroutine_frames_have_a_generator_loop() {
    let plain = crate::common::function("plain", "plain.py", &[1]);

    assert!(matches!(
        Generator::new(&plain, []),
        Err(stepwise_engine::Error::NoGeneratorLoop(_))
    ));

    let recorder = Recorder::with_hook(|event| {
        if event.kind == TraceEventKind::FrameEnter {
            let frame = event.thread.materialize_leaf_frame().unwrap();
            assert!(matches!(
                frame.request_generator_loop(),
                Err(stepwise_engine::Error::NoGeneratorLoop(_))
            ));
        }
        Ok(())
    });
    let context = context(&recorder, DebugMode::TracePoints);
    context.register_function(&plain).unwrap();

    stepwise_engine::instrument::invoke(&context, &plain, [], |activation| {
        activation.sequence_point(0)?;
        Ok(None)
    })
    .unwrap();
}

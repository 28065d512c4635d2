//! Lifecycle tests: hook ordering, run boundaries and the three termination paths.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use common::*;
use daq_record_loop::codec::BankDecoder;
use daq_record_loop::error::{ChainError, LoopError, SourceError};
use daq_record_loop::processor::conditions::ConditionsError;
use daq_record_loop::processor::{
    ConditionsActivator, EndRunSentinel, ProcessorChain, RunSummaryProcessor,
};
use daq_record_loop::record_loop::{LoopOptions, RecordLoop};
use daq_record_loop::run_state::RunState;
use daq_record_loop::source::SequentialFileSource;
use daq_record_loop::{LoopState, RecordKind, Termination};

fn run_42_frames() -> Vec<Vec<u8>> {
    let mut frames = vec![prestart(42)];
    frames.extend((1..=5).map(physics));
    frames.push(end(5));
    frames
}

#[test]
fn test_run_scenario_dispatches_every_hook_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_frames(dir.path(), "run_42.evio.0", &run_42_frames());
    let log = EventLog::default();

    let activated = Arc::new(Mutex::new(Vec::new()));
    let conditions = {
        let activated = Arc::clone(&activated);
        ConditionsActivator::new(move |run: u32| -> Result<(), ConditionsError> {
            activated.lock().push(run);
            Ok(())
        })
    };
    let run_summary = RunSummaryProcessor::new();
    let run = run_summary.handle();

    let mut chain = ProcessorChain::new();
    chain.register(conditions).unwrap();
    chain.register(Recorder::new("recorder", &log)).unwrap();
    chain.register(run_summary).unwrap();
    chain.register(EndRunSentinel::new()).unwrap();

    let mut record_loop = RecordLoop::new(SequentialFileSource::single(path, BankDecoder), chain);
    let summary = record_loop.run().unwrap();

    let events = log.of("recorder");
    assert_eq!(events.first(), Some(&Event::StartJob));
    assert_eq!(events[1], Event::StartRun(Some(42)));
    assert_eq!(
        events[2],
        Event::Record {
            tag: PRESTART,
            sequence: None
        }
    );
    assert_eq!(log.count("recorder", |e| matches!(e, Event::StartRun(_))), 1);
    assert_eq!(log.count("recorder", |e| matches!(e, Event::Record { .. })), 7);
    assert_eq!(log.count("recorder", |e| *e == Event::EndRun), 1);
    assert_eq!(log.end_jobs("recorder"), 1);
    assert_eq!(&events[events.len() - 2..], &[Event::EndRun, Event::EndJob]);

    assert_eq!(summary.termination, Termination::EndOfRun);
    assert!(summary.termination.is_normal());
    assert_eq!(summary.records_dispatched, 7);
    assert_eq!(summary.count(RecordKind::Physics), 5);
    assert_eq!(summary.run, Some(42));
    assert_eq!(summary.run_state, RunState::Ended);
    assert_eq!(record_loop.state(), LoopState::Stopped);

    assert_eq!(*activated.lock(), vec![42]);
    let run = run.snapshot();
    assert_eq!(run.run, Some(42));
    assert_eq!(run.first_sequence, Some(1));
    assert_eq!(run.last_sequence, Some(5));
    assert_eq!(run.end_event_count, Some(5));
}

#[test]
fn test_records_after_end_of_run_are_not_dispatched() {
    let dir = tempfile::tempdir().unwrap();
    let mut frames = run_42_frames();
    frames.push(physics(99));
    let path = write_frames(dir.path(), "run.evio", &frames);
    let log = EventLog::default();

    let chain = ProcessorChain::new()
        .with(Recorder::new("recorder", &log))
        .unwrap();
    let summary = RecordLoop::new(SequentialFileSource::single(path, BankDecoder), chain)
        .run()
        .unwrap();

    assert_eq!(summary.termination, Termination::EndOfRun);
    assert!(!log.sequences("recorder").contains(&99));
}

#[test]
fn test_fatal_processor_error_still_reaches_later_processors_and_ends_job_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_frames(
        dir.path(),
        "run.evio",
        &[prestart(7), physics(1), physics(2), end(2)],
    );
    let log = EventLog::default();

    let mut chain = ProcessorChain::new();
    chain
        .register(Recorder::new("first", &log).fatal_on(PHYSICS))
        .unwrap();
    chain.register(Recorder::new("second", &log)).unwrap();

    let mut record_loop = RecordLoop::new(SequentialFileSource::single(path, BankDecoder), chain);
    match record_loop.run() {
        Err(LoopError::ProcessorFatal { processor, message }) => {
            assert_eq!(processor, "first");
            assert!(message.contains("poison"));
        }
        other => panic!("expected fatal processor error, got {:?}", other.map(|s| s.termination)),
    }

    // Both processors saw PRESTART and the poisoned record, nothing after it.
    assert_eq!(log.sequences("second"), vec![1]);
    assert_eq!(log.end_jobs("first"), 1);
    assert_eq!(log.end_jobs("second"), 1);
    assert_eq!(log.count("second", |e| *e == Event::EndRun), 0);

    let summary = record_loop.summary().unwrap();
    assert!(summary.termination.is_failure());
    assert!(summary.processor("first").unwrap().fatal);
    assert_eq!(summary.run_state, RunState::Ended);
}

#[test]
fn test_unreadable_file_fails_after_end_job() {
    let dir = tempfile::tempdir().unwrap();
    let present = write_frames(dir.path(), "run.evio.0", &[prestart(3), physics(1)]);
    let missing = dir.path().join("run.evio.1");
    let log = EventLog::default();

    let chain = ProcessorChain::new()
        .with(Recorder::new("recorder", &log))
        .unwrap();
    let mut record_loop =
        RecordLoop::new(SequentialFileSource::new([present, missing], BankDecoder), chain);

    assert!(matches!(
        record_loop.run(),
        Err(LoopError::Source(SourceError::Io { .. }))
    ));
    assert_eq!(log.sequences("recorder"), vec![1]);
    assert_eq!(log.end_jobs("recorder"), 1);
    assert_eq!(log.all().last().map(|(_, e)| e.clone()), Some(Event::EndJob));
}

#[test]
fn test_sentinel_budget_halts_abnormally() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<_> = (1..=10).map(physics).collect();
    let path = write_frames(dir.path(), "run.evio", &frames);
    let log = EventLog::default();

    let mut chain = ProcessorChain::new();
    chain.register(Recorder::new("recorder", &log)).unwrap();
    chain.register(EndRunSentinel::new().with_budget(3)).unwrap();

    let summary = RecordLoop::new(SequentialFileSource::single(path, BankDecoder), chain)
        .run()
        .unwrap();

    assert_eq!(
        summary.termination,
        Termination::Halted {
            processor: "end-run-sentinel".to_string()
        }
    );
    assert!(!summary.termination.is_normal());
    assert_eq!(log.sequences("recorder"), vec![1, 2, 3]);
    assert_eq!(log.end_jobs("recorder"), 1);
}

#[test]
fn test_sentinel_must_be_registered_last() {
    let log = EventLog::default();
    let mut chain = ProcessorChain::new();
    chain.register(Recorder::new("before", &log)).unwrap();
    chain.register(EndRunSentinel::new()).unwrap();

    let rejected = chain.register(Recorder::new("after", &log));
    assert_eq!(
        rejected,
        Err(ChainError::SentinelNotLast {
            sentinel: "end-run-sentinel".to_string(),
            rejected: "after".to_string(),
        })
    );
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.sentinel(), Some("end-run-sentinel"));
}

#[test]
fn test_second_prestart_restarts_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_frames(
        dir.path(),
        "run.evio",
        &[prestart(1), physics(1), prestart(2), physics(1), end(1)],
    );
    let log = EventLog::default();
    let chain = ProcessorChain::new()
        .with(Recorder::new("recorder", &log))
        .unwrap();

    let summary = RecordLoop::new(SequentialFileSource::single(path, BankDecoder), chain)
        .run()
        .unwrap();

    let starts: Vec<_> = log
        .of("recorder")
        .into_iter()
        .filter(|e| matches!(e, Event::StartRun(_)))
        .collect();
    assert_eq!(starts, vec![Event::StartRun(Some(1)), Event::StartRun(Some(2))]);
    assert_eq!(summary.run, Some(2));
}

#[test]
fn test_record_limit_from_options() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_frames(dir.path(), "run.evio", &run_42_frames());
    let log = EventLog::default();
    let chain = ProcessorChain::new()
        .with(Recorder::new("recorder", &log))
        .unwrap();

    let options = LoopOptions {
        max_records: 4,
        ..LoopOptions::default()
    };
    let summary = RecordLoop::new(SequentialFileSource::single(path, BankDecoder), chain)
        .with_options(options)
        .run()
        .unwrap();

    assert_eq!(summary.termination, Termination::RecordLimit);
    assert_eq!(summary.records_dispatched, 4);
    assert_eq!(summary.run_state, RunState::Ended);
    assert_eq!(log.end_jobs("recorder"), 1);
}

//! Shared fixtures for record loop integration tests.
//!
//! - frame builders for control and physics events
//! - `write_frames`: writes a record file into a temp directory
//! - `Recorder`: a processor that logs every hook call into a shared `EventLog`

#![allow(dead_code)] // Not every test file uses every fixture

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use daq_record_loop::codec::{encode_control, encode_event, BankDecoder, RecordDecoder};
use daq_record_loop::error::ProcessorError;
use daq_record_loop::processor::{ProcessorResult, RecordProcessor};
use daq_record_loop::record::Record;

pub const PRESTART: u16 = 17;
pub const GO: u16 = 18;
pub const PAUSE: u16 = 19;
pub const END: u16 = 20;
pub const PHYSICS: u16 = 0xFF50;

/// PRESTART frame for `run`.
pub fn prestart(run: u32) -> Vec<u8> {
    encode_control(PRESTART, 1_700_000_000, run, 0)
}

/// GO frame.
pub fn go() -> Vec<u8> {
    encode_control(GO, 1_700_000_005, 0, 0)
}

/// PAUSE frame.
pub fn pause(events: u32) -> Vec<u8> {
    encode_control(PAUSE, 1_700_000_050, 0, events)
}

/// END frame carrying the event count.
pub fn end(events: u32) -> Vec<u8> {
    encode_control(END, 1_700_000_100, 0, events)
}

/// Physics frame with event number `sequence`.
pub fn physics(sequence: u32) -> Vec<u8> {
    encode_event(PHYSICS, sequence, &[sequence, 0xCAFE])
}

/// Decode a frame built by the helpers above.
pub fn decode(frame: Vec<u8>) -> Record {
    BankDecoder.decode(Bytes::from(frame)).unwrap()
}

/// Write frames back to back into `dir/name`.
pub fn write_frames(dir: &Path, name: &str, frames: &[Vec<u8>]) -> PathBuf {
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();
    for frame in frames {
        file.write_all(frame).unwrap();
    }
    file.sync_all().unwrap();
    path
}

/// One hook call observed by a `Recorder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StartJob,
    StartRun(Option<u32>),
    Record { tag: u16, sequence: Option<u32> },
    EndRun,
    EndJob,
}

/// Shared, ordered log of hook calls.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<(String, Event)>>>);

impl EventLog {
    pub fn push(&self, processor: &str, event: Event) {
        self.0.lock().push((processor.to_string(), event));
    }

    /// Events seen by one processor.
    pub fn of(&self, processor: &str) -> Vec<Event> {
        self.0
            .lock()
            .iter()
            .filter(|(name, _)| name == processor)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// All events with the processor name.
    pub fn all(&self) -> Vec<(String, Event)> {
        self.0.lock().clone()
    }

    /// Number of events for `processor` matching `pred`.
    pub fn count(&self, processor: &str, pred: impl Fn(&Event) -> bool) -> usize {
        self.of(processor).iter().filter(|e| pred(e)).count()
    }

    /// Sequence numbers of records seen by `processor`, in order.
    pub fn sequences(&self, processor: &str) -> Vec<u32> {
        self.of(processor)
            .into_iter()
            .filter_map(|e| match e {
                Event::Record { sequence, .. } => sequence,
                _ => None,
            })
            .collect()
    }

    pub fn end_jobs(&self, processor: &str) -> usize {
        self.count(processor, |e| *e == Event::EndJob)
    }
}

/// Processor that records every hook call.
pub struct Recorder {
    name: String,
    log: EventLog,
    fatal_on_tag: Option<u16>,
}

impl Recorder {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            fatal_on_tag: None,
        }
    }

    /// Raise a fatal error when a record with `tag` is processed.
    pub fn fatal_on(mut self, tag: u16) -> Self {
        self.fatal_on_tag = Some(tag);
        self
    }
}

impl RecordProcessor for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_job(&mut self) -> ProcessorResult {
        self.log.push(&self.name, Event::StartJob);
        Ok(())
    }

    fn start_run(&mut self, record: &Record) -> ProcessorResult {
        let run = record.control_words().map(|w| w.value);
        self.log.push(&self.name, Event::StartRun(run));
        Ok(())
    }

    fn process(&mut self, record: &Record) -> ProcessorResult {
        self.log.push(
            &self.name,
            Event::Record {
                tag: record.tag(),
                sequence: record.sequence(),
            },
        );
        if self.fatal_on_tag == Some(record.tag()) {
            return Err(ProcessorError::fatal(format!("tag {} is poison", record.tag())));
        }
        Ok(())
    }

    fn end_run(&mut self, _record: &Record) -> ProcessorResult {
        self.log.push(&self.name, Event::EndRun);
        Ok(())
    }

    fn end_job(&mut self) -> ProcessorResult {
        self.log.push(&self.name, Event::EndJob);
        Ok(())
    }
}

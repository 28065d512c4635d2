//! The decoded record handed from sources through the loop to processors.
//!
//! A [`Record`] is immutable once the decoder has produced it. Payload bytes are
//! held in a [`Bytes`] so moving a record from the queue to the loop to every
//! processor never copies the data and never exposes it mutably.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

/// One decoded unit of the incoming stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    tag: u16,
    num: u8,
    payload: Bytes,
    sequence: Option<u32>,
}

impl Record {
    /// Create a record from a header tag and its data payload.
    pub fn new(tag: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            num: 0,
            payload: payload.into(),
            sequence: None,
        }
    }

    /// Attach the bank `num` field.
    pub fn with_num(mut self, num: u8) -> Self {
        self.num = num;
        self
    }

    /// Attach the event sequence number.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Header tag identifying the record's role.
    pub fn tag(&self) -> u16 {
        self.tag
    }

    /// Bank `num` field from the header.
    pub fn num(&self) -> u8 {
        self.num
    }

    /// Raw payload (the data words following the bank header).
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Event number within the run, when the payload carried one.
    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }

    /// Iterate over the payload as big-endian 32-bit words.
    ///
    /// Trailing bytes that do not fill a whole word are ignored.
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.payload
            .chunks_exact(4)
            .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
    }

    /// Interpret the payload as a control-event data block.
    ///
    /// Control events carry three words: a unix timestamp, a value (the run
    /// number for PRESTART) and a third word (run type for PRESTART, event
    /// count for GO/PAUSE/END).
    pub fn control_words(&self) -> Option<ControlWords> {
        let mut words = self.words();
        let timestamp = words.next()?;
        let value = words.next()?;
        let extra = words.next()?;
        Some(ControlWords {
            timestamp,
            value,
            extra,
        })
    }
}

/// Data block of a CODA control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWords {
    /// Seconds since the unix epoch.
    pub timestamp: u32,
    /// Run number on PRESTART; zero on other control events.
    pub value: u32,
    /// Run type on PRESTART; events so far on GO/PAUSE/END.
    pub extra: u32,
}

impl ControlWords {
    /// Timestamp as a UTC date-time.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(i64::from(self.timestamp), 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    #[test]
    fn test_control_words_from_prestart_payload() {
        let record = Record::new(17, words_to_bytes(&[1_700_000_000, 42, 3]));
        let control = record.control_words().unwrap();
        assert_eq!(control.value, 42);
        assert_eq!(control.extra, 3);
        assert_eq!(control.time().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_short_payload_has_no_control_words() {
        let record = Record::new(20, words_to_bytes(&[1, 2]));
        assert!(record.control_words().is_none());
    }

    #[test]
    fn test_words_ignore_partial_tail() {
        let mut bytes = words_to_bytes(&[7, 8]);
        bytes.push(0xAB);
        let record = Record::new(1, bytes);
        assert_eq!(record.words().collect::<Vec<_>>(), vec![7, 8]);
    }
}

//! Decoder contract and the reference bank framing used for record files.
//!
//! The loop never looks inside a record beyond its header. Turning raw bytes into
//! a [`Record`] is delegated to a [`RecordDecoder`]; [`BankDecoder`] is the
//! reference implementation for the bank layout written by the data-acquisition
//! system:
//!
//! ```text
//! word 0   length L (number of words that follow)
//! word 1   tag (16) | padding (2) | data type (6) | num (8)
//! word 2.. data, L - 1 words
//! ```
//!
//! All words are big-endian. Files are a plain concatenation of such banks, so
//! [`frame_len`] is enough to split them.

use bytes::Bytes;

use crate::error::DecodeError;
use crate::record::Record;

/// Tag of the child bank carrying the event number.
pub const EVENT_ID_BANK_TAG: u16 = 0xC000;

/// Tag of the child bank carrying run and event metadata.
pub const HEAD_BANK_TAG: u16 = 0xE10F;

/// Data type code for 32-bit unsigned integers.
pub const TYPE_UINT32: u8 = 0x01;

/// Data type code for a bank of banks.
pub const TYPE_BANK: u8 = 0x10;

/// Legacy data type code for a bank of banks.
const TYPE_BANK_LEGACY: u8 = 0x0E;

const WORD: usize = 4;

/// Turns one framed record into a [`Record`].
pub trait RecordDecoder: Send + Sync {
    /// Decode one frame. The frame includes its length word.
    fn decode(&self, frame: Bytes) -> Result<Record, DecodeError>;
}

impl<F> RecordDecoder for F
where
    F: Fn(Bytes) -> Result<Record, DecodeError> + Send + Sync,
{
    fn decode(&self, frame: Bytes) -> Result<Record, DecodeError> {
        self(frame)
    }
}

/// Size in bytes of the frame starting at `buf[0]`.
///
/// Fails with [`DecodeError::Truncated`] when `buf` holds fewer bytes than the
/// length word announces.
pub fn frame_len(buf: &[u8]) -> Result<usize, DecodeError> {
    let head = buf.get(..WORD).ok_or(DecodeError::Truncated {
        expected: WORD,
        actual: buf.len(),
    })?;
    let words = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;
    let expected = words
        .checked_add(1)
        .and_then(|n| n.checked_mul(WORD))
        .ok_or_else(|| DecodeError::Malformed(format!("length word {words} overflows")))?;
    if buf.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: buf.len(),
        });
    }
    Ok(expected)
}

/// Reference decoder for the bank layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct BankDecoder;

impl BankDecoder {
    /// Create a decoder.
    pub fn new() -> Self {
        Self
    }

    /// Event number from the event-ID child bank, if any.
    fn event_number(data: &[u8]) -> Option<u32> {
        let id = find_child(data, EVENT_ID_BANK_TAG)?;
        read_word(id, 0)
    }
}

/// Data words of the first child bank tagged `tag` inside a bank-of-banks payload.
///
/// Returns `None` when no such child exists or when a child length runs past the
/// end of `data`.
pub fn find_child(data: &[u8], tag: u16) -> Option<&[u8]> {
    let mut offset = 0;
    while offset + 2 * WORD <= data.len() {
        let len = read_word(data, offset)? as usize;
        let header = read_word(data, offset + WORD)?;
        let child_end = offset.checked_add(len.checked_add(1)?.checked_mul(WORD)?)?;
        if child_end > data.len() {
            return None;
        }
        if (header >> 16) as u16 == tag {
            return data.get(offset + 2 * WORD..child_end);
        }
        offset = child_end;
    }
    None
}

/// Run number from the head child bank (tag `0xE10F`), if present.
///
/// The head bank carries `[version, run, event, timestamp, type]`.
pub fn head_bank_run_number(record: &Record) -> Option<u32> {
    let head = find_child(record.payload(), HEAD_BANK_TAG)?;
    read_word(head, WORD)
}

impl RecordDecoder for BankDecoder {
    fn decode(&self, frame: Bytes) -> Result<Record, DecodeError> {
        if frame.len() < 2 * WORD {
            return Err(DecodeError::MissingHeader { len: frame.len() });
        }
        if frame.len() % WORD != 0 {
            return Err(DecodeError::Malformed(format!(
                "frame of {} bytes is not word aligned",
                frame.len()
            )));
        }
        let announced = read_word(&frame, 0).unwrap_or_default() as usize;
        let actual = frame.len() / WORD - 1;
        if announced != actual {
            return Err(DecodeError::LengthMismatch { announced, actual });
        }

        let header = read_word(&frame, WORD).unwrap_or_default();
        let tag = (header >> 16) as u16;
        let data_type = ((header >> 8) & 0x3F) as u8;
        let num = (header & 0xFF) as u8;

        let payload = frame.slice(2 * WORD..);
        let mut record = Record::new(tag, payload.clone()).with_num(num);
        if data_type == TYPE_BANK || data_type == TYPE_BANK_LEGACY {
            if let Some(sequence) = Self::event_number(&payload) {
                record = record.with_sequence(sequence);
            }
        }
        Ok(record)
    }
}

fn read_word(buf: &[u8], offset: usize) -> Option<u32> {
    let w = buf.get(offset..offset + WORD)?;
    Some(u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
}

/// Encode a bank of 32-bit words.
pub fn encode_bank(tag: u16, data_type: u8, num: u8, words: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity((words.len() + 2) * WORD);
    out.extend_from_slice(&(words.len() as u32 + 1).to_be_bytes());
    let header = (u32::from(tag) << 16) | (u32::from(data_type & 0x3F) << 8) | u32::from(num);
    out.extend_from_slice(&header.to_be_bytes());
    for word in words {
        out.extend_from_slice(&word.to_be_bytes());
    }
    out
}

/// Encode a control event (`[timestamp, value, extra]`).
pub fn encode_control(tag: u16, timestamp: u32, value: u32, extra: u32) -> Vec<u8> {
    encode_bank(tag, TYPE_UINT32, 0xCC, &[timestamp, value, extra])
}

/// Encode a physics-style event: a bank of banks holding an event-ID bank
/// followed by one data bank.
pub fn encode_event(tag: u16, event_number: u32, data: &[u32]) -> Vec<u8> {
    let id_bank = encode_bank(EVENT_ID_BANK_TAG, TYPE_UINT32, 0, &[event_number, 0, 0]);
    let data_bank = encode_bank(0x0001, TYPE_UINT32, 1, data);
    let children: Vec<u32> = id_bank
        .chunks_exact(WORD)
        .chain(data_bank.chunks_exact(WORD))
        .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    encode_bank(tag, TYPE_BANK, 0, &children)
}

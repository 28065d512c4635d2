//! Sequential multi-file record source.
//!
//! Files are memory-mapped one at a time, in list order. When the open file is
//! exhausted its mapping is released and the next file is opened, so callers see a
//! single continuous stream. Records are zero-copy slices of the mapping.

use std::fs::File;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use memmap2::Mmap;
use tracing::{debug, info, warn};

use crate::codec::{frame_len, RecordDecoder};
use crate::error::{DecodeError, SourceError};
use crate::error_policy::{DecodeErrorContext, ErrorAction, ErrorPolicy};
use crate::record::Record;
use crate::source::{Fetch, RecordSource};

/// The file currently being read.
struct OpenFile {
    label: String,
    data: Bytes,
    offset: usize,
    records: u64,
}

impl OpenFile {
    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }
}

/// Reads records from an ordered list of files.
pub struct SequentialFileSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    open: Option<OpenFile>,
    decoder: Box<dyn RecordDecoder>,
    policy: ErrorPolicy,
    current: Option<Record>,
    consecutive: u32,
    decode_errors: u64,
    files_read: usize,
}

impl SequentialFileSource {
    /// Create a source over `paths`, read in order.
    pub fn new<I, P>(paths: I, decoder: impl RecordDecoder + 'static) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            cursor: 0,
            open: None,
            decoder: Box::new(decoder),
            policy: ErrorPolicy::file_default(),
            current: None,
            consecutive: 0,
            decode_errors: 0,
            files_read: 0,
        }
    }

    /// Create a source over a single file.
    pub fn single(path: impl Into<PathBuf>, decoder: impl RecordDecoder + 'static) -> Self {
        Self::new([path.into()], decoder)
    }

    /// Replace the decode-error policy.
    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Files in the list.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Files opened so far.
    pub fn files_read(&self) -> usize {
        self.files_read
    }

    /// Open the file at the cursor and advance it.
    fn open_next(&mut self) -> Result<(), SourceError> {
        let path = self.paths[self.cursor].clone();
        self.cursor += 1;
        self.consecutive = 0;

        let data = map_file(&path)?;
        info!(
            path = %path.display(),
            bytes = data.len(),
            index = self.cursor,
            of = self.paths.len(),
            "Opened record file"
        );
        self.files_read += 1;
        self.open = Some(OpenFile {
            label: path.display().to_string(),
            data,
            offset: 0,
            records: 0,
        });
        Ok(())
    }

    fn close_current(&mut self) {
        if let Some(file) = self.open.take() {
            debug!(path = %file.label, records = file.records, "Closed record file");
        }
    }

    /// Apply the policy to a failed record.
    fn on_decode_error(&mut self, origin: String, error: DecodeError) -> Result<(), SourceError> {
        self.consecutive += 1;
        self.decode_errors += 1;
        let context = DecodeErrorContext {
            origin: &origin,
            consecutive: self.consecutive,
            total: self.decode_errors,
            error: &error,
        };
        match self.policy.on_decode_error(&context) {
            ErrorAction::Skip => {
                warn!(
                    path = %origin,
                    consecutive = self.consecutive,
                    total = self.decode_errors,
                    error = %error,
                    "Skipping record that failed to decode"
                );
                Ok(())
            }
            ErrorAction::Abort => Err(SourceError::DecodeAborted {
                origin,
                consecutive: self.consecutive,
                last: error,
            }),
        }
    }
}

impl RecordSource for SequentialFileSource {
    fn name(&self) -> &str {
        "files"
    }

    fn has_next(&self) -> bool {
        let open_has_data = self
            .open
            .as_ref()
            .is_some_and(|file| file.offset < file.data.len());
        open_has_data || self.cursor < self.paths.len()
    }

    fn next(&mut self) -> Result<Fetch, SourceError> {
        loop {
            let Some(file) = self.open.as_mut() else {
                if self.cursor >= self.paths.len() {
                    self.current = None;
                    return Ok(Fetch::EndOfSource);
                }
                self.open_next()?;
                continue;
            };

            if file.offset >= file.data.len() {
                self.close_current();
                continue;
            }

            let framed = frame_len(file.remaining()).map(|len| {
                let frame = file.data.slice(file.offset..file.offset + len);
                file.offset += len;
                frame
            });

            let decoded = match framed {
                Ok(frame) => self.decoder.decode(frame),
                Err(error) => {
                    // Framing is lost; nothing after this point can be trusted.
                    file.offset = file.data.len();
                    Err(error)
                }
            };

            match decoded {
                Ok(record) => {
                    self.consecutive = 0;
                    if let Some(file) = self.open.as_mut() {
                        file.records += 1;
                    }
                    self.current = Some(record.clone());
                    return Ok(Fetch::Record(record));
                }
                Err(error) => {
                    let origin = self
                        .open
                        .as_ref()
                        .map(|file| file.label.clone())
                        .unwrap_or_default();
                    self.on_decode_error(origin, error)?;
                }
            }
        }
    }

    fn current(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    fn decode_errors(&self) -> u64 {
        self.decode_errors
    }
}

/// Map a file read-only. Empty files yield an empty buffer without mapping.
#[allow(unsafe_code)]
fn map_file(path: &Path) -> Result<Bytes, SourceError> {
    let io_err = |source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let len = file.metadata().map_err(io_err)?.len();
    if len == 0 {
        return Ok(Bytes::new());
    }
    // SAFETY: the mapping is read-only and record files are written once by the
    // acquisition system before they are handed to the loop.
    let mmap = unsafe { Mmap::map(&file) }.map_err(io_err)?;
    Ok(Bytes::from_owner(mmap))
}

//! Run-boundary classification of record header tags.
//!
//! Control events follow the CODA convention used by the data-acquisition system:
//!
//! | tag | event    | classification |
//! |-----|----------|----------------|
//! | 16  | SYNC     | `Sync`         |
//! | 17  | PRESTART | `StartOfRun`   |
//! | 18  | GO       | `Resume`       |
//! | 19  | PAUSE    | `Pause`        |
//! | 20  | END      | `EndOfRun`     |
//!
//! Physics events are the built-trigger range `0xFF50..=0xFF8F` and the legacy
//! physics tag `1`. A convention may also name a sync flag bit; a physics tag with
//! that bit set is a periodic checkpoint and classifies as `Sync`. The CODA
//! convention leaves the flag unset. Everything else is `Other`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Control classification of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// PRESTART: a new run begins.
    StartOfRun,
    /// PAUSE: data taking paused.
    Pause,
    /// GO: data taking (re)started.
    Resume,
    /// END: the run is over.
    EndOfRun,
    /// Periodic checkpoint with scaler/trigger snapshots; not a state transition.
    Sync,
    /// Ordinary data event.
    Physics,
    /// Anything else; still dispatched to processors.
    Other,
}

impl RecordKind {
    /// All kinds, in declaration order.
    pub const ALL: [RecordKind; 7] = [
        RecordKind::StartOfRun,
        RecordKind::Pause,
        RecordKind::Resume,
        RecordKind::EndOfRun,
        RecordKind::Sync,
        RecordKind::Physics,
        RecordKind::Other,
    ];

    /// True for PRESTART, GO, PAUSE and END.
    pub fn is_transition(self) -> bool {
        matches!(
            self,
            RecordKind::StartOfRun | RecordKind::Pause | RecordKind::Resume | RecordKind::EndOfRun
        )
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordKind::StartOfRun => "start_of_run",
            RecordKind::Pause => "pause",
            RecordKind::Resume => "resume",
            RecordKind::EndOfRun => "end_of_run",
            RecordKind::Sync => "sync",
            RecordKind::Physics => "physics",
            RecordKind::Other => "other",
        };
        f.pad(label)
    }
}

/// Tag values that drive classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TagConvention {
    /// SYNC control tag.
    pub sync: u16,
    /// PRESTART control tag.
    pub prestart: u16,
    /// GO control tag.
    pub go: u16,
    /// PAUSE control tag.
    pub pause: u16,
    /// END control tag.
    pub end: u16,
    /// Tags that are physics events outside the range.
    pub physics_tags: Vec<u16>,
    /// Inclusive tag range of physics events.
    pub physics_range: (u16, u16),
    /// Bit within a physics tag that flags a sync event; zero disables.
    pub sync_flag: u16,
}

impl Default for TagConvention {
    fn default() -> Self {
        Self::coda()
    }
}

impl TagConvention {
    /// The CODA convention.
    pub fn coda() -> Self {
        Self {
            sync: 16,
            prestart: 17,
            go: 18,
            pause: 19,
            end: 20,
            physics_tags: vec![1],
            physics_range: (0xFF50, 0xFF8F),
            sync_flag: 0,
        }
    }

    /// Classify a header tag.
    pub fn classify_tag(&self, tag: u16) -> RecordKind {
        if tag == self.prestart {
            RecordKind::StartOfRun
        } else if tag == self.go {
            RecordKind::Resume
        } else if tag == self.pause {
            RecordKind::Pause
        } else if tag == self.end {
            RecordKind::EndOfRun
        } else if tag == self.sync {
            RecordKind::Sync
        } else if self.is_physics(tag) {
            if self.sync_flag != 0 && tag & self.sync_flag == self.sync_flag {
                RecordKind::Sync
            } else {
                RecordKind::Physics
            }
        } else {
            RecordKind::Other
        }
    }

    /// Classify a record by its header tag.
    pub fn classify(&self, record: &Record) -> RecordKind {
        self.classify_tag(record.tag())
    }

    fn is_physics(&self, tag: u16) -> bool {
        let (low, high) = self.physics_range;
        (low..=high).contains(&tag) || self.physics_tags.contains(&tag)
    }
}

/// Classify a header tag with the CODA convention.
pub fn classify(tag: u16) -> RecordKind {
    TagConvention::coda().classify_tag(tag)
}

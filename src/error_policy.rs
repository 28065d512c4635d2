//! Decode-error policies for record sources.
//!
//! File sources skip a bounded number of consecutive failures per file before
//! escalating; live sources never halt on a single malformed message.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Consecutive failures tolerated per file by [`ErrorPolicy::file_default`].
pub const DEFAULT_FILE_RETRY_LIMIT: u32 = 5;

/// What a source does with a record that failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Drop the record and move on to the next one.
    Skip,
    /// Stop the source and surface the error.
    Abort,
}

/// Information handed to the policy for each failure.
#[derive(Debug)]
pub struct DecodeErrorContext<'a> {
    /// Where the record came from (file path or channel name).
    pub origin: &'a str,
    /// Failures in a row in the current file, including this one.
    pub consecutive: u32,
    /// Failures over the source's lifetime, including this one.
    pub total: u64,
    /// The failure itself.
    pub error: &'a DecodeError,
}

/// Decides whether a decode failure is recoverable.
///
/// # Example
///
/// ```rust
/// use daq_record_loop::error_policy::{ErrorAction, ErrorPolicy};
///
/// let policy = ErrorPolicy::SkipUpTo { max_consecutive: 3 };
/// assert_eq!(policy.decide(2), ErrorAction::Skip);
/// assert_eq!(policy.decide(3), ErrorAction::Abort);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Always skip.
    Skip,
    /// Skip until `max_consecutive` failures in a row, then abort.
    SkipUpTo {
        /// Consecutive failures that trigger the abort.
        max_consecutive: u32,
    },
    /// Abort on the first failure.
    Abort,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::file_default()
    }
}

impl ErrorPolicy {
    /// Default for file sources: bounded skipping per file.
    pub fn file_default() -> Self {
        ErrorPolicy::SkipUpTo {
            max_consecutive: DEFAULT_FILE_RETRY_LIMIT,
        }
    }

    /// Default for live transport sources: skip unconditionally.
    pub fn live_default() -> Self {
        ErrorPolicy::Skip
    }

    /// Decide for a failure with full context.
    pub fn on_decode_error(&self, context: &DecodeErrorContext<'_>) -> ErrorAction {
        self.decide(context.consecutive)
    }

    /// Decide from the consecutive-failure count alone.
    pub fn decide(&self, consecutive: u32) -> ErrorAction {
        match *self {
            ErrorPolicy::Skip => ErrorAction::Skip,
            ErrorPolicy::SkipUpTo { max_consecutive } if consecutive < max_consecutive => {
                ErrorAction::Skip
            }
            ErrorPolicy::SkipUpTo { .. } | ErrorPolicy::Abort => ErrorAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_default_never_aborts() {
        let policy = ErrorPolicy::live_default();
        assert_eq!(policy.decide(u32::MAX), ErrorAction::Skip);
    }

    #[test]
    fn test_file_default_escalates_after_limit() {
        let policy = ErrorPolicy::file_default();
        let error = DecodeError::MissingHeader { len: 4 };
        for consecutive in 1..DEFAULT_FILE_RETRY_LIMIT {
            let context = DecodeErrorContext {
                origin: "run.evio.0",
                consecutive,
                total: u64::from(consecutive),
                error: &error,
            };
            assert_eq!(policy.on_decode_error(&context), ErrorAction::Skip);
        }
        assert_eq!(policy.decide(DEFAULT_FILE_RETRY_LIMIT), ErrorAction::Abort);
    }

    #[test]
    fn test_abort_policy_aborts_immediately() {
        assert_eq!(ErrorPolicy::Abort.decide(1), ErrorAction::Abort);
    }

    #[test]
    fn test_policies_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: ErrorPolicy,
        }
        let parsed: Wrapper =
            toml::from_str("policy = { mode = \"skip_up_to\", max_consecutive = 2 }").unwrap();
        assert_eq!(parsed.policy, ErrorPolicy::SkipUpTo { max_consecutive: 2 });
        let parsed: Wrapper = toml::from_str("policy = { mode = \"skip\" }").unwrap();
        assert_eq!(parsed.policy, ErrorPolicy::Skip);
    }
}

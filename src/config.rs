//! Configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. built-in defaults ([`LoopConfig::default`])
//! 2. a TOML file (`config/record_loop.toml` by default)
//! 3. environment variables prefixed with `RECORD_LOOP_`, nested keys separated
//!    by `__` (for example `RECORD_LOOP_QUEUE__CAPACITY=5000`)
//!
//! # Example
//! ```no_run
//! use daq_record_loop::config::LoopConfig;
//!
//! let config = LoopConfig::load_from("config/record_loop.toml")?;
//! config.validate()?;
//! println!("queue capacity: {}", config.queue.capacity);
//! # Ok::<(), daq_record_loop::error::ConfigError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::classify::TagConvention;
use crate::error::ConfigError;
use crate::error_policy::ErrorPolicy;
use crate::queue::{BoundedRecordQueue, OverflowPolicy, DEFAULT_BLOCK_TIMEOUT, DEFAULT_CAPACITY};
use crate::record_loop::{LoopOptions, DEFAULT_PAUSE_POLL};
use crate::source::queue::DEFAULT_POP_TIMEOUT;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/record_loop.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "RECORD_LOOP_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Live queue settings
    pub queue: QueueConfig,
    /// File source settings
    pub files: FilesConfig,
    /// Live source settings
    pub live: LiveConfig,
    /// Loop behaviour
    pub run: RunConfig,
    /// Tag convention for classification
    pub classify: TagConvention,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "record-loop".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Bounded queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued records
    pub capacity: usize,
    /// What a push does on a full queue
    pub overflow: OverflowPolicy,
    /// How long a push waits when `overflow = "block"`
    #[serde(with = "humantime_serde")]
    pub block_timeout: Duration,
    /// How long the loop waits for a record before re-checking commands
    #[serde(with = "humantime_serde")]
    pub pop_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            overflow: OverflowPolicy::DropOldest,
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
            pop_timeout: DEFAULT_POP_TIMEOUT,
        }
    }
}

impl QueueConfig {
    /// Build a queue with these settings.
    pub fn build(&self) -> BoundedRecordQueue {
        BoundedRecordQueue::new(self.capacity, self.overflow).with_block_timeout(self.block_timeout)
    }
}

/// File source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Files to read, in order
    pub paths: Vec<PathBuf>,
    /// Decode-error policy
    pub error_policy: ErrorPolicy,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            error_policy: ErrorPolicy::file_default(),
        }
    }
}

/// Live source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Decode-error policy for the transport receiver
    pub error_policy: ErrorPolicy,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::live_default(),
        }
    }
}

/// Loop behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Stop after this many records (0 = unlimited)
    pub max_records: u64,
    /// Start paused, waiting for resume or step
    pub start_paused: bool,
    /// Register the end-of-run sentinel
    pub sentinel_on_end: bool,
    /// Longest uninterrupted wait while paused
    #[serde(with = "humantime_serde")]
    pub pause_poll: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_records: 0,
            start_paused: false,
            sentinel_on_end: true,
            pause_poll: DEFAULT_PAUSE_POLL,
        }
    }
}

impl LoopConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment. A missing file leaves the
    /// defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Ok(Self::figment(path).extract()?)
    }

    /// The provider stack, for callers that want to merge more layers.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(LoopConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue.capacity must be at least 1".to_string(),
            ));
        }

        if self.queue.overflow == OverflowPolicy::Block && self.queue.block_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "queue.block_timeout must be non-zero when overflow = \"block\"".to_string(),
            ));
        }

        if self.queue.pop_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "queue.pop_timeout must be non-zero".to_string(),
            ));
        }

        if self.run.pause_poll.is_zero() {
            return Err(ConfigError::Invalid(
                "run.pause_poll must be non-zero".to_string(),
            ));
        }

        for (section, policy) in [
            ("files", self.files.error_policy),
            ("live", self.live.error_policy),
        ] {
            if policy == (ErrorPolicy::SkipUpTo { max_consecutive: 0 }) {
                return Err(ConfigError::Invalid(format!(
                    "{section}.error_policy.max_consecutive must be at least 1"
                )));
            }
        }

        let (low, high) = self.classify.physics_range;
        if low > high {
            return Err(ConfigError::Invalid(format!(
                "classify.physics_range is empty ({low:#06x} > {high:#06x})"
            )));
        }

        Ok(())
    }

    /// Loop options derived from the `[run]` and `[classify]` sections.
    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            max_records: self.run.max_records,
            start_paused: self.run.start_paused,
            convention: self.classify.clone(),
            pause_poll: self.run.pause_poll,
        }
    }
}

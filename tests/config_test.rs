//! The shipped sample configuration loads and validates.

use std::time::Duration;

use daq_record_loop::config::LoopConfig;
use daq_record_loop::error_policy::ErrorPolicy;
use daq_record_loop::{OverflowPolicy, TagConvention};

const SAMPLE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/record_loop.toml");

#[test]
fn test_sample_config_matches_defaults() {
    let config = LoopConfig::load_from(SAMPLE).unwrap();
    config.validate().unwrap();

    assert_eq!(config.queue.capacity, 1000);
    assert_eq!(config.queue.overflow, OverflowPolicy::DropOldest);
    assert_eq!(config.queue.pop_timeout, Duration::from_millis(100));
    assert_eq!(
        config.files.error_policy,
        ErrorPolicy::SkipUpTo { max_consecutive: 5 }
    );
    assert_eq!(config.live.error_policy, ErrorPolicy::Skip);
    assert_eq!(config.classify, TagConvention::coda());
    assert!(config.run.sentinel_on_end);
}

#[test]
fn test_sample_config_drives_loop_options() {
    let config = LoopConfig::load_from(SAMPLE).unwrap();
    let options = config.loop_options();
    assert_eq!(options.max_records, 0);
    assert!(!options.start_paused);
    assert_eq!(options.pause_poll, Duration::from_millis(100));
}

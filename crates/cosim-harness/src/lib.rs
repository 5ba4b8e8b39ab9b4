//! Test harness for the cosim runtime
//!
//! Deterministic doubles for exercising the broker loop without transports:
//! a recording command processor that republishes every dispatched command
//! on a channel, a collecting message sink, and canned configurations with
//! short tick intervals.

pub mod recorder;

pub use recorder::{recording_processor, CollectingSender, Dispatched, RecordingProcessor};

use cosim_core::CoreConfig;

/// A configuration with a tick short enough for liveness tests and all
/// console output suppressed.
pub fn short_tick_config() -> CoreConfig {
    CoreConfig::testing()
}

/// Like [`short_tick_config`] but with an effectively infinite tick, for
/// tests that must not see watchdog traffic.
pub fn no_tick_config() -> CoreConfig {
    let mut config = CoreConfig::testing();
    config.tick = std::time::Duration::from_secs(3600);
    config
}

/// Route `tracing` output to the test console for failure diagnosis.
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

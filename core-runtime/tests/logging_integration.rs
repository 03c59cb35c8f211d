//! Integration tests for logging bootstrap

use bridge_traits::logging::LogLevel;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_runtime::Error;

#[test]
fn test_first_init_installs_and_later_inits_keep_it() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_phase_timings(true);

    assert!(init_logging(&config).unwrap());
    tracing::info!(target: "core_sync", library_id = 1, "Import started");

    assert!(!init_logging(&config).unwrap());
    assert!(matches!(
        init_logging(&config.with_filter("core_sync=[")),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_format_round_trips_through_serde() {
    for format in [LogFormat::Pretty, LogFormat::Json, LogFormat::Compact] {
        let json = serde_json::to_string(&format).unwrap();
        let back: LogFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(back, format);
    }
    assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), "\"json\"");
}

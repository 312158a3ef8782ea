//! Logging bootstrap shared by the broker, the client roles and the binary.

use tracing::level_filters::LevelFilter;

/// Map a configured `log.level` value to a filter. Unknown values fall back
/// to `INFO`.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "off" | "none" => LevelFilter::OFF,
        "error" => LevelFilter::ERROR,
        "warn" | "warning" => LevelFilter::WARN,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}

/// Install the global fmt subscriber at `level`.
///
/// Returns false if a subscriber was already installed, which happens when
/// tests or an embedding application call this more than once.
pub fn init(level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level_filter(level))
        .with_target(false)
        .try_init()
        .is_ok()
}

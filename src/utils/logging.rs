//! Logging bootstrap for the binary and for tests.

use tracing::Level;

/// Map a configured level name onto a `tracing` level. Unknown names mean
/// `info`.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_lowercase().as_str() {
        "warning" => Level::WARN,
        other => other.parse().unwrap_or(Level::INFO),
    }
}

/// Install the global fmt subscriber, writing to stderr.
///
/// Uses `try_init`, so calling this again (tests, embedders that already set
/// a subscriber) is a no-op.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

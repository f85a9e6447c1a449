//! Tracing/logging (shared setup).

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::{LogConfig, LogFormat, ParseLogFormatError};

/// Initialize process-wide tracing/logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(config: &LogConfig) {
    self::tracing::init(config);
}

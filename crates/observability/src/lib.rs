//! Tracing and logging (shared setup).

/// Initialize process-wide tracing/logging with the format named by
/// `SLOTBOOK_LOG_FORMAT` (JSON when unset).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init();
}

/// Subscriber configuration (filters, output formats).
pub mod subscriber;

pub use subscriber::{LOG_FORMAT_ENV, LogFormat, UnknownLogFormat, init_with};

//! Tracing and logging setup shared by the binaries.

pub mod tracing;

pub use tracing::{LogFormat, TracingConfig};

/// Initialize process-wide tracing with the given configuration.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init(config: &TracingConfig) {
    tracing::init(config);
}

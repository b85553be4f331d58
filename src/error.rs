//! Error taxonomy for the radix sort pipeline.
//!
//! Every variant is fatal: the pipeline never retries and never falls back to
//! a sequential path. Resource failures come from the device backends,
//! invariant violations from the consistency checker and the final
//! device-vs-reference comparison.

use thiserror::Error;

/// Central error type for device, scan and verification failures.
#[derive(Debug, Error)]
pub enum SortError {
    /// No usable compute device (or the backend is not built for this platform).
    #[error("no compute device available: {0}")]
    DeviceUnavailable(String),

    /// Kernel source failed to compile or a pipeline could not be created.
    #[error("failed to compile kernel `{entry}`: {message}")]
    KernelCompilation { entry: String, message: String },

    /// Configuration the device cannot honor (group size, input length).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A buffer transfer asked for more elements than the buffer holds.
    #[error("buffer access out of bounds: requested {requested} elements, capacity {capacity}")]
    OutOfBounds { requested: usize, capacity: usize },

    /// A kernel launch failed or produced an impossible result.
    #[error("kernel `{entry}` failed: {message}")]
    Launch { entry: &'static str, message: String },

    /// Two values that must agree did not.
    #[error("{context} But {left} != {right} at {index}")]
    Mismatch {
        context: &'static str,
        index: usize,
        left: u64,
        right: u64,
    },
}

pub type Result<T> = std::result::Result<T, SortError>;

impl SortError {
    /// Returns true for invariant violations, as opposed to resource failures.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, SortError::Mismatch { .. })
    }
}

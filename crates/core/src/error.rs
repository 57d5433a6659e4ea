//! Error surface of the flow engine
//!
//! File-format and device failures are reported to the caller; shape
//! mismatches between image buffers are programmer errors and assert
//! instead.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by I/O and the GPU backend
#[derive(Debug, Error)]
pub enum FlowError {
    /// Underlying read or write failure
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// A file parsed but violated its format contract
    #[error("malformed {format} file `{path}`: {reason}")]
    MalformedFile {
        /// Short format name ("pgm", "flo")
        format: &'static str,
        /// Offending file
        path: PathBuf,
        /// What the parser tripped over
        reason: String,
    },

    /// No usable compute adapter, or device creation failed
    #[error("gpu backend unavailable: {0}")]
    GpuUnavailable(String),

    /// A device-side operation failed after initialization
    #[error("gpu dispatch failed: {0}")]
    GpuDispatch(String),
}

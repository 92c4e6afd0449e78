//! Error types for the TTMc kernels
//!
//! Unsupported configurations and shape mismatches surface as typed errors
//! before any parallel work starts, so a failed call leaves the output
//! buffer in its zero-filled state. Inner-loop preconditions are checked
//! with debug assertions only.

use spindle_sparse::TileScheme;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Mode {mode} out of bounds for tensor with {nmodes} modes")]
    InvalidMode { mode: usize, nmodes: usize },

    #[error("Expected {expected} CSF tensor(s) for {scheme}, got {actual}")]
    WrongTensorCount {
        scheme: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Factor matrix {mode} has {actual} rows, expected {expected}")]
    FactorRowMismatch {
        mode: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Factor matrix {mode} must be row-major contiguous")]
    FactorLayout { mode: usize },

    #[error("Output buffer holds {actual} values, expected {expected}")]
    OutputSizeMismatch { expected: usize, actual: usize },

    #[error("TTMc does not support tiling scheme {0:?}")]
    UnsupportedTiling(TileScheme),

    #[error("Mode {mode} sits at depth {depth} of the CSF tree; only ALLMODE handles non-root output for tensors with more than 3 modes")]
    UnsupportedDepth { mode: usize, depth: usize },

    #[error("Mode {mode} does not appear in dim_perm {dim_perm:?}")]
    ModeNotInPerm { mode: usize, dim_perm: Vec<usize> },

    #[error("Worker pool construction failed: {0}")]
    PoolBuild(String),
}

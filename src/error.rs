//! Error taxonomy of the integral engines.
//!
//! Configuration errors are raised while the basis is canonicalized and sorted, before any
//! accelerator resource exists. Resource errors are recovered by host staging where a
//! fallback path exists. Kernel errors are never retried.

use crate::accel::KernelClass;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GvhfError {
    /// Malformed shell record in the input basis.
    #[error("invalid shell {shell}: {reason}")]
    InvalidShell { shell: usize, reason: String },

    /// Inconsistent engine parameters (group sizes, cutoffs, bin sizes).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller supplied an array of unexpected shape.
    #[error("shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch { what: String, expected: Vec<usize>, found: Vec<usize> },

    /// Accelerator memory exhausted with no host staging path available.
    #[error("out of accelerator memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },

    /// Non-zero status from a kernel launch.
    #[error("kernel {class:?} failed with status {status} for class {label} (group pairs {cp_ij}, {cp_kl})")]
    Kernel { class: KernelClass, label: String, cp_ij: usize, cp_kl: usize, status: i32 },

    /// Angular momentum, symmetry or operator combination that is not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type GvhfResult<T> = Result<T, GvhfError>;

impl GvhfError {
    pub fn invalid_shell(shell: usize, reason: impl Into<String>) -> Self {
        GvhfError::InvalidShell { shell, reason: reason.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        GvhfError::InvalidConfig(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        GvhfError::Unsupported(message.into())
    }

    pub fn shape(what: impl Into<String>, expected: &[usize], found: &[usize]) -> Self {
        GvhfError::ShapeMismatch { what: what.into(), expected: expected.to_vec(), found: found.to_vec() }
    }

    /// Whether the error belongs to the configuration class (reported before allocation).
    pub fn is_configuration(&self) -> bool {
        matches!(self, GvhfError::InvalidShell { .. } | GvhfError::InvalidConfig(_) | GvhfError::ShapeMismatch { .. })
    }
}

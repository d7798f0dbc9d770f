//! Error types for hybrid pipelines
//!
//! Provides the error taxonomy shared by every runnable:
//! - Leaf (child) failures
//! - Empty candidate lists for selection/folding
//! - Shape mismatches between runnables
//! - Cancellation and bounded waits
//! - Fan-outs where every child failed

/// Result alias used throughout the workspace
pub type HybridResult<T> = Result<T, HybridError>;

/// Main error type for runnables and composition primitives
#[derive(Debug, thiserror::Error)]
pub enum HybridError {
    /// A leaf runnable reported a failure
    #[error("runnable {runnable} failed: {message}")]
    Runnable {
        /// Name of the failing runnable
        runnable: String,
        /// Failure description
        message: String,
    },

    /// Error raised by collaborator code through `?`
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// Selection or folding over an empty candidate list
    #[error("{operation} requires at least one input state")]
    EmptyInput {
        /// Operation that received no input
        operation: &'static str,
    },

    /// Input shape or count does not fit the runnable
    #[error("invalid input for {runnable}: {reason}")]
    InvalidInput {
        /// Runnable that rejected the input
        runnable: String,
        /// Why it was rejected
        reason: String,
    },

    /// The run was cancelled before producing a result
    #[error("operation cancelled")]
    Cancelled,

    /// A bounded wait expired
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Bound that was exceeded
        duration_ms: u64,
    },

    /// Every child of a fan-out failed
    #[error("all {count} branches failed, first failure: {first}")]
    AllFailed {
        /// Number of failed children
        count: usize,
        /// First failure in completion order
        first: Box<HybridError>,
    },

    /// The task driving a runnable panicked
    #[error("runnable {runnable} panicked: {message}")]
    Panicked {
        /// Runnable whose task panicked
        runnable: String,
        /// Panic payload, if printable
        message: String,
    },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl HybridError {
    /// Create a leaf failure
    #[inline]
    pub fn runnable(runnable: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Runnable {
            runnable: runnable.into(),
            message: message.into(),
        }
    }

    /// Create an input rejection
    #[inline]
    pub fn invalid_input(runnable: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            runnable: runnable.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is a cancellation acknowledgement
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if error is retryable
    ///
    /// Structural errors (bad input, empty lists, config) are not.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Runnable { .. } | Self::Other(_) | Self::Timeout { .. } | Self::Panicked { .. } => {
                true
            }
            Self::AllFailed { first, .. } => first.is_retryable(),
            Self::EmptyInput { .. }
            | Self::InvalidInput { .. }
            | Self::Cancelled
            | Self::Config(_) => false,
        }
    }
}

// src/error.rs

//! Error taxonomy for the generational counting Bloom filter and its
//! remote backend.

use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while operating a local or remote filter.
#[derive(Error, Debug, Clone)]
pub enum FilterError {
    /// `life` was zero or greater than `max_life`, or a `BitCellArray`
    /// was constructed with an `nbits` outside `{1, 2, 4, 8}`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A hasher returned an index outside `0..m`.
    #[error("hasher returned out-of-range index {index} for m={m}")]
    HashOutOfRange { index: u64, m: u64 },

    /// `Open` was called against an existing remote filter whose stored
    /// parameters differ from the ones requested.
    #[error("parameter mismatch: stored={stored:?} requested={requested:?}")]
    ParameterMismatch { stored: String, requested: String },

    /// An optimistic transaction exhausted its retry budget.
    #[error("transaction on key {key:?} failed after {retries} retries")]
    TransactionFailed { key: String, retries: u32 },

    /// The backing store reported a transport-level failure.
    #[error("transport error during {operation} on key {key:?}: {source}")]
    Transport {
        operation: &'static str,
        key: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The backing store response did not match the shape the caller expected
    /// (wrong number of BITFIELD results, malformed props/gen JSON, ...).
    #[error("malformed response from backing store during {operation}: {detail}")]
    MalformedResponse {
        operation: &'static str,
        detail: String,
    },

    /// The operation was aborted via its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl FilterError {
    pub(crate) fn transport(operation: &'static str, key: impl Into<String>, source: std::io::Error) -> Self {
        FilterError::Transport {
            operation,
            key: key.into(),
            source: Arc::new(source),
        }
    }
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, FilterError>;

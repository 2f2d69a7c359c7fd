//! Error taxonomy for the orchestrator.
//!
//! Every fallible path in the crate resolves to one of these kinds. The
//! distinction that matters operationally is not the Rust type but whether a
//! kind is retried, surfaced immediately, or recovered with a fallback -
//! see the `retryable()` and `recoverable()` helpers below, which the
//! executor and stream multiplexer consult directly instead of re-deriving
//! the policy from the error message.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the orchestrator core.
///
/// Variants mirror the taxonomy in the design doc one-to-one; adapters
/// report their own failures through [`AdapterError`] which this type
/// wraps via `From`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed registry or a source missing a required field/capability.
    /// Fatal at startup; never recovered.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The classifier's upstream (LLM) failed. Recovered by falling back to
    /// the first source that declares `translate_nl`.
    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(String),

    /// The plan failed DAG or capability validation. No execution occurs.
    #[error("invalid plan: {0}")]
    PlanInvalid(String),

    /// Transient adapter failure (network, throttling, 5xx-equivalent).
    /// Retried with backoff up to `max_attempts`.
    #[error("adapter transport error on {source_id}: {message}")]
    AdapterTransport {
        /// Source the failing call was directed at.
        source_id: String,
        /// Human-readable detail from the adapter.
        message: String,
    },

    /// Permanent adapter failure (auth, bad query, schema mismatch). Never
    /// retried.
    #[error("adapter permanent error on {source_id}: {message}")]
    AdapterPermanent {
        /// Source the failing call was directed at.
        source_id: String,
        /// Human-readable detail from the adapter.
        message: String,
    },

    /// Deadline exceeded for an operation or the whole plan.
    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout {
        /// Elapsed time in milliseconds when the deadline fired.
        elapsed_ms: u64,
    },

    /// Caller-initiated or higher-level cancellation.
    #[error("cancelled")]
    Cancelled,

    /// Unexpected failure while merging operation results.
    #[error("aggregation failed: {0}")]
    AggregationFailed(String),

    /// Session or source not found. Also returned for cross-caller access,
    /// deliberately indistinguishable from a genuine miss.
    #[error("not found")]
    NotFound,
}

impl Error {
    /// Whether the executor should retry the operation that produced this
    /// error, rather than transition it straight to `FAILED`.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Error::AdapterTransport { .. })
    }

    /// Whether this error is safe to surface to a caller as a recovered
    /// condition (`error` event with `recoverable: true`) rather than a
    /// fatal one.
    #[must_use]
    pub fn recoverable(&self) -> bool {
        matches!(self, Error::ClassificationUnavailable(_) | Error::Timeout { .. })
    }

    /// Stable machine-readable code used in `error` stream events and
    /// responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::ConfigInvalid(_) => "ConfigInvalid",
            Error::ClassificationUnavailable(_) => "ClassificationUnavailable",
            Error::PlanInvalid(_) => "PlanInvalid",
            Error::AdapterTransport { .. } => "AdapterTransport",
            Error::AdapterPermanent { .. } => "AdapterPermanent",
            Error::Timeout { .. } => "Timeout",
            Error::Cancelled => "Cancelled",
            Error::AggregationFailed(_) => "AggregationFailed",
            Error::NotFound => "NotFound",
        }
    }
}

/// Error surface returned by an [`crate::adapter::Adapter`] implementation.
///
/// Adapters never panic and never raise exceptions for expected failure
/// modes; they report `retryable` explicitly so the executor does not have
/// to sniff error strings to decide on backoff.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct AdapterError {
    /// Human-readable detail, safe to show to callers.
    pub message: String,
    /// Whether the executor should retry this call with backoff.
    pub retryable: bool,
}

impl AdapterError {
    /// Construct a transient error (network, throttling, 5xx-equivalent).
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }

    /// Construct a permanent error (auth, bad query, schema mismatch).
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }

    pub(crate) fn into_error(self, source_id: &str) -> Error {
        if self.retryable {
            Error::AdapterTransport { source_id: source_id.to_string(), message: self.message }
        } else {
            Error::AdapterPermanent { source_id: source_id.to_string(), message: self.message }
        }
    }
}

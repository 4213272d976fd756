//! Error types for freshet operations

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Cache tier that produced a storage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Fast,
    Durable,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Fast => write!(f, "fast"),
            Tier::Durable => write!(f, "durable"),
        }
    }
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{tier} tier read failed for {key}: {reason}")]
    ReadFailed {
        tier: Tier,
        key: String,
        reason: String,
    },

    #[error("{tier} tier write failed for {key}: {reason}")]
    WriteFailed {
        tier: Tier,
        key: String,
        reason: String,
    },

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache key construction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Key segment {index} is empty")]
    EmptySegment { index: usize },

    #[error("Key segment {segment:?} contains the reserved separator {separator:?}")]
    ReservedSeparator { segment: String, separator: char },

    #[error("Expected {expected} key segments, got {got}")]
    SegmentCount { expected: usize, got: usize },
}

/// Upstream resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No upstream provider available for {subject}")]
    NoProviders { subject: String },

    #[error("Provider {provider} failed: {reason}")]
    ProviderFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("Malformed envelope from {provider}: {reason}")]
    MalformedEnvelope { provider: String, reason: String },

    #[error("All {attempted} providers failed for {subject}, last error: {last_error}")]
    AllProvidersFailed {
        subject: String,
        attempted: usize,
        last_error: String,
    },
}

/// Ownership verification errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Verification subject not found: {subject_id}")]
    SubjectNotFound { subject_id: Uuid },

    #[error("Failed to mark {subject_id} verified: {reason}")]
    MarkVerifiedFailed { subject_id: Uuid, reason: String },

    #[error("Step {step} failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Probe {method} failed for {domain}: {reason}")]
    ProbeFailed {
        method: String,
        domain: String,
        reason: String,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// How a failure should be treated by whoever observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Transient; safe to re-attempt.
    Retryable,
    /// A correctness-critical operation failed; abort the enclosing work.
    Fatal,
    /// Non-critical side effect; log and continue.
    Soft,
}

/// Master error type for all freshet errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FreshetError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Verification error: {0}")]
    Verification(#[from] VerificationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Producer failed: {reason}")]
    Producer { reason: String },
}

impl FreshetError {
    /// Build a producer error from anything displayable.
    pub fn producer(reason: impl std::fmt::Display) -> Self {
        FreshetError::Producer {
            reason: reason.to_string(),
        }
    }

    /// Classify this error for retry and propagation decisions.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            FreshetError::Storage(_) => FailureClass::Soft,
            FreshetError::Resolve(_) => FailureClass::Retryable,
            FreshetError::Producer { .. } => FailureClass::Retryable,
            FreshetError::Verification(VerificationError::MarkVerifiedFailed { .. }) => {
                FailureClass::Fatal
            }
            FreshetError::Verification(VerificationError::ProbeFailed { .. }) => {
                FailureClass::Soft
            }
            FreshetError::Verification(_) => FailureClass::Retryable,
            FreshetError::Key(_) | FreshetError::Config(_) => FailureClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.failure_class() == FailureClass::Retryable
    }
}

/// Result type alias for freshet operations.
pub type FreshetResult<T> = Result<T, FreshetError>;

// =============================================================================
// TESTS
// =============================================================================

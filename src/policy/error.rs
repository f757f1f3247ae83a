//! Error types for the chain engine.
//!
//! Two disjoint kinds live here:
//! - [`PolicyError`] is the unrecoverable channel. It aborts body stages and
//!   reaches the chain's error handler exactly once.
//! - [`ChainError`] reports misuse of the body side (illegal state). It is
//!   returned to the caller and never reaches any handler.
//!
//! Recoverable outcomes are not errors; see [`PolicyFailure`](super::PolicyFailure).

use thiserror::Error;

/// Unexpected, unrecoverable fault raised while running a chain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// A policy control method returned an error.
    #[error("policy `{policy}` raised: {message}")]
    Raised { policy: String, message: String },

    /// A body-stream stage failed while transforming a chunk.
    #[error("body stage `{policy}` failed: {message}")]
    Body { policy: String, message: String },

    /// A policy dropped its continuation without resuming the chain.
    #[error("policy `{policy}` dropped its continuation without resuming the chain")]
    Abandoned { policy: String },

    /// The outbound connector could not complete the exchange.
    #[error("connector error: {0}")]
    Connector(String),

    /// A body stream feeding or leaving the chain broke off mid-way.
    #[error("body stream interrupted: {0}")]
    Interrupted(String),
}

impl PolicyError {
    /// Shorthand for [`PolicyError::Raised`].
    pub fn raised(policy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Raised {
            policy: policy.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`PolicyError::Body`].
    pub fn body(policy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Body {
            policy: policy.into(),
            message: message.into(),
        }
    }

    /// Stable label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Raised { .. } => "raised",
            Self::Body { .. } => "body",
            Self::Abandoned { .. } => "abandoned",
            Self::Connector(_) => "connector",
            Self::Interrupted(_) => "interrupted",
        }
    }
}

/// Illegal use of a chain's body stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// `write` was called after `end`.
    #[error("attempted write after end() was called")]
    WriteAfterEnd,

    /// `end` was called a second time.
    #[error("end() was already called on this chain")]
    AlreadyEnded,

    /// The chain raised an unrecoverable error; the body stream is closed.
    #[error("body stream aborted: {0}")]
    Aborted(PolicyError),
}

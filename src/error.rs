//! Error types for oracle calls and recovery sessions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// A single oracle call that could not produce a usable measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum OracleError {
    /// The request never completed (connection refused, timeout, TLS failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a status outside the accepted set.
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus {
        /// Status code returned by the endpoint.
        status: u16,
    },

    /// An in-process oracle reported a failure.
    #[error("local oracle failed: {0}")]
    Local(String),
}

/// Errors that end a recovery session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecoveryError {
    /// The session configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A prefix longer than the target length reached the probe builder.
    #[error("probe of length {length} exceeds target length {max}")]
    InvalidProbeLength {
        /// Length of the rejected prefix.
        length: usize,
        /// Configured target length.
        max: usize,
    },

    /// Every trial of one candidate failed, so it cannot be ranked.
    #[error(
        "round {round}: oracle unavailable for candidate {symbol:?} \
         ({failures} failed trials, last error: {last_error})"
    )]
    OracleUnavailable {
        /// Round in which the candidate starved.
        round: usize,
        /// Candidate symbol without samples.
        symbol: char,
        /// Number of failed trials for that candidate.
        failures: usize,
        /// Last oracle error observed for the candidate.
        last_error: OracleError,
    },

    /// Several candidates tied for the best score and the policy forbids guessing.
    #[error("round {round}: ambiguous ranking between {symbols:?}")]
    AmbiguousRanking {
        /// Round in which the tie occurred.
        round: usize,
        /// Tied symbols in alphabet order.
        symbols: Vec<char>,
    },

    /// The best candidate is not separated from the runner-up and the policy forbids guessing.
    #[error("round {round}: starved signal, separation {separation:.2} below {required:.2}")]
    StarvedSignal {
        /// Round in which the signal starved.
        round: usize,
        /// Observed separation in pooled standard errors.
        separation: f64,
        /// Configured minimum separation.
        required: f64,
    },

    /// The caller cancelled the session.
    #[error("cancelled after recovering {prefix:?}")]
    Cancelled {
        /// Prefix confirmed before cancellation.
        prefix: String,
    },

    /// The session ran out of its time budget.
    #[error("time budget exhausted after {elapsed:?} with prefix {prefix:?}")]
    DeadlineExceeded {
        /// Prefix confirmed before the deadline.
        prefix: String,
        /// Time spent in the session.
        elapsed: Duration,
    },
}

impl RecoveryError {
    /// Prefix recovered before the session stopped, when the error carries one.
    pub fn partial_prefix(&self) -> Option<&str> {
        match self {
            Self::Cancelled { prefix } | Self::DeadlineExceeded { prefix, .. } => Some(prefix),
            _ => None,
        }
    }
}

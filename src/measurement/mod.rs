//! Measurement infrastructure: oracles, paired sampling and noise mitigation.
//!
//! This module provides:
//! - The [`Oracle`] boundary (`probe -> duration`) with an in-process and an
//!   HTTP binding
//! - Paired, interleaved trial collection ([`Sampler`])
//! - Session-scoped CPU pinning ([`AffinityGuard`])
//! - Request pacing policies ([`Pacing`], [`Pacer`])
//!
//! # Interleaving
//!
//! Each trial measures the base probe and the candidate probe back to back,
//! so both arms see the same ambient load. The order inside a trial
//! alternates by default; all-base-then-all-candidate batching is never used
//! because it turns slow drift (thermal throttling, network congestion) into
//! a fake timing difference.

mod affinity;
mod collector;
mod local;
mod pacing;
#[cfg(feature = "remote")]
mod remote;
mod timer;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OracleError;
use crate::types::Probe;

pub use affinity::{AffinityGuard, AffinityResult};
pub use collector::{FailedTrial, Sample, SampleSet, Sampler};
pub use local::LocalOracle;
pub use pacing::{Pacer, Pacing};
#[cfg(feature = "remote")]
pub use remote::{Injection, RemoteOracle, RemoteOracleBuilder, CACHE_BUST_LEN};
pub use timer::{black_box, Timer};

/// Where the oracle runs, which decides the default noise mitigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleKind {
    /// In-process call; CPU pinning applies.
    Local,
    /// Network round trip; pacing and cache-busting apply.
    Remote,
}

/// Oracle-specific metadata about one call, kept for diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// In-process call completed.
    Local,
    /// HTTP response received.
    Http {
        /// Status code. Redirects are reported as-is, never followed.
        status: u16,
        /// Response body size in bytes.
        size: usize,
        /// `Location` header of a redirect.
        location: Option<String>,
    },
}

impl Outcome {
    /// HTTP status, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::Local => None,
            Outcome::Http { status, .. } => Some(*status),
        }
    }

    /// Response body size, if any.
    pub fn size(&self) -> Option<usize> {
        match self {
            Outcome::Local => None,
            Outcome::Http { size, .. } => Some(*size),
        }
    }
}

/// One timed oracle call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    /// Elapsed time attributed to the oracle.
    pub duration: Duration,
    /// What the oracle reported.
    pub outcome: Outcome,
}

impl Measurement {
    /// Elapsed time in nanoseconds as a float, the unit of all scores.
    pub fn duration_ns(&self) -> f64 {
        self.duration.as_nanos() as f64
    }
}

/// A system whose response time depends on how much of a probe matches its secret.
///
/// Implementations must not pad, transform or cache the probe: the core
/// relies on every call seeing exactly the value it built.
pub trait Oracle {
    /// Submit `probe` once and time it.
    fn measure(&mut self, probe: &Probe) -> Result<Measurement, OracleError>;

    /// Where the oracle runs. Defaults to [`OracleKind::Local`].
    fn kind(&self) -> OracleKind {
        OracleKind::Local
    }
}

impl<O: Oracle + ?Sized> Oracle for &mut O {
    fn measure(&mut self, probe: &Probe) -> Result<Measurement, OracleError> {
        (**self).measure(probe)
    }

    fn kind(&self) -> OracleKind {
        (**self).kind()
    }
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn measure(&mut self, probe: &Probe) -> Result<Measurement, OracleError> {
        (**self).measure(probe)
    }

    fn kind(&self) -> OracleKind {
        (**self).kind()
    }
}

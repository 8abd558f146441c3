//! # timing-recover
//!
//! Recover a secret through a timing side channel.
//!
//! Given an oracle that compares a supplied value against a hidden secret
//! and exits early on the first mismatch, this crate recovers the secret one
//! symbol at a time:
//! - every candidate symbol is appended to the confirmed prefix and padded
//!   to the secret length
//! - each candidate is timed against the bare prefix in interleaved pairs
//! - the candidate that keeps the oracle busy longest is confirmed
//!
//! Oracles can be in-process closures ([`LocalOracle`]) or HTTP endpoints
//! ([`RemoteOracle`], `remote` feature) that read the value from a cookie,
//! query parameter or header.
//!
//! ## Quick Start
//!
//! ```ignore
//! use timing_recover::{Recovery, RemoteOracle};
//!
//! let mut oracle = RemoteOracle::builder("https://target.local/admin")
//!     .cookie("session")
//!     .cache_bust(true)
//!     .build()?;
//!
//! let result = Recovery::thorough()
//!     .target_length(32)
//!     .run_with_observer(&mut oracle, &mut |round: &RoundReport| {
//!         println!("{}", round.prefix);
//!     })?;
//! println!("secret: {}", result.secret);
//! ```
//!
//! ## Noise
//!
//! A recovery is only as good as its weakest round. Each round reports the
//! separation between the chosen symbol and the runner-up in pooled standard
//! errors; rounds below [`Config::min_separation`] or with tied candidates
//! carry a [`Diagnostic`] and can be made fatal with [`SignalPolicy::strict`].

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
mod config;
mod error;
mod probe;
mod recovery;
mod result;
mod types;

// Functional modules
pub mod measurement;
pub mod output;
pub mod preflight;
pub mod statistics;
#[cfg(feature = "remote")]
pub mod survey;

// Re-exports for public API
pub use config::{
    Config, ConfigError, CpuPinning, DiagnosticAction, SignalPolicy, TrialOrder, DEFAULT_FILLER,
    DEFAULT_TARGET_LENGTH,
};
pub use error::{OracleError, RecoveryError};
pub use measurement::{LocalOracle, Measurement, Oracle, OracleKind, Outcome, Pacing, Sampler};
#[cfg(feature = "remote")]
pub use measurement::{Injection, RemoteOracle};
pub use probe::ProbeBuilder;
pub use recovery::{CancellationToken, GuessState, Recovery, RoundObserver};
pub use result::{Diagnostic, Metadata, RecoveryResult, RoundReport};
pub use types::{Alphabet, CandidateKey, Probe};

//! Configuration for a recovery session.

use std::time::Duration;

use crate::measurement::Pacing;
use crate::types::Alphabet;

/// Default length of the secret being recovered.
pub const DEFAULT_TARGET_LENGTH: usize = 32;

/// Default padding symbol. Must not be part of the working alphabet.
pub const DEFAULT_FILLER: char = '0';

/// Configuration options for [`Recovery`](crate::Recovery).
#[derive(Debug, Clone)]
pub struct Config {
    /// Length L of the secret and of every probe sent to the oracle (default: 32).
    pub target_length: usize,

    /// Symbols tried at each position, in tie-break order.
    /// Defaults to printable ASCII minus the filler.
    pub alphabet: Alphabet,

    /// Symbol used to right-pad partial guesses to `target_length` (default: `'0'`).
    pub filler: char,

    /// Paired trials per candidate per round (default: 4,096).
    pub trials: usize,

    /// Unrecorded paired calls before each candidate's trials (default: 16).
    pub warmup: usize,

    /// Which probe of a pair is measured first in each trial.
    pub trial_order: TrialOrder,

    /// Delay policy applied before every oracle call.
    pub pacing: Pacing,

    /// CPU pinning for the duration of the session.
    pub cpu_pinning: CpuPinning,

    /// Scores within this many nanoseconds of the best are treated as tied (default: 0.0).
    pub tie_epsilon_ns: f64,

    /// Minimum gap between best and runner-up, in pooled standard errors,
    /// below which the round is flagged as starved (default: 2.0).
    /// Set to 0.0 to disable the check.
    pub min_separation: f64,

    /// What to do when a round's ranking is ambiguous or starved.
    pub signal_policy: SignalPolicy,

    /// Optional wall-clock budget for the session, checked between rounds.
    pub max_duration: Option<Duration>,

    /// Optional deterministic seed for trial ordering and cache-busting tokens.
    pub seed: Option<u64>,
}

/// Order in which the two probes of a trial are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrialOrder {
    /// Base first on even trials, candidate first on odd trials.
    #[default]
    Alternating,
    /// Coin flip per trial.
    Randomized,
    /// Always base then candidate.
    BaseFirst,
}

/// CPU affinity handling for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuPinning {
    /// Pin to the current CPU when the oracle runs in-process, never for remote oracles.
    #[default]
    Auto,
    /// Never pin.
    Off,
    /// Pin to whichever CPU the session starts on.
    Current,
    /// Pin to a specific CPU index.
    Core(usize),
}

/// Whether a diagnostic only warns or aborts the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticAction {
    /// Log and record the diagnostic, then continue with the tie-broken choice.
    #[default]
    Warn,
    /// Abort the session with an error.
    Fail,
}

/// Policy for the per-round signal diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalPolicy {
    /// Action when several candidates tie for the best score.
    pub on_ambiguous: DiagnosticAction,
    /// Action when the best candidate is not separated from the runner-up.
    pub on_starved: DiagnosticAction,
}

impl SignalPolicy {
    /// Fail on both diagnostics.
    pub fn strict() -> Self {
        Self {
            on_ambiguous: DiagnosticAction::Fail,
            on_starved: DiagnosticAction::Fail,
        }
    }
}

/// Invalid session configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The candidate alphabet has no symbols.
    #[error("candidate alphabet is empty")]
    EmptyAlphabet,

    /// Target length of zero.
    #[error("target length must be at least 1")]
    ZeroTargetLength,

    /// Trial count of zero.
    #[error("trial count must be at least 1")]
    ZeroTrials,

    /// The filler would be indistinguishable from a guessed symbol.
    #[error("filler {filler:?} is part of the candidate alphabet")]
    FillerInAlphabet {
        /// The offending filler.
        filler: char,
    },

    /// A numeric threshold is negative or not finite.
    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidThreshold {
        /// Field name.
        name: &'static str,
        /// Rejected value.
        value: f64,
    },

    /// Pacing parameters cannot be turned into a schedule.
    #[error("invalid pacing: {0}")]
    InvalidPacing(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_length: DEFAULT_TARGET_LENGTH,
            alphabet: Alphabet::printable_ascii_without(DEFAULT_FILLER),
            filler: DEFAULT_FILLER,
            trials: 4_096,
            warmup: 16,
            trial_order: TrialOrder::Alternating,
            pacing: Pacing::None,
            cpu_pinning: CpuPinning::Auto,
            tie_epsilon_ns: 0.0,
            min_separation: 2.0,
            signal_policy: SignalPolicy::default(),
            max_duration: None,
            seed: None,
        }
    }
}

impl Config {
    /// Reduced trial count for fast oracles and tests.
    pub fn quick() -> Self {
        Self {
            trials: 256,
            warmup: 4,
            ..Self::default()
        }
    }

    /// High trial count for noisy local oracles (2^14 pairs per candidate).
    pub fn thorough() -> Self {
        Self {
            trials: 1 << 14,
            warmup: 64,
            ..Self::default()
        }
    }

    /// Check the configuration before a session starts.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alphabet.is_empty() {
            return Err(ConfigError::EmptyAlphabet);
        }
        if self.target_length == 0 {
            return Err(ConfigError::ZeroTargetLength);
        }
        if self.trials == 0 {
            return Err(ConfigError::ZeroTrials);
        }
        if self.alphabet.contains(self.filler) {
            return Err(ConfigError::FillerInAlphabet {
                filler: self.filler,
            });
        }
        check_threshold("tie_epsilon_ns", self.tie_epsilon_ns)?;
        check_threshold("min_separation", self.min_separation)?;
        self.pacing.validate()?;
        Ok(())
    }
}

fn check_threshold(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target_length, 32);
        assert!(!config.alphabet.contains(config.filler));
    }

    #[test]
    fn test_filler_in_alphabet_rejected() {
        let config = Config {
            alphabet: Alphabet::parse("0123").unwrap(),
            filler: '0',
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::FillerInAlphabet { filler: '0' })
        );
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = Config {
            trials: 0,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTrials));

        let config = Config {
            target_length: 0,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTargetLength));
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let config = Config {
            tie_epsilon_ns: -1.0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { name: "tie_epsilon_ns", .. })
        ));

        let config = Config {
            min_separation: f64::NAN,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_presets() {
        assert!(Config::quick().trials < Config::default().trials);
        assert_eq!(Config::thorough().trials, 16_384);
    }
}

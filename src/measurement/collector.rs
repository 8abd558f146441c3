//! Paired sample collection with interleaved design.
//!
//! Every trial measures the base probe and one candidate probe back to back
//! and records the difference `duration(base) - duration(candidate)`. The
//! order inside a pair follows [`TrialOrder`] so that monotonic drift cancels
//! out instead of biasing one arm.

use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError, TrialOrder};
use crate::error::OracleError;
use crate::types::{CandidateKey, Probe};

use super::pacing::{Pacer, Pacing};
use super::{Measurement, Oracle, Outcome};

/// One successful trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Trial index within its sample set.
    pub trial: usize,
    /// `duration(base) - duration(candidate)` in nanoseconds.
    pub time_diff_ns: f64,
    /// Nanoseconds since the sampler was created when the trial completed.
    pub timestamp_ns: u64,
    /// Whether the base probe was measured first.
    pub base_first: bool,
    /// Oracle outcome for the base probe.
    pub base_outcome: Outcome,
    /// Oracle outcome for the candidate probe.
    pub candidate_outcome: Outcome,
}

/// A trial that still failed after its retry. Never aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTrial {
    /// Trial index within its sample set.
    pub trial: usize,
    /// Error from the retry.
    pub error: OracleError,
}

/// All trials comparing one base probe against one candidate probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    /// Candidate identity, used as the aggregation key.
    pub key: CandidateKey,
    /// Probe for the confirmed prefix alone.
    pub base: Probe,
    /// Probe for the prefix plus the candidate symbol.
    pub candidate: Probe,
    /// Successful trials in time order.
    pub samples: Vec<Sample>,
    /// Trials excluded after failing twice.
    pub failures: Vec<FailedTrial>,
}

impl SampleSet {
    /// Create an empty set for a pair of probes.
    pub fn new(key: CandidateKey, base: Probe, candidate: Probe) -> Self {
        Self {
            key,
            base,
            candidate,
            samples: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Last recorded failure, if any.
    pub fn last_error(&self) -> Option<&OracleError> {
        self.failures.last().map(|f| &f.error)
    }
}

/// Collects paired timing samples from an oracle.
///
/// Failure policy: a trial whose base or candidate call fails is retried
/// once as a whole pair, so both arms stay adjacent in time. If the retry
/// fails too, the trial is recorded as a [`FailedTrial`] and left out of
/// aggregation.
#[derive(Debug)]
pub struct Sampler {
    warmup: usize,
    order: TrialOrder,
    pacer: Pacer,
    rng: Xoshiro256PlusPlus,
    epoch: Instant,
}

impl Sampler {
    /// Create a sampler from the session configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidPacing`] if the pacing policy is unusable.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Self::with_parts(config.warmup, config.trial_order, config.pacing, config.seed)
    }

    /// Create a sampler from individual settings.
    pub fn with_parts(
        warmup: usize,
        order: TrialOrder,
        pacing: Pacing,
        seed: Option<u64>,
    ) -> Result<Self, ConfigError> {
        let rng = match seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_rng(&mut rand::rng()),
        };
        Ok(Self {
            warmup,
            order,
            pacer: Pacer::new(pacing)?,
            rng,
            epoch: Instant::now(),
        })
    }

    /// Run `trials` paired trials of `base` against `candidate`.
    pub fn sample<O>(
        &mut self,
        oracle: &mut O,
        key: CandidateKey,
        base: &Probe,
        candidate: &Probe,
        trials: usize,
    ) -> SampleSet
    where
        O: Oracle + ?Sized,
    {
        self.warmup(oracle, base, candidate);

        let mut set = SampleSet::new(key, base.clone(), candidate.clone());
        set.samples.reserve(trials);

        for trial in 0..trials {
            let base_first = self.base_first(trial);
            let result = match self.measure_pair(oracle, base, candidate, base_first) {
                Ok(pair) => Ok(pair),
                Err(first) => {
                    tracing::debug!(
                        "trial {} for {} failed ({}), retrying once",
                        trial,
                        set.key,
                        first
                    );
                    self.measure_pair(oracle, base, candidate, base_first)
                }
            };

            match result {
                Ok((base_m, candidate_m)) => set.samples.push(Sample {
                    trial,
                    time_diff_ns: base_m.duration_ns() - candidate_m.duration_ns(),
                    timestamp_ns: self.epoch.elapsed().as_nanos() as u64,
                    base_first,
                    base_outcome: base_m.outcome,
                    candidate_outcome: candidate_m.outcome,
                }),
                Err(error) => {
                    tracing::warn!("trial {} for {} excluded: {}", trial, set.key, error);
                    set.failures.push(FailedTrial { trial, error });
                }
            }
        }

        set
    }

    fn warmup<O>(&mut self, oracle: &mut O, base: &Probe, candidate: &Probe)
    where
        O: Oracle + ?Sized,
    {
        for round in 0..self.warmup {
            for probe in [base, candidate] {
                if let Err(e) = self.paced(oracle, probe) {
                    tracing::debug!("warmup {} of {:?} failed: {}", round, probe.as_str(), e);
                }
            }
        }
    }

    fn base_first(&mut self, trial: usize) -> bool {
        match self.order {
            TrialOrder::Alternating => trial % 2 == 0,
            TrialOrder::Randomized => self.rng.random_bool(0.5),
            TrialOrder::BaseFirst => true,
        }
    }

    fn measure_pair<O>(
        &mut self,
        oracle: &mut O,
        base: &Probe,
        candidate: &Probe,
        base_first: bool,
    ) -> Result<(Measurement, Measurement), OracleError>
    where
        O: Oracle + ?Sized,
    {
        if base_first {
            let b = self.paced(oracle, base)?;
            let c = self.paced(oracle, candidate)?;
            Ok((b, c))
        } else {
            let c = self.paced(oracle, candidate)?;
            let b = self.paced(oracle, base)?;
            Ok((b, c))
        }
    }

    fn paced<O>(&mut self, oracle: &mut O, probe: &Probe) -> Result<Measurement, OracleError>
    where
        O: Oracle + ?Sized,
    {
        self.pacer.wait();
        let result = oracle.measure(probe);
        self.pacer.finished();
        result
    }
}

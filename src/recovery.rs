//! The adaptive guesser: recovers a secret one symbol per round.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Config, CpuPinning, DiagnosticAction, SignalPolicy, TrialOrder};
use crate::error::{OracleError, RecoveryError};
use crate::measurement::{AffinityGuard, AffinityResult, Oracle, OracleKind, Pacing, Sampler};
use crate::preflight::system_check;
use crate::probe::ProbeBuilder;
use crate::result::{Diagnostic, Metadata, RecoveryResult, RoundReport};
use crate::statistics::{aggregate, rank, Ranking};
use crate::types::{Alphabet, CandidateKey};

/// Cooperative cancellation flag shared between a session and its controller.
///
/// Checked before every round; a round already in progress runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress of a session: the confirmed prefix and the rounds completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuessState {
    prefix: String,
    round: usize,
}

impl GuessState {
    /// Initial state: empty prefix, no rounds completed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from an already confirmed prefix.
    pub fn from_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let round = prefix.chars().count();
        Self { prefix, round }
    }

    /// Confirmed prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Rounds completed.
    pub fn round(&self) -> usize {
        self.round
    }

    /// Whether the prefix has reached `target_length` symbols.
    pub fn is_complete(&self, target_length: usize) -> bool {
        self.prefix.chars().count() >= target_length
    }

    /// State after confirming `symbol`.
    pub fn advance(&self, symbol: char) -> Self {
        let mut prefix = self.prefix.clone();
        prefix.push(symbol);
        Self {
            prefix,
            round: self.round + 1,
        }
    }
}

/// Receives progress from a running session.
pub trait RoundObserver {
    /// Called after each round with its report.
    fn on_round(&mut self, report: &RoundReport);

    /// Called before sampling each candidate of a round.
    fn on_candidate(&mut self, _round: usize, _symbol: char, _index: usize, _total: usize) {}
}

impl<F> RoundObserver for F
where
    F: FnMut(&RoundReport),
{
    fn on_round(&mut self, report: &RoundReport) {
        self(report)
    }
}

/// Main entry point for secret recovery.
///
/// Use the builder pattern to configure and run a session.
///
/// # Example
///
/// ```
/// use timing_recover::{Alphabet, LocalOracle, Recovery};
///
/// let secret = "ab";
/// let mut oracle = LocalOracle::new(|probe: &str| {
///     // Early-exit comparison, slowed down to be measurable.
///     for (a, b) in probe.chars().zip(secret.chars()) {
///         if a != b {
///             return false;
///         }
///         std::thread::sleep(std::time::Duration::from_micros(200));
///     }
///     true
/// });
///
/// let result = Recovery::quick()
///     .target_length(2)
///     .alphabet(Alphabet::parse("abc").unwrap())
///     .trials(8)
///     .run(&mut oracle)
///     .unwrap();
/// assert_eq!(result.secret.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    config: Config,
    cancel: CancellationToken,
}

impl Recovery {
    /// Create with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with reduced trial counts for fast, low-noise oracles.
    pub fn quick() -> Self {
        Self::with_config(Config::quick())
    }

    /// Create with high trial counts for noisy oracles.
    pub fn thorough() -> Self {
        Self::with_config(Config::thorough())
    }

    /// Create from an explicit configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the secret length.
    pub fn target_length(mut self, n: usize) -> Self {
        self.config.target_length = n;
        self
    }

    /// Set the candidate alphabet.
    pub fn alphabet(mut self, alphabet: Alphabet) -> Self {
        self.config.alphabet = alphabet;
        self
    }

    /// Set the padding symbol. It must not be part of the alphabet.
    pub fn filler(mut self, filler: char) -> Self {
        self.config.filler = filler;
        self
    }

    /// Set paired trials per candidate per round.
    pub fn trials(mut self, n: usize) -> Self {
        self.config.trials = n;
        self
    }

    /// Set unrecorded warmup pairs per candidate.
    pub fn warmup(mut self, n: usize) -> Self {
        self.config.warmup = n;
        self
    }

    /// Set the in-pair measurement order.
    pub fn trial_order(mut self, order: TrialOrder) -> Self {
        self.config.trial_order = order;
        self
    }

    /// Set the delay policy between oracle calls.
    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.config.pacing = pacing;
        self
    }

    /// Set CPU pinning.
    pub fn cpu_pinning(mut self, pinning: CpuPinning) -> Self {
        self.config.cpu_pinning = pinning;
        self
    }

    /// Set the tie epsilon in nanoseconds.
    pub fn tie_epsilon_ns(mut self, ns: f64) -> Self {
        self.config.tie_epsilon_ns = ns;
        self
    }

    /// Set the minimum separation in pooled standard errors.
    pub fn min_separation(mut self, separation: f64) -> Self {
        self.config.min_separation = separation;
        self
    }

    /// Set how ambiguous and starved rounds are handled.
    pub fn signal_policy(mut self, policy: SignalPolicy) -> Self {
        self.config.signal_policy = policy;
        self
    }

    /// Set the session time budget.
    pub fn max_duration(mut self, budget: Duration) -> Self {
        self.config.max_duration = Some(budget);
        self
    }

    /// Set the deterministic seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Use `token` to cancel the session from elsewhere.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Get the current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that cancels this session.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Recover the full secret.
    pub fn run<O>(&self, oracle: &mut O) -> Result<RecoveryResult, RecoveryError>
    where
        O: Oracle + ?Sized,
    {
        self.run_with_observer(oracle, &mut |_: &RoundReport| {})
    }

    /// Recover the full secret, reporting every round to `observer`.
    ///
    /// # How It Works
    ///
    /// 1. Validates the configuration and pins the CPU if requested
    /// 2. For each position, samples every alphabet symbol against the
    ///    confirmed prefix and appends the best-ranked one
    /// 3. Checks cancellation and the time budget before each round
    ///
    /// # Errors
    ///
    /// Configuration errors, a candidate without any successful sample,
    /// fatal diagnostics under a strict [`SignalPolicy`], cancellation and
    /// deadline expiry.
    pub fn run_with_observer<O, R>(
        &self,
        oracle: &mut O,
        observer: &mut R,
    ) -> Result<RecoveryResult, RecoveryError>
    where
        O: Oracle + ?Sized,
        R: RoundObserver + ?Sized,
    {
        let start = Instant::now();
        self.config.validate()?;

        let kind = oracle.kind();
        let builder = ProbeBuilder::new(self.config.target_length, self.config.filler);
        let mut sampler = Sampler::new(&self.config)?;

        // Held until the session ends; dropping restores the original mask.
        let guard = self.pin(kind);

        if kind == OracleKind::Local {
            for warning in system_check() {
                tracing::warn!("{}", warning.description());
            }
        }

        tracing::info!(
            "recovering {} symbols over {} candidates, {} trials each",
            self.config.target_length,
            self.config.alphabet.len(),
            self.config.trials
        );

        let mut state = GuessState::new();
        let mut rounds = Vec::with_capacity(self.config.target_length);
        while !state.is_complete(self.config.target_length) {
            self.check_interrupt(&state, start)?;

            let report = self.round(oracle, &builder, &state, &mut sampler, observer)?;
            state = state.advance(report.chosen);
            tracing::info!("round {}: {:?}", report.round, state.prefix());
            observer.on_round(&report);
            rounds.push(report);
        }

        Ok(RecoveryResult {
            secret: state.prefix,
            rounds,
            metadata: Metadata {
                target_length: self.config.target_length,
                alphabet_size: self.config.alphabet.len(),
                trials_per_candidate: self.config.trials,
                oracle: kind,
                pinned_cpu: guard.as_ref().map(AffinityGuard::cpu),
                runtime_secs: start.elapsed().as_secs_f64(),
            },
        })
    }

    /// Run a single round from `state`.
    ///
    /// The caller owns the loop: apply `state.advance(report.chosen)` to move
    /// on. No pinning, cancellation or deadline handling happens here.
    ///
    /// # Errors
    ///
    /// As for [`Recovery::run_with_observer`]; stepping a complete state
    /// fails with [`RecoveryError::InvalidProbeLength`].
    pub fn step<O>(
        &self,
        oracle: &mut O,
        state: &GuessState,
        sampler: &mut Sampler,
    ) -> Result<RoundReport, RecoveryError>
    where
        O: Oracle + ?Sized,
    {
        self.config.validate()?;
        let builder = ProbeBuilder::new(self.config.target_length, self.config.filler);
        self.round(oracle, &builder, state, sampler, &mut |_: &RoundReport| {})
    }

    fn round<O, R>(
        &self,
        oracle: &mut O,
        builder: &ProbeBuilder,
        state: &GuessState,
        sampler: &mut Sampler,
        observer: &mut R,
    ) -> Result<RoundReport, RecoveryError>
    where
        O: Oracle + ?Sized,
        R: RoundObserver + ?Sized,
    {
        let started = Instant::now();
        let round = state.round() + 1;
        let prefix = state.prefix();
        let alphabet = &self.config.alphabet;

        let base = builder.build(prefix)?;
        let mut sets = Vec::with_capacity(alphabet.len());
        for (index, symbol) in alphabet.iter().enumerate() {
            let candidate = builder.build_candidate(prefix, symbol)?;
            observer.on_candidate(round, symbol, index, alphabet.len());
            let set = sampler.sample(
                oracle,
                CandidateKey::new(prefix, symbol),
                &base,
                &candidate,
                self.config.trials,
            );
            tracing::debug!(
                "round {}: {:?} sampled ({} ok, {} failed)",
                round,
                symbol,
                set.samples.len(),
                set.failures.len()
            );
            sets.push(set);
        }

        let scores = aggregate(&sets);

        // A candidate without samples must never be ranked as the slowest.
        if let Some(starved) = scores.iter().find(|s| !s.has_samples()) {
            let last_error = sets
                .iter()
                .find(|set| set.key == starved.key)
                .and_then(|set| set.last_error())
                .cloned()
                .unwrap_or_else(|| OracleError::Local("no trials were run".to_string()));
            return Err(RecoveryError::OracleUnavailable {
                round,
                symbol: starved.symbol(),
                failures: starved.failed_count,
                last_error,
            });
        }

        let ranking = rank(&scores, self.config.tie_epsilon_ns).ok_or_else(|| {
            RecoveryError::OracleUnavailable {
                round,
                symbol: alphabet.as_slice().first().copied().unwrap_or(self.config.filler),
                failures: 0,
                last_error: OracleError::Local("no rankable scores".to_string()),
            }
        })?;

        let diagnostics = self.diagnose(round, &ranking)?;
        let failed_trials = scores.iter().map(|s| s.failed_count).sum();

        let mut next = prefix.to_string();
        next.push(ranking.best.symbol());

        Ok(RoundReport {
            round,
            prefix: next,
            chosen: ranking.best.symbol(),
            scores,
            ranking,
            diagnostics,
            failed_trials,
            elapsed: started.elapsed(),
        })
    }

    fn diagnose(
        &self,
        round: usize,
        ranking: &Ranking,
    ) -> Result<Vec<Diagnostic>, RecoveryError> {
        let policy = self.config.signal_policy;
        let mut diagnostics = Vec::new();

        if ranking.is_ambiguous() {
            if policy.on_ambiguous == DiagnosticAction::Fail {
                return Err(RecoveryError::AmbiguousRanking {
                    round,
                    symbols: ranking.ties.clone(),
                });
            }
            let diagnostic = Diagnostic::AmbiguousRanking {
                symbols: ranking.ties.clone(),
            };
            tracing::warn!("round {}: {}", round, diagnostic.description());
            diagnostics.push(diagnostic);
        }

        let required = self.config.min_separation;
        if ranking.is_starved(required) {
            let separation = ranking.separation.unwrap_or(0.0);
            if policy.on_starved == DiagnosticAction::Fail {
                return Err(RecoveryError::StarvedSignal {
                    round,
                    separation,
                    required,
                });
            }
            let diagnostic = Diagnostic::StarvedSignal {
                separation,
                required,
            };
            tracing::warn!("round {}: {}", round, diagnostic.description());
            diagnostics.push(diagnostic);
        }

        Ok(diagnostics)
    }

    fn check_interrupt(&self, state: &GuessState, start: Instant) -> Result<(), RecoveryError> {
        if self.cancel.is_cancelled() {
            tracing::info!("cancelled with prefix {:?}", state.prefix());
            return Err(RecoveryError::Cancelled {
                prefix: state.prefix().to_string(),
            });
        }
        if let Some(budget) = self.config.max_duration {
            let elapsed = start.elapsed();
            if elapsed >= budget {
                tracing::info!("time budget exhausted with prefix {:?}", state.prefix());
                return Err(RecoveryError::DeadlineExceeded {
                    prefix: state.prefix().to_string(),
                    elapsed,
                });
            }
        }
        Ok(())
    }

    fn pin(&self, kind: OracleKind) -> Option<AffinityGuard> {
        let result = match (self.config.cpu_pinning, kind) {
            (CpuPinning::Off, _) | (CpuPinning::Auto, OracleKind::Remote) => return None,
            (CpuPinning::Auto, OracleKind::Local) | (CpuPinning::Current, _) => {
                AffinityGuard::try_pin()
            }
            (CpuPinning::Core(cpu), _) => AffinityGuard::try_pin_to(cpu),
        };
        match result {
            AffinityResult::Pinned(guard) => {
                tracing::info!("pinned to CPU {} for the session", guard.cpu());
                Some(guard)
            }
            AffinityResult::NotPinned { reason } => {
                tracing::warn!("running unpinned: {}", reason);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{Measurement, Outcome};
    use crate::types::Probe;

    /// Duration is 100ns plus 10ns per leading symbol matching the secret.
    struct PrefixOracle {
        secret: Vec<char>,
        calls: usize,
    }

    impl PrefixOracle {
        fn new(secret: &str) -> Self {
            Self {
                secret: secret.chars().collect(),
                calls: 0,
            }
        }
    }

    impl Oracle for PrefixOracle {
        fn measure(&mut self, probe: &Probe) -> Result<Measurement, OracleError> {
            self.calls += 1;
            let matched = probe
                .as_str()
                .chars()
                .zip(&self.secret)
                .take_while(|(a, b)| a == *b)
                .count();
            Ok(Measurement {
                duration: Duration::from_nanos(100 + 10 * matched as u64),
                outcome: Outcome::Local,
            })
        }
    }

    fn recovery(alphabet: &str, length: usize) -> Recovery {
        Recovery::new()
            .alphabet(Alphabet::parse(alphabet).unwrap())
            .target_length(length)
            .trials(3)
            .warmup(0)
            .cpu_pinning(CpuPinning::Off)
            .seed(1)
    }

    #[test]
    fn test_guess_state_advance() {
        let state = GuessState::new().advance('x').advance('y');
        assert_eq!(state.prefix(), "xy");
        assert_eq!(state.round(), 2);
        assert!(state.is_complete(2));
        assert!(!state.is_complete(3));
        assert_eq!(GuessState::from_prefix("xy"), state);
    }

    #[test]
    fn test_step_picks_slowest_candidate() {
        let recovery = recovery("abc", 3);
        let mut oracle = PrefixOracle::new("cab");
        let mut sampler = Sampler::new(recovery.config()).unwrap();

        let report = recovery
            .step(&mut oracle, &GuessState::new(), &mut sampler)
            .unwrap();
        assert_eq!(report.round, 1);
        assert_eq!(report.chosen, 'c');
        assert_eq!(report.prefix, "c");
        assert_eq!(report.scores.len(), 3);
        assert!((report.ranking.best.mean_time_diff_ns + 10.0).abs() < 1e-9);
        assert!(report.diagnostics.is_empty());
        assert_eq!(oracle.calls, 3 * 3 * 2);
    }

    #[test]
    fn test_step_on_complete_state_is_rejected() {
        let recovery = recovery("abc", 2);
        let mut oracle = PrefixOracle::new("ab");
        let mut sampler = Sampler::new(recovery.config()).unwrap();
        let result = recovery.step(&mut oracle, &GuessState::from_prefix("ab"), &mut sampler);
        assert_eq!(
            result,
            Err(RecoveryError::InvalidProbeLength { length: 3, max: 2 })
        );
    }

    #[test]
    fn test_run_recovers_secret() {
        let mut oracle = PrefixOracle::new("bca");
        let result = recovery("abc", 3).run(&mut oracle).unwrap();
        assert_eq!(result.secret, "bca");
        assert_eq!(result.rounds.len(), 3);
        assert_eq!(result.metadata.pinned_cpu, None);
        assert!(result.is_confident());
    }

    #[test]
    fn test_observer_sees_every_round() {
        let mut oracle = PrefixOracle::new("ba");
        let mut prefixes = Vec::new();
        recovery("ab", 2)
            .run_with_observer(&mut oracle, &mut |r: &RoundReport| prefixes.push(r.prefix.clone()))
            .unwrap();
        assert_eq!(prefixes, vec!["b".to_string(), "ba".to_string()]);
    }

    #[test]
    fn test_invalid_config_is_rejected_before_probing() {
        let mut oracle = PrefixOracle::new("a");
        let result = recovery("abc", 1).trials(0).run(&mut oracle);
        assert!(matches!(result, Err(RecoveryError::Config(_))));
        assert_eq!(oracle.calls, 0);
    }

    #[test]
    fn test_pre_cancelled_session() {
        let token = CancellationToken::new();
        token.cancel();
        let mut oracle = PrefixOracle::new("ab");
        let result = recovery("ab", 2).cancellation_token(token).run(&mut oracle);
        assert_eq!(
            result,
            Err(RecoveryError::Cancelled {
                prefix: String::new()
            })
        );
        assert_eq!(oracle.calls, 0);
    }
}

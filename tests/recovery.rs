//! End-to-end recovery sessions against deterministic and noisy stub oracles.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use timing_recover::{
    Alphabet, CancellationToken, ConfigError, CpuPinning, Diagnostic, DiagnosticAction,
    GuessState, Measurement, Oracle, OracleError, Outcome, Pacing, Probe, Recovery,
    RecoveryError, RoundReport, Sampler, SignalPolicy, TrialOrder,
};

// ===========================================================================
// Stub oracles
// ===========================================================================

/// Reports `base + step * matched` where `matched` is the length of the
/// common prefix of probe and secret. Nothing is slept; durations are synthetic.
struct PrefixOracle {
    secret: Vec<char>,
    base: Duration,
    step: Duration,
    calls: usize,
}

impl PrefixOracle {
    fn new(secret: &str) -> Self {
        Self::with_timing(secret, Duration::from_millis(100), Duration::from_millis(10))
    }

    fn with_timing(secret: &str, base: Duration, step: Duration) -> Self {
        Self {
            secret: secret.chars().collect(),
            base,
            step,
            calls: 0,
        }
    }

    fn matched(&self, probe: &Probe) -> u32 {
        probe
            .as_str()
            .chars()
            .zip(&self.secret)
            .take_while(|(a, b)| a == *b)
            .count() as u32
    }
}

impl Oracle for PrefixOracle {
    fn measure(&mut self, probe: &Probe) -> Result<Measurement, OracleError> {
        self.calls += 1;
        Ok(Measurement {
            duration: self.base + self.step * self.matched(probe),
            outcome: Outcome::Local,
        })
    }
}

/// Adds uniform noise to a tiny prefix signal.
struct NoisyOracle {
    inner: PrefixOracle,
    rng: Xoshiro256PlusPlus,
    noise_ns: u64,
}

impl Oracle for NoisyOracle {
    fn measure(&mut self, probe: &Probe) -> Result<Measurement, OracleError> {
        let mut m = self.inner.measure(probe)?;
        m.duration += Duration::from_nanos(self.rng.random_range(0..self.noise_ns));
        Ok(m)
    }
}

/// Fails every call whose probe starts with `bad`.
struct RefusingOracle {
    inner: PrefixOracle,
    bad: char,
}

impl Oracle for RefusingOracle {
    fn measure(&mut self, probe: &Probe) -> Result<Measurement, OracleError> {
        if probe.as_str().starts_with(self.bad) {
            return Err(OracleError::UnexpectedStatus { status: 503 });
        }
        self.inner.measure(probe)
    }
}

/// Fails every `n`th call.
struct FlakyOracle {
    inner: PrefixOracle,
    every: usize,
    calls: usize,
}

impl Oracle for FlakyOracle {
    fn measure(&mut self, probe: &Probe) -> Result<Measurement, OracleError> {
        self.calls += 1;
        if self.calls % self.every == 0 {
            return Err(OracleError::Transport("connection reset".into()));
        }
        self.inner.measure(probe)
    }
}

fn recovery(alphabet: &str, length: usize) -> Recovery {
    Recovery::new()
        .alphabet(Alphabet::parse(alphabet).unwrap())
        .target_length(length)
        .trials(4)
        .warmup(1)
        .cpu_pinning(CpuPinning::Off)
        .seed(42)
}

// ===========================================================================
// Reconstruction
// ===========================================================================

/// Secret "AB", alphabet {A, B, C}, 100ms + 10ms per matched symbol.
#[test]
fn recovers_ab_scenario() {
    let mut oracle = PrefixOracle::new("AB");
    let result = recovery("ABC", 2).run(&mut oracle).unwrap();

    assert_eq!(result.secret, "AB");
    assert_eq!(result.rounds.len(), 2);
    assert_eq!(result.rounds[0].prefix, "A");
    assert_eq!(result.rounds[1].prefix, "AB");
    assert!(result.is_confident());

    // Round 1: base "00" is 100ms, "A0" is 110ms, so A scores -10ms.
    let round1 = &result.rounds[0];
    assert_eq!(round1.scores.len(), 3);
    assert!((round1.ranking.best.mean_time_diff_ns + 10_000_000.0).abs() < 1e-3);
    assert_eq!(round1.ranking.ties, vec!['A']);
}

#[test]
fn recovers_exactly_for_various_lengths_and_alphabets() {
    let cases: &[(&str, Alphabet)] = &[
        ("x", Alphabet::printable_ascii_without('0')),
        ("hello", Alphabet::printable_ascii_without('0')),
        ("z9Q!~ ", Alphabet::printable_ascii_without('0')),
        ("deadbeef", Alphabet::parse("abcdef123456789").unwrap()),
        ("cafe", Alphabet::parse("fedcba").unwrap()),
    ];

    for (secret, alphabet) in cases {
        let mut oracle =
            PrefixOracle::with_timing(secret, Duration::from_nanos(500), Duration::from_nanos(7));
        let result = Recovery::new()
            .alphabet(alphabet.clone())
            .target_length(secret.chars().count())
            .trials(2)
            .warmup(0)
            .cpu_pinning(CpuPinning::Off)
            .run(&mut oracle)
            .unwrap();
        assert_eq!(&result.secret, secret);
        assert_eq!(result.metadata.alphabet_size, alphabet.len());
    }
}

#[test]
fn recovers_with_every_trial_order() {
    for order in [TrialOrder::Alternating, TrialOrder::Randomized, TrialOrder::BaseFirst] {
        let mut oracle = PrefixOracle::new("ca");
        let result = recovery("abc", 2).trial_order(order).run(&mut oracle).unwrap();
        assert_eq!(result.secret, "ca", "order {:?}", order);
    }
}

#[test]
fn step_can_drive_the_session() {
    let recovery = recovery("xyz", 3);
    let mut oracle = PrefixOracle::new("zyx");
    let mut sampler = Sampler::new(recovery.config()).unwrap();

    let mut state = GuessState::new();
    while !state.is_complete(3) {
        let report = recovery.step(&mut oracle, &state, &mut sampler).unwrap();
        state = state.advance(report.chosen);
    }
    assert_eq!(state.prefix(), "zyx");
    assert_eq!(state.round(), 3);
}

#[test]
fn every_probe_has_target_length() {
    struct LengthCheck(PrefixOracle);

    impl Oracle for LengthCheck {
        fn measure(&mut self, probe: &Probe) -> Result<Measurement, OracleError> {
            assert_eq!(probe.len(), 6, "probe {:?}", probe.as_str());
            self.0.measure(probe)
        }
    }

    let mut oracle = LengthCheck(PrefixOracle::new("abcabc"));
    let result = recovery("abc", 6).run(&mut oracle).unwrap();
    assert_eq!(result.secret, "abcabc");
}

// ===========================================================================
// Failures
// ===========================================================================

#[test]
fn candidate_without_samples_is_an_error() {
    let mut oracle = RefusingOracle {
        inner: PrefixOracle::new("AB"),
        bad: 'B',
    };
    let err = recovery("ABC", 2).run(&mut oracle).unwrap_err();
    assert_eq!(
        err,
        RecoveryError::OracleUnavailable {
            round: 1,
            symbol: 'B',
            failures: 4,
            last_error: OracleError::UnexpectedStatus { status: 503 },
        }
    );
}

#[test]
fn transient_failures_are_retried() {
    let mut oracle = FlakyOracle {
        inner: PrefixOracle::new("AB"),
        every: 7,
        calls: 0,
    };
    let result = recovery("ABC", 2).run(&mut oracle).unwrap();
    assert_eq!(result.secret, "AB");
    assert_eq!(result.failed_trials(), 0);
}

#[test]
fn empty_alphabet_is_rejected() {
    assert_eq!(Alphabet::parse(""), Err(ConfigError::EmptyAlphabet));

    let empty: Alphabet = serde_json::from_str(r#"{"symbols":[]}"#).unwrap();
    let mut oracle = PrefixOracle::new("a");
    let err = recovery("a", 1).alphabet(empty).run(&mut oracle).unwrap_err();
    assert_eq!(err, RecoveryError::Config(ConfigError::EmptyAlphabet));
    assert_eq!(oracle.calls, 0);
}

#[test]
fn filler_inside_alphabet_is_rejected() {
    let mut oracle = PrefixOracle::new("a");
    let err = recovery("a0", 1).run(&mut oracle).unwrap_err();
    assert_eq!(
        err,
        RecoveryError::Config(ConfigError::FillerInAlphabet { filler: '0' })
    );
}

// ===========================================================================
// Diagnostics
// ===========================================================================

/// A flat oracle ties every candidate; the first symbol wins each round.
#[test]
fn ties_pick_first_symbol_and_are_reported() {
    let mut oracle = PrefixOracle::with_timing("", Duration::from_micros(5), Duration::ZERO);
    let result = recovery("qrs", 2).run(&mut oracle).unwrap();

    assert_eq!(result.secret, "qq");
    for round in &result.rounds {
        assert!(round.diagnostics.contains(&Diagnostic::AmbiguousRanking {
            symbols: vec!['q', 'r', 's'],
        }));
    }
    assert!(!result.is_confident());
}

#[test]
fn strict_policy_fails_on_tie() {
    let mut oracle = PrefixOracle::with_timing("", Duration::from_micros(5), Duration::ZERO);
    let err = recovery("qrs", 2)
        .signal_policy(SignalPolicy::strict())
        .run(&mut oracle)
        .unwrap_err();
    assert_eq!(
        err,
        RecoveryError::AmbiguousRanking {
            round: 1,
            symbols: vec!['q', 'r', 's'],
        }
    );
}

#[test]
fn starved_signal_is_fatal_when_requested() {
    let mut oracle = NoisyOracle {
        inner: PrefixOracle::with_timing("ab", Duration::from_micros(10), Duration::from_nanos(1)),
        rng: Xoshiro256PlusPlus::seed_from_u64(3),
        noise_ns: 1_000,
    };
    let err = recovery("ab", 2)
        .trials(20)
        .min_separation(1e9)
        .signal_policy(SignalPolicy {
            on_ambiguous: DiagnosticAction::Warn,
            on_starved: DiagnosticAction::Fail,
        })
        .run(&mut oracle)
        .unwrap_err();

    match err {
        RecoveryError::StarvedSignal {
            round,
            separation,
            required,
        } => {
            assert_eq!(round, 1);
            assert!(separation < required);
            assert_eq!(required, 1e9);
        }
        other => panic!("expected StarvedSignal, got {:?}", other),
    }
}

#[test]
fn starved_signal_warns_by_default() {
    let mut oracle = NoisyOracle {
        inner: PrefixOracle::with_timing("ab", Duration::from_micros(10), Duration::from_nanos(1)),
        rng: Xoshiro256PlusPlus::seed_from_u64(3),
        noise_ns: 1_000,
    };
    let result = recovery("ab", 2)
        .trials(20)
        .min_separation(1e9)
        .run(&mut oracle)
        .unwrap();
    assert_eq!(result.secret.chars().count(), 2);
    assert!(result
        .diagnostics()
        .any(|(_, d)| matches!(d, Diagnostic::StarvedSignal { .. })));
}

// ===========================================================================
// Session control
// ===========================================================================

#[test]
fn cancellation_stops_at_round_boundary() {
    let token = CancellationToken::new();
    let observer_token = token.clone();
    let mut oracle = PrefixOracle::new("AB");

    let err = recovery("ABC", 2)
        .cancellation_token(token)
        .run_with_observer(&mut oracle, &mut |_: &RoundReport| observer_token.cancel())
        .unwrap_err();

    assert_eq!(
        err,
        RecoveryError::Cancelled {
            prefix: "A".to_string()
        }
    );
    assert_eq!(err.partial_prefix(), Some("A"));
}

#[test]
fn zero_budget_stops_before_first_round() {
    let mut oracle = PrefixOracle::new("AB");
    let err = recovery("ABC", 2)
        .max_duration(Duration::ZERO)
        .run(&mut oracle)
        .unwrap_err();
    assert!(matches!(err, RecoveryError::DeadlineExceeded { ref prefix, .. } if prefix.is_empty()));
    assert_eq!(oracle.calls, 0);
}

#[test]
fn fixed_pacing_spaces_out_calls() {
    let mut oracle = PrefixOracle::new("a");
    let start = Instant::now();
    recovery("ab", 1)
        .trials(2)
        .warmup(0)
        .pacing(Pacing::Fixed(Duration::from_millis(2)))
        .run(&mut oracle)
        .unwrap();

    // 2 candidates x 2 trials x 2 calls, each after the first waits 2ms.
    assert_eq!(oracle.calls, 8);
    assert!(start.elapsed() >= Duration::from_millis(14));
}

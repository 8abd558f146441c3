//! Round reports and final recovery results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::measurement::OracleKind;
use crate::statistics::{AggregateScore, Ranking};

/// Signal-quality warning attached to a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// Several symbols scored within the tie epsilon of the best.
    AmbiguousRanking {
        /// Tied symbols in alphabet order; the first was chosen.
        symbols: Vec<char>,
    },

    /// The chosen symbol is not clearly separated from the runner-up.
    StarvedSignal {
        /// Observed separation in pooled standard errors.
        separation: f64,
        /// Configured minimum separation.
        required: f64,
    },
}

impl Diagnostic {
    /// Get a human-readable description of the diagnostic.
    pub fn description(&self) -> String {
        match self {
            Diagnostic::AmbiguousRanking { symbols } => {
                format!(
                    "Ambiguous ranking: {} symbols tied ({:?}), picked the first. \
                     More trials or a larger tie epsilon may help.",
                    symbols.len(),
                    symbols
                )
            }
            Diagnostic::StarvedSignal {
                separation,
                required,
            } => {
                format!(
                    "Starved signal: separation {:.2} below {:.2} standard errors. \
                     The chosen symbol may be noise.",
                    separation, required
                )
            }
        }
    }
}

/// Everything decided in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    /// Round number, starting at 1.
    pub round: usize,

    /// Confirmed prefix after this round.
    pub prefix: String,

    /// Symbol appended in this round.
    pub chosen: char,

    /// Scores of every candidate, in alphabet order.
    pub scores: Vec<AggregateScore>,

    /// Ranking the choice was made from.
    pub ranking: Ranking,

    /// Warnings raised for this round.
    pub diagnostics: Vec<Diagnostic>,

    /// Trials excluded after failing twice.
    pub failed_trials: usize,

    /// Wall-clock time spent on the round.
    pub elapsed: Duration,
}

impl RoundReport {
    /// True when the round raised no diagnostics and lost no trials.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty() && self.failed_trials == 0
    }

    /// Scores ordered from most to least likely.
    pub fn ordered_scores(&self) -> Vec<&AggregateScore> {
        let mut ordered: Vec<&AggregateScore> =
            self.scores.iter().filter(|s| s.has_samples()).collect();
        // Stable sort keeps alphabet order among equal means.
        ordered.sort_by(|a, b| a.mean_time_diff_ns.total_cmp(&b.mean_time_diff_ns));
        ordered
    }
}

/// Complete result of a recovery session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    /// Recovered secret, exactly `target_length` symbols.
    pub secret: String,

    /// One report per position, in order.
    pub rounds: Vec<RoundReport>,

    /// Session metadata.
    pub metadata: Metadata,
}

impl RecoveryResult {
    /// All diagnostics, paired with the round they were raised in.
    pub fn diagnostics(&self) -> impl Iterator<Item = (usize, &Diagnostic)> {
        self.rounds
            .iter()
            .flat_map(|r| r.diagnostics.iter().map(move |d| (r.round, d)))
    }

    /// Total trials excluded across all rounds.
    pub fn failed_trials(&self) -> usize {
        self.rounds.iter().map(|r| r.failed_trials).sum()
    }

    /// True when no round raised a diagnostic.
    pub fn is_confident(&self) -> bool {
        self.rounds.iter().all(|r| r.diagnostics.is_empty())
    }
}

/// Session metadata for debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Target secret length.
    pub target_length: usize,

    /// Number of candidate symbols per round.
    pub alphabet_size: usize,

    /// Paired trials per candidate per round.
    pub trials_per_candidate: usize,

    /// Where the oracle runs.
    pub oracle: OracleKind,

    /// CPU the session was pinned to, if any.
    pub pinned_cpu: Option<usize>,

    /// Total session time in seconds.
    pub runtime_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CandidateKey;

    fn score(symbol: char, mean: f64) -> AggregateScore {
        AggregateScore {
            key: CandidateKey::new("", symbol),
            mean_time_diff_ns: mean,
            std_dev_ns: 1.0,
            sample_count: 4,
            failed_count: 0,
        }
    }

    fn report(round: usize, diagnostics: Vec<Diagnostic>) -> RoundReport {
        let scores = vec![score('a', 3.0), score('b', -1.0), score('c', 3.0)];
        RoundReport {
            round,
            prefix: "b".into(),
            chosen: 'b',
            ranking: crate::statistics::rank(&scores, 0.0).unwrap(),
            scores,
            diagnostics,
            failed_trials: 0,
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_ordered_scores() {
        let report = report(1, vec![]);
        let symbols: Vec<char> = report.ordered_scores().iter().map(|s| s.symbol()).collect();
        assert_eq!(symbols, vec!['b', 'a', 'c']);
        assert!(report.is_clean());
    }

    #[test]
    fn test_result_collects_diagnostics() {
        let result = RecoveryResult {
            secret: "bb".into(),
            rounds: vec![
                report(1, vec![]),
                report(
                    2,
                    vec![Diagnostic::StarvedSignal {
                        separation: 0.5,
                        required: 2.0,
                    }],
                ),
            ],
            metadata: Metadata {
                target_length: 2,
                alphabet_size: 3,
                trials_per_candidate: 4,
                oracle: OracleKind::Local,
                pinned_cpu: None,
                runtime_secs: 0.01,
            },
        };
        let collected: Vec<usize> = result.diagnostics().map(|(round, _)| round).collect();
        assert_eq!(collected, vec![2]);
        assert!(!result.is_confident());
    }

    #[test]
    fn test_diagnostic_descriptions() {
        let desc = Diagnostic::AmbiguousRanking {
            symbols: vec!['a', 'b'],
        }
        .description();
        assert!(desc.contains("2 symbols"));

        let desc = Diagnostic::StarvedSignal {
            separation: 0.5,
            required: 2.0,
        }
        .description();
        assert!(desc.contains("0.50"));
        assert!(desc.contains("2.00"));
    }
}

//! Reduction of paired samples into per-candidate scores and a ranking.
//!
//! Scores are pure functions of the sample sets they are computed from:
//! nothing is cached between rounds and re-aggregating the same sets gives
//! identical output.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::measurement::SampleSet;
use crate::types::CandidateKey;

use super::online::OnlineStats;

/// Mean timing difference of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateScore {
    /// Candidate the samples belong to.
    pub key: CandidateKey,
    /// Mean of `duration(base) - duration(candidate)` in nanoseconds.
    /// `NaN` when `sample_count` is 0; such a score is never ranked.
    #[serde(with = "super::serde_float")]
    pub mean_time_diff_ns: f64,
    /// Sample standard deviation of the differences.
    pub std_dev_ns: f64,
    /// Successful trials aggregated.
    pub sample_count: usize,
    /// Trials excluded after failing.
    pub failed_count: usize,
}

impl AggregateScore {
    /// Symbol this score is for.
    pub fn symbol(&self) -> char {
        self.key.symbol
    }

    /// Standard error of the mean. Infinite with fewer than two samples.
    pub fn std_error_ns(&self) -> f64 {
        if self.sample_count < 2 {
            f64::INFINITY
        } else {
            self.std_dev_ns / (self.sample_count as f64).sqrt()
        }
    }

    /// Whether the score is backed by at least one sample.
    pub fn has_samples(&self) -> bool {
        self.sample_count > 0
    }
}

/// Group sample sets by candidate key and reduce each group to its mean.
///
/// Output order is the order in which keys first appear in `sets`, so a
/// round swept in alphabet order yields scores in alphabet order. Keys whose
/// trials all failed are kept with `sample_count == 0`.
pub fn aggregate(sets: &[SampleSet]) -> Vec<AggregateScore> {
    let mut index: HashMap<&CandidateKey, usize> = HashMap::new();
    let mut groups: Vec<(&CandidateKey, OnlineStats, usize)> = Vec::new();

    for set in sets {
        let slot = *index.entry(&set.key).or_insert_with(|| {
            groups.push((&set.key, OnlineStats::new(), 0));
            groups.len() - 1
        });
        let (_, stats, failed) = &mut groups[slot];
        for sample in &set.samples {
            stats.update(sample.time_diff_ns);
        }
        *failed += set.failures.len();
    }

    groups
        .into_iter()
        .map(|(key, stats, failed)| AggregateScore {
            key: key.clone(),
            mean_time_diff_ns: stats.mean(),
            std_dev_ns: stats.std_dev(),
            sample_count: stats.count(),
            failed_count: failed,
        })
        .collect()
}

/// Outcome of ranking one round's scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    /// Selected candidate: lowest mean difference, first in order among ties.
    pub best: AggregateScore,
    /// Lowest-scoring candidate other than `best`.
    pub runner_up: Option<AggregateScore>,
    /// Symbols within epsilon of the minimum, in order. Contains `best`.
    pub ties: Vec<char>,
    /// `runner_up.mean - best.mean` in nanoseconds.
    pub gap_ns: Option<f64>,
    /// Gap divided by the pooled standard error of best and runner-up.
    /// Infinite when both arms are noiseless and the gap is positive.
    #[serde(with = "super::serde_float::option")]
    pub separation: Option<f64>,
}

impl Ranking {
    /// Whether more than one symbol tied for the best score.
    pub fn is_ambiguous(&self) -> bool {
        self.ties.len() > 1
    }

    /// Whether the best candidate is less than `min_separation` standard
    /// errors ahead of the runner-up. Never true for a single candidate.
    pub fn is_starved(&self, min_separation: f64) -> bool {
        match self.separation {
            Some(separation) => min_separation > 0.0 && !(separation >= min_separation),
            None => false,
        }
    }
}

/// Pick the candidate with the minimum mean difference.
///
/// A smaller `duration(base) - duration(candidate)` means the candidate kept
/// the oracle busy longer, which an early-exit comparison does when more
/// leading symbols match.
///
/// Tie-break: among scores within `epsilon_ns` of the minimum, the first in
/// input order wins. Scores without samples are skipped. Returns `None` if
/// no score has samples.
pub fn rank(scores: &[AggregateScore], epsilon_ns: f64) -> Option<Ranking> {
    let ranked: Vec<&AggregateScore> = scores.iter().filter(|s| s.has_samples()).collect();

    let min = ranked
        .iter()
        .map(|s| s.mean_time_diff_ns)
        .fold(f64::INFINITY, f64::min);
    if !min.is_finite() {
        return None;
    }

    let ties: Vec<&AggregateScore> = ranked
        .iter()
        .copied()
        .filter(|s| s.mean_time_diff_ns <= min + epsilon_ns)
        .collect();
    let best = *ties.first()?;

    let runner_up = ranked
        .iter()
        .copied()
        .filter(|s| s.key != best.key)
        .fold(None::<&AggregateScore>, |acc, s| match acc {
            Some(a) if a.mean_time_diff_ns <= s.mean_time_diff_ns => Some(a),
            _ => Some(s),
        });

    let (gap_ns, separation) = match runner_up {
        Some(r) => {
            let gap = r.mean_time_diff_ns - best.mean_time_diff_ns;
            let pooled = (best.std_error_ns().powi(2) + r.std_error_ns().powi(2)).sqrt();
            let separation = if pooled == 0.0 {
                if gap > 0.0 {
                    f64::INFINITY
                } else {
                    0.0
                }
            } else {
                gap / pooled
            };
            (Some(gap), Some(separation))
        }
        None => (None, None),
    };

    Some(Ranking {
        best: best.clone(),
        runner_up: runner_up.cloned(),
        ties: ties.iter().map(|s| s.symbol()).collect(),
        gap_ns,
        separation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::measurement::{FailedTrial, Outcome, Sample};
    use crate::types::Probe;

    fn set(symbol: char, diffs: &[f64]) -> SampleSet {
        let mut set = SampleSet::new(
            CandidateKey::new("", symbol),
            Probe::new("__"),
            Probe::new(format!("{}_", symbol)),
        );
        set.samples = diffs
            .iter()
            .enumerate()
            .map(|(trial, &time_diff_ns)| Sample {
                trial,
                time_diff_ns,
                timestamp_ns: trial as u64,
                base_first: true,
                base_outcome: Outcome::Local,
                candidate_outcome: Outcome::Local,
            })
            .collect();
        set
    }

    fn score(symbol: char, mean: f64, std_dev: f64, count: usize) -> AggregateScore {
        AggregateScore {
            key: CandidateKey::new("", symbol),
            mean_time_diff_ns: mean,
            std_dev_ns: std_dev,
            sample_count: count,
            failed_count: 0,
        }
    }

    #[test]
    fn test_single_pair_mean_and_count() {
        for n in [1usize, 2, 7, 100] {
            let diffs: Vec<f64> = (0..n).map(|i| i as f64 * 3.5 - 10.0).collect();
            let expected = diffs.iter().sum::<f64>() / n as f64;
            let scores = aggregate(&[set('a', &diffs)]);
            assert_eq!(scores.len(), 1);
            assert_eq!(scores[0].sample_count, n);
            assert!((scores[0].mean_time_diff_ns - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_groups_by_key_in_first_seen_order() {
        let sets = vec![
            set('b', &[1.0, 3.0]),
            set('a', &[10.0]),
            set('b', &[5.0]),
        ];
        let scores = aggregate(&sets);
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].symbol(), 'b');
        assert_eq!(scores[0].sample_count, 3);
        assert!((scores[0].mean_time_diff_ns - 3.0).abs() < 1e-12);
        assert_eq!(scores[1].symbol(), 'a');
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let sets = vec![set('a', &[1.0, -2.0, 4.5]), set('b', &[0.25, 0.5])];
        assert_eq!(aggregate(&sets), aggregate(&sets));
    }

    #[test]
    fn test_failed_only_key_has_no_mean() {
        let mut failed = set('z', &[]);
        failed.failures.push(FailedTrial {
            trial: 0,
            error: OracleError::Transport("refused".into()),
        });
        let scores = aggregate(&[set('a', &[1.0]), failed]);
        assert_eq!(scores[1].sample_count, 0);
        assert_eq!(scores[1].failed_count, 1);
        assert!(scores[1].mean_time_diff_ns.is_nan());

        // A failed candidate is never ranked as fastest.
        let ranking = rank(&scores, 0.0).unwrap();
        assert_eq!(ranking.best.symbol(), 'a');
        assert!(ranking.runner_up.is_none());
    }

    #[test]
    fn test_rank_selects_minimum() {
        let scores = vec![
            score('a', 5.0, 1.0, 100),
            score('b', -20.0, 1.0, 100),
            score('c', 4.0, 1.0, 100),
        ];
        let ranking = rank(&scores, 0.0).unwrap();
        assert_eq!(ranking.best.symbol(), 'b');
        assert_eq!(ranking.runner_up.as_ref().map(|s| s.symbol()), Some('c'));
        assert_eq!(ranking.ties, vec!['b']);
        assert!((ranking.gap_ns.unwrap() - 24.0).abs() < 1e-12);
        // se = 0.1 each, pooled = 0.1414..
        assert!(ranking.separation.unwrap() > 100.0);
        assert!(!ranking.is_starved(2.0));
    }

    #[test]
    fn test_rank_tie_break_is_first_in_order() {
        let scores = vec![
            score('x', 1.0, 0.0, 10),
            score('a', -3.0, 0.0, 10),
            score('m', -3.0, 0.0, 10),
        ];
        let ranking = rank(&scores, 0.0).unwrap();
        assert_eq!(ranking.best.symbol(), 'a');
        assert_eq!(ranking.ties, vec!['a', 'm']);
        assert!(ranking.is_ambiguous());
        assert!(ranking.is_starved(2.0));
    }

    #[test]
    fn test_rank_epsilon_widens_ties() {
        let scores = vec![score('a', -2.9, 1.0, 10), score('b', -3.0, 1.0, 10)];
        assert_eq!(rank(&scores, 0.0).unwrap().best.symbol(), 'b');

        let ranking = rank(&scores, 0.5).unwrap();
        assert_eq!(ranking.best.symbol(), 'a');
        assert_eq!(ranking.ties, vec!['a', 'b']);
        assert!(ranking.gap_ns.unwrap() < 0.0);
    }

    #[test]
    fn test_rank_starved_signal() {
        let scores = vec![score('a', -1.0, 100.0, 100), score('b', 0.0, 100.0, 100)];
        let ranking = rank(&scores, 0.0).unwrap();
        assert_eq!(ranking.best.symbol(), 'a');
        // gap 1 over pooled se ~14.1
        assert!(ranking.separation.unwrap() < 0.1);
        assert!(ranking.is_starved(2.0));
        assert!(!ranking.is_starved(0.0));
    }

    #[test]
    fn test_rank_empty() {
        assert!(rank(&[], 0.0).is_none());
        assert!(rank(&[score('a', f64::NAN, 0.0, 0)], 0.0).is_none());
    }
}

//! Interleaved timing survey of several URLs or injected values.
//!
//! A survey is the manual counterpart of a recovery session: it times a
//! fixed list of targets round-robin and tabulates the results so a human can
//! see whether an endpoint leaks at all before committing to a full run.
//!
//! Every HTTP response is an observation, error pages included, and gets
//! its own summary row per status. Only requests that got no response at all
//! are failures.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::error::{OracleError, RecoveryError};
use crate::measurement::{Outcome, Pacer, Pacing, RemoteOracle};
use crate::probe::ProbeBuilder;
use crate::statistics::OnlineStats;

/// One request to repeat during a survey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyTarget {
    /// Row label in the summary.
    pub label: String,
    /// URL to request.
    pub url: String,
    /// Value placed at the oracle's injection point, if any.
    pub value: Option<String>,
}

impl SurveyTarget {
    /// Plain request to `url`, labelled by the URL.
    pub fn url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            label: url.clone(),
            url,
            value: None,
        }
    }

    /// Request to `url` carrying `value`, labelled by the value.
    pub fn value(url: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            label: value.clone(),
            url: url.into(),
            value: Some(value),
        }
    }

    /// One target per URL.
    pub fn urls<I, S>(urls: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter().map(Self::url).collect()
    }

    /// One target per value, each padded to the builder's length.
    ///
    /// # Errors
    ///
    /// [`RecoveryError::InvalidProbeLength`] if a value is longer than the
    /// target length.
    pub fn padded_values<I, S>(
        url: &str,
        values: I,
        builder: &ProbeBuilder,
    ) -> Result<Vec<Self>, RecoveryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        values
            .into_iter()
            .map(|v| Ok(Self::value(url, builder.build(v.as_ref())?.into_string())))
            .collect()
    }
}

/// One timed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Label of the target.
    pub label: String,
    /// Survey pass the request belongs to.
    pub test: usize,
    /// HTTP status.
    pub status: u16,
    /// Response body size in bytes.
    pub size: usize,
    /// Time to response headers.
    pub duration: Duration,
    /// Whether the request carried a cache-busting parameter.
    pub cachebust: bool,
    /// Nanoseconds since the survey started.
    pub timestamp_ns: u64,
}

/// A request that got no response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyFailure {
    /// Label of the target.
    pub label: String,
    /// Survey pass the request belongs to.
    pub test: usize,
    /// What went wrong.
    pub error: OracleError,
}

/// Raw survey output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyResult {
    /// Successful requests in the order they were made.
    pub observations: Vec<Observation>,
    /// Failed requests.
    pub failures: Vec<SurveyFailure>,
}

/// Summary row: all observations sharing label, status, size and cache-busting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    /// Target label.
    pub label: String,
    /// HTTP status.
    pub status: u16,
    /// Response body size in bytes.
    pub size: usize,
    /// Whether requests were cache-busted.
    pub cachebust: bool,
    /// Number of requests in the group.
    pub count: usize,
    /// Mean time to headers in nanoseconds.
    pub mean_ns: f64,
    /// Sample standard deviation in nanoseconds (0 for a single request).
    pub std_dev_ns: f64,
}

impl SurveyResult {
    /// Group observations and compute mean and standard deviation per group.
    ///
    /// Rows are sorted by label, then status, then size. Splitting by status
    /// and size keeps error pages from polluting the timing of real responses.
    pub fn summarize(&self) -> Vec<SummaryRow> {
        let mut groups: BTreeMap<(&str, u16, usize, bool), OnlineStats> = BTreeMap::new();
        for obs in &self.observations {
            groups
                .entry((obs.label.as_str(), obs.status, obs.size, obs.cachebust))
                .or_default()
                .update(obs.duration.as_nanos() as f64);
        }

        groups
            .into_iter()
            .map(|((label, status, size, cachebust), stats)| SummaryRow {
                label: label.to_string(),
                status,
                size,
                cachebust,
                count: stats.count(),
                mean_ns: stats.mean(),
                std_dev_ns: stats.std_dev(),
            })
            .collect()
    }
}

/// Round-robin timing of a list of targets.
#[derive(Debug, Clone)]
pub struct Survey {
    tests: usize,
    pacing: Pacing,
}

impl Default for Survey {
    fn default() -> Self {
        Self {
            tests: 5,
            pacing: Pacing::Fixed(Duration::from_secs(1)),
        }
    }
}

impl Survey {
    /// Five passes, one second apart.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of passes over the target list. For [`Survey::watch`], 0 means
    /// no limit.
    pub fn tests(mut self, n: usize) -> Self {
        self.tests = n;
        self
    }

    /// Delay policy between requests.
    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Time every target `tests` times, interleaved.
    ///
    /// Each pass requests every target once in list order, so slow drift
    /// affects all targets alike. Every response counts, whatever its status.
    /// Requests that get no response are recorded as failures and the survey
    /// continues. `on_observation` is called after every request.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidPacing`] if the pacing policy is unusable.
    pub fn run<F>(
        &self,
        oracle: &mut RemoteOracle,
        targets: &[SurveyTarget],
        mut on_observation: F,
    ) -> Result<SurveyResult, ConfigError>
    where
        F: FnMut(&SurveyTarget, Result<&Observation, &OracleError>),
    {
        let mut pacer = Pacer::new(self.pacing)?;
        let start = Instant::now();
        let mut result = SurveyResult::default();

        for test in 0..self.tests {
            for target in targets {
                match request(oracle, &mut pacer, target, test, start) {
                    Ok(obs) => {
                        on_observation(target, Ok(&obs));
                        result.observations.push(obs);
                    }
                    Err(error) => {
                        on_observation(target, Err(&error));
                        result.failures.push(SurveyFailure {
                            label: target.label.clone(),
                            test,
                            error,
                        });
                    }
                }
            }
        }

        Ok(result)
    }

    /// Time a single target over and over, keeping running statistics.
    ///
    /// Stops after `tests` requests, or never when `tests` is 0, unless
    /// `on_tick` breaks first. `on_tick` sees every request together with the
    /// statistics of all observations so far. Returns the final statistics.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidPacing`] if the pacing policy is unusable.
    pub fn watch<F>(
        &self,
        oracle: &mut RemoteOracle,
        target: &SurveyTarget,
        mut on_tick: F,
    ) -> Result<OnlineStats, ConfigError>
    where
        F: FnMut(Result<&Observation, &OracleError>, &OnlineStats) -> ControlFlow<()>,
    {
        let mut pacer = Pacer::new(self.pacing)?;
        let start = Instant::now();
        let mut stats = OnlineStats::new();

        let mut test = 0;
        while self.tests == 0 || test < self.tests {
            let flow = match request(oracle, &mut pacer, target, test, start) {
                Ok(obs) => {
                    stats.update(obs.duration.as_nanos() as f64);
                    on_tick(Ok(&obs), &stats)
                }
                Err(error) => on_tick(Err(&error), &stats),
            };
            if flow.is_break() {
                break;
            }
            test += 1;
        }

        Ok(stats)
    }
}

/// One paced request to `target`, whatever status it gets.
fn request(
    oracle: &mut RemoteOracle,
    pacer: &mut Pacer,
    target: &SurveyTarget,
    test: usize,
    start: Instant,
) -> Result<Observation, OracleError> {
    pacer.wait();
    let measured = oracle.observe(&target.url, target.value.as_deref());
    pacer.finished();

    let m = measured.map_err(|error| {
        tracing::warn!("{} #{} failed: {}", target.label, test, error);
        error
    })?;
    let (status, size) = match m.outcome {
        Outcome::Http { status, size, .. } => (status, size),
        Outcome::Local => (0, 0),
    };
    let obs = Observation {
        label: target.label.clone(),
        test,
        status,
        size,
        duration: m.duration,
        cachebust: oracle.cache_busting(),
        timestamp_ns: start.elapsed().as_nanos() as u64,
    };
    tracing::debug!("{} #{}: {} {}B in {:?}", obs.label, test, status, size, obs.duration);
    Ok(obs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(label: &str, status: u16, size: usize, ms: u64) -> Observation {
        Observation {
            label: label.to_string(),
            test: 0,
            status,
            size,
            duration: Duration::from_millis(ms),
            cachebust: false,
            timestamp_ns: 0,
        }
    }

    #[test]
    fn test_summary_groups_by_label_status_and_size() {
        let result = SurveyResult {
            observations: vec![
                obs("/b", 200, 10, 4),
                obs("/a", 200, 10, 1),
                obs("/a", 200, 10, 3),
                obs("/a", 404, 5, 9),
            ],
            failures: Vec::new(),
        };

        let rows = result.summarize();
        assert_eq!(rows.len(), 3);

        assert_eq!((rows[0].label.as_str(), rows[0].status), ("/a", 200));
        assert_eq!(rows[0].count, 2);
        assert!((rows[0].mean_ns - 2_000_000.0).abs() < 1e-6);
        assert!((rows[0].std_dev_ns - 1_414_213.562).abs() < 1.0);

        assert_eq!((rows[1].label.as_str(), rows[1].status), ("/a", 404));
        assert_eq!(rows[1].std_dev_ns, 0.0);

        assert_eq!(rows[2].label, "/b");
    }

    #[test]
    fn test_padded_values() {
        let builder = ProbeBuilder::new(4, '0');
        let targets = SurveyTarget::padded_values("http://x/", ["ab", "abcd"], &builder).unwrap();
        assert_eq!(targets[0].label, "ab00");
        assert_eq!(targets[0].value.as_deref(), Some("ab00"));
        assert_eq!(targets[1].label, "abcd");

        assert!(SurveyTarget::padded_values("http://x/", ["abcde"], &builder).is_err());
    }

    #[test]
    fn test_url_targets() {
        let targets = SurveyTarget::urls(["http://a/", "http://b/"]);
        assert_eq!(targets[1], SurveyTarget::url("http://b/"));
        assert_eq!(targets[1].value, None);
    }
}

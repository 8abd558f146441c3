//! Online (streaming) mean and variance using Welford's algorithm.

/// Streaming accumulator for mean and variance.
///
/// # Example
///
/// ```
/// use timing_recover::statistics::OnlineStats;
///
/// let mut stats = OnlineStats::new();
/// for x in [1.0, 2.0, 3.0, 4.0, 5.0] {
///     stats.update(x);
/// }
/// assert!((stats.mean() - 3.0).abs() < 1e-10);
/// assert!((stats.variance() - 2.5).abs() < 1e-10);
/// ```
#[derive(Debug, Clone, Default)]
pub struct OnlineStats {
    count: usize,
    mean: f64,
    /// Sum of squared deviations from the running mean.
    m2: f64,
}

impl OnlineStats {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation.
    pub fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    /// Number of observations.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Running mean, `NaN` when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    /// Sample variance (n-1 denominator), 0 with fewer than two observations.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Sample standard deviation.
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mean_is_nan() {
        let stats = OnlineStats::new();
        assert!(stats.mean().is_nan());
        assert_eq!(stats.variance(), 0.0);
        assert_eq!(stats.count(), 0);
    }

    #[test]
    fn test_constant_values() {
        let mut stats = OnlineStats::new();
        for _ in 0..100 {
            stats.update(5.0);
        }
        assert!((stats.mean() - 5.0).abs() < 1e-10);
        assert!(stats.variance() < 1e-10);
    }

    #[test]
    fn test_matches_batch() {
        let data: Vec<f64> = (0..1000).map(|i| (i as f64).sin() * 100.0).collect();

        let mut stats = OnlineStats::new();
        for &x in &data {
            stats.update(x);
        }

        let n = data.len() as f64;
        let mean: f64 = data.iter().sum::<f64>() / n;
        let variance: f64 = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);

        assert!((stats.mean() - mean).abs() < 1e-9);
        assert!((stats.variance() - variance).abs() < 1e-6);
    }
}

use serde::{Deserialize, Serialize};

/// A weighted running mean and variance (West's incremental algorithm).
///
/// This is the accumulator behind profile bins and calibration entries: each value is folded in
/// once, in any order, and the mean and population variance are available at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    entries: u64,
    sum_weights: f64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    /// Fold in a value with unit weight.
    pub fn push(&mut self, value: f64) {
        self.push_weighted(value, 1.0);
    }

    /// Fold in a value with the given weight. Non-positive or non-finite weights and non-finite
    /// values are ignored.
    pub fn push_weighted(&mut self, value: f64, weight: f64) {
        if !value.is_finite() || !weight.is_finite() || weight <= 0.0 {
            return;
        }
        self.entries += 1;
        self.sum_weights += weight;
        let delta = value - self.mean;
        let r = delta * weight / self.sum_weights;
        self.mean += r;
        self.m2 += (self.sum_weights - weight) * delta * r;
    }

    /// Number of values folded in.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Sum of the weights folded in.
    pub fn sum_weights(&self) -> f64 {
        self.sum_weights
    }

    /// The weighted mean, or zero if nothing was folded in.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// The weighted population variance.
    pub fn variance(&self) -> f64 {
        if self.sum_weights > 0.0 {
            self.m2 / self.sum_weights
        } else {
            0.0
        }
    }

    /// The weighted population standard deviation.
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// The standard error on the mean, treating entries as independent.
    pub fn std_error(&self) -> f64 {
        if self.entries > 0 {
            self.std_dev() / (self.entries as f64).sqrt()
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unweighted_moments() {
        let mut stats = RunningStats::default();
        for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.push(value);
        }
        assert_eq!(stats.entries(), 8);
        assert_relative_eq!(stats.mean(), 5.0);
        assert_relative_eq!(stats.variance(), 4.0);
        assert_relative_eq!(stats.std_dev(), 2.0);
        assert_relative_eq!(stats.std_error(), 2.0 / 8.0_f64.sqrt());
    }

    #[test]
    fn test_weighted_matches_repeated() {
        let mut weighted = RunningStats::default();
        weighted.push_weighted(1.0, 3.0);
        weighted.push_weighted(5.0, 1.0);
        let mut repeated = RunningStats::default();
        for value in [1.0, 1.0, 1.0, 5.0] {
            repeated.push(value);
        }
        assert_relative_eq!(weighted.mean(), repeated.mean());
        assert_relative_eq!(weighted.variance(), repeated.variance());
        assert_relative_eq!(weighted.sum_weights(), 4.0);
    }

    #[test]
    fn test_ignores_bad_input() {
        let mut stats = RunningStats::default();
        stats.push(f64::NAN);
        stats.push_weighted(1.0, 0.0);
        stats.push_weighted(1.0, -2.0);
        assert_eq!(stats.entries(), 0);
        assert_eq!(stats.mean(), 0.0);
        assert_eq!(stats.variance(), 0.0);
    }
}

// Distribution strategies and repetition control.
// A distribution maps one raw 64-bit decision onto a bounded value; its
// descriptor is what gets recorded next to the value in the trace.

use std::fmt;

use crate::data::DataSource;
use crate::error::GenerationError;

const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// What a recorded choice was drawn from. Replaying a choice against a
/// different descriptor is a structural mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Descriptor {
    Uniform { min: i64, max: i64 },
    Weighted { branches: u32 },
    Flag,
}

impl Descriptor {
    pub fn min(&self) -> i64 {
        match self {
            Descriptor::Uniform { min, .. } => *min,
            Descriptor::Weighted { .. } | Descriptor::Flag => 0,
        }
    }

    pub fn max(&self) -> i64 {
        match self {
            Descriptor::Uniform { max, .. } => *max,
            Descriptor::Weighted { branches } => i64::from(*branches) - 1,
            Descriptor::Flag => 1,
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        self.min() <= value && value <= self.max()
    }

    /// The value shrinking moves towards: zero, or the bound nearest to it.
    pub fn simplest(&self) -> i64 {
        0i64.clamp(self.min(), self.max())
    }

    /// Distance of `value` from [`simplest`](Self::simplest), used as the
    /// secondary shrink order.
    pub fn distance(&self, value: i64) -> u128 {
        (i128::from(value) - i128::from(self.simplest())).unsigned_abs()
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Uniform { min, max } => write!(f, "uniform({}, {})", min, max),
            Descriptor::Weighted { branches } => write!(f, "weighted({} branches)", branches),
            Descriptor::Flag => write!(f, "flag"),
        }
    }
}

/// A distribution together with its sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum IntDistribution {
    /// Every value of `min..=max` equally likely.
    Uniform { min: i64, max: i64 },
    /// Index into `weights`, proportional to the weight.
    Weighted(Vec<f64>),
    /// `1` with probability `p`, `0` otherwise.
    Flag(f64),
}

impl IntDistribution {
    pub fn uniform(min: i64, max: i64) -> Result<Self, GenerationError> {
        if min > max {
            return Err(GenerationError::custom(format!(
                "invalid range: min {} > max {}",
                min, max
            )));
        }
        Ok(IntDistribution::Uniform { min, max })
    }

    pub fn weighted(weights: Vec<f64>) -> Result<Self, GenerationError> {
        if weights.is_empty() || weights.len() > u32::MAX as usize {
            return Err(GenerationError::custom("weighted choice needs at least one branch"));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(GenerationError::custom("weights must be finite and non-negative"));
        }
        if !weights.iter().any(|w| *w > 0.0) {
            return Err(GenerationError::custom("no branch has a positive weight"));
        }
        Ok(IntDistribution::Weighted(weights))
    }

    pub fn flag(p: f64) -> Self {
        IntDistribution::Flag(if p.is_nan() { 0.0 } else { p })
    }

    pub fn descriptor(&self) -> Descriptor {
        match self {
            IntDistribution::Uniform { min, max } => Descriptor::Uniform { min: *min, max: *max },
            IntDistribution::Weighted(weights) => Descriptor::Weighted {
                branches: weights.len() as u32,
            },
            IntDistribution::Flag(_) => Descriptor::Flag,
        }
    }

    /// The single possible outcome, if there is one. Forced outcomes are
    /// recorded without consuming entropy.
    pub fn forced(&self) -> Option<i64> {
        match self {
            IntDistribution::Uniform { min, max } if min == max => Some(*min),
            IntDistribution::Flag(p) if *p <= 0.0 => Some(0),
            IntDistribution::Flag(p) if *p >= 1.0 => Some(1),
            _ => None,
        }
    }

    /// Maps one raw decision onto the distribution's support.
    pub fn sample(&self, raw: u64) -> i64 {
        if let Some(value) = self.forced() {
            return value;
        }
        match self {
            IntDistribution::Uniform { min, max } => {
                let width = (i128::from(*max) - i128::from(*min)) as u128 + 1;
                let offset = if width > u128::from(u64::MAX) {
                    u128::from(raw)
                } else {
                    (u128::from(raw) * width) >> 64
                };
                (i128::from(*min) + offset as i128) as i64
            }
            IntDistribution::Weighted(weights) => {
                let total: f64 = weights.iter().sum();
                let mut target = raw as f64 / TWO_POW_64 * total;
                let mut last_positive = 0;
                for (index, weight) in weights.iter().enumerate() {
                    if *weight <= 0.0 {
                        continue;
                    }
                    if target < *weight {
                        return index as i64;
                    }
                    target -= weight;
                    last_positive = index;
                }
                // Rounding can leave a sliver past the last bucket.
                last_positive as i64
            }
            IntDistribution::Flag(p) => i64::from((raw as f64) < p * TWO_POW_64),
        }
    }

    /// Whether `value` has non-zero probability under these parameters.
    pub fn is_valid(&self, value: i64) -> bool {
        match self {
            IntDistribution::Uniform { min, max } => *min <= value && value <= *max,
            IntDistribution::Weighted(weights) => usize::try_from(value)
                .ok()
                .and_then(|index| weights.get(index))
                .map_or(false, |weight| *weight > 0.0),
            IntDistribution::Flag(p) => match value {
                0 => *p < 1.0,
                1 => *p > 0.0,
                _ => false,
            },
        }
    }
}

/// Drives a sequence of "continue?" flags.
#[derive(Debug, Clone)]
pub struct Repeat {
    min_count: u64,
    max_count: u64,
    p_continue: f64,

    current_count: u64,
}

impl Repeat {
    pub fn new(min_count: u64, max_count: u64, expected_count: f64) -> Repeat {
        let expected_count = expected_count.max(0.0);
        Repeat {
            min_count,
            max_count,
            p_continue: 1.0 - 1.0 / (1.0 + expected_count),
            current_count: 0,
        }
    }

    pub fn count(&self) -> u64 {
        self.current_count
    }

    /// Probability handed to the next flag: forced to one below the minimum
    /// and to zero at the maximum.
    fn next_probability(&self) -> f64 {
        if self.current_count < self.min_count {
            1.0
        } else if self.current_count >= self.max_count {
            0.0
        } else {
            self.p_continue
        }
    }

    pub fn should_continue(&mut self, source: &DataSource) -> Result<bool, GenerationError> {
        let distribution = IntDistribution::flag(self.next_probability());
        let result = source.draw(&distribution)? == 1;
        if result {
            self.current_count += 1;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sample_covers_bounds() {
        let distribution = IntDistribution::uniform(-3, 3).unwrap();
        assert_eq!(distribution.sample(0), -3);
        assert_eq!(distribution.sample(u64::MAX), 3);
        assert_eq!(distribution.sample(1 << 63), 0);
    }

    #[test]
    fn test_full_range_uniform_is_identity_offset() {
        let distribution = IntDistribution::uniform(i64::MIN, i64::MAX).unwrap();
        assert_eq!(distribution.sample(0), i64::MIN);
        assert_eq!(distribution.sample(u64::MAX), i64::MAX);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        assert!(IntDistribution::uniform(5, 4).is_err());
    }

    #[test]
    fn test_weighted_skips_zero_weights() {
        let distribution = IntDistribution::weighted(vec![0.0, 1.0, 0.0]).unwrap();
        for raw in [0, 1 << 32, 1 << 63, u64::MAX] {
            assert_eq!(distribution.sample(raw), 1);
        }
        assert!(!distribution.is_valid(0));
        assert!(distribution.is_valid(1));
        assert!(!distribution.is_valid(3));
    }

    #[test]
    fn test_weighted_respects_proportions() {
        let distribution = IntDistribution::weighted(vec![1.0, 3.0]).unwrap();
        assert_eq!(distribution.sample(0), 0);
        assert_eq!(distribution.sample(u64::MAX / 5), 0);
        assert_eq!(distribution.sample(u64::MAX / 2), 1);
    }

    #[test]
    fn test_forced_flags() {
        assert_eq!(IntDistribution::flag(1.0).forced(), Some(1));
        assert_eq!(IntDistribution::flag(0.0).forced(), Some(0));
        assert_eq!(IntDistribution::flag(0.5).forced(), None);
        assert!(!IntDistribution::flag(1.0).is_valid(0));
        assert!(!IntDistribution::flag(0.0).is_valid(1));
    }

    #[test]
    fn test_descriptor_simplest_clamps_to_range() {
        assert_eq!(Descriptor::Uniform { min: 5, max: 10 }.simplest(), 5);
        assert_eq!(Descriptor::Uniform { min: -10, max: -5 }.simplest(), -5);
        assert_eq!(Descriptor::Uniform { min: -10, max: 10 }.simplest(), 0);
        assert_eq!(Descriptor::Uniform { min: -10, max: 10 }.distance(-7), 7);
        assert_eq!(Descriptor::Weighted { branches: 4 }.max(), 3);
    }
}

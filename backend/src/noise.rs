//! Laplace mechanism for the released statistic.
//!
//! `noisy = value + X` with `X ~ Laplace(0, b)` and `b = sensitivity / epsilon`. For a query whose
//! output changes by at most `sensitivity` when one record changes, this is `epsilon`-DP.
//! With the defaults (`epsilon = 1`, `sensitivity = 1`) the scale is `1 / epsilon`.

use crate::errors::ExchangeError;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EPSILON: f64 = 1.0;
pub const DEFAULT_SENSITIVITY: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaplaceMechanism {
    epsilon: f64,
    sensitivity: f64,
}

impl Default for LaplaceMechanism {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            sensitivity: DEFAULT_SENSITIVITY,
        }
    }
}

impl LaplaceMechanism {
    pub fn new(epsilon: f64, sensitivity: f64) -> Result<Self, ExchangeError> {
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(ExchangeError::Config(format!("epsilon must be > 0, got {epsilon}")));
        }
        if !(sensitivity.is_finite() && sensitivity > 0.0) {
            return Err(ExchangeError::Config(format!("sensitivity must be > 0, got {sensitivity}")));
        }
        Ok(Self { epsilon, sensitivity })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Laplace scale `b`.
    pub fn scale(&self) -> f64 {
        self.sensitivity / self.epsilon
    }

    /// Draw one zero-mean sample by inverting the Laplace CDF.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen_range(-0.5..0.5);
        let magnitude = (1.0 - 2.0 * u.abs()).max(f64::MIN_POSITIVE);
        -self.scale() * u.signum() * magnitude.ln()
    }

    pub fn perturb<R: Rng + ?Sized>(&self, value: f64, rng: &mut R) -> f64 {
        value + self.sample(rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn moments(mechanism: &LaplaceMechanism, n: usize) -> (f64, f64) {
        let mut rng = ChaCha20Rng::seed_from_u64(2024);
        let samples: Vec<f64> = (0..n).map(|_| mechanism.sample(&mut rng)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let mean_abs = samples.iter().map(|x| x.abs()).sum::<f64>() / n as f64;
        (mean, mean_abs)
    }

    #[test]
    fn default_scale_is_inverse_epsilon() {
        let m = LaplaceMechanism::default();
        assert_eq!(m.scale(), 1.0);
        assert_eq!(LaplaceMechanism::new(0.5, 1.0).unwrap().scale(), 2.0);
    }

    #[test]
    fn samples_are_centered_with_mean_absolute_deviation_b() {
        // For Laplace(0, b): E[X] = 0 and E[|X|] = b.
        let (mean, mean_abs) = moments(&LaplaceMechanism::default(), 40_000);
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((mean_abs - 1.0).abs() < 0.05, "mean |x| {mean_abs}");

        let (mean, mean_abs) = moments(&LaplaceMechanism::new(0.25, 1.0).unwrap(), 40_000);
        assert!(mean.abs() < 0.2, "mean {mean}");
        assert!((mean_abs - 4.0).abs() < 0.2, "mean |x| {mean_abs}");
    }

    #[test]
    fn perturbation_is_additive() {
        let m = LaplaceMechanism::default();
        let mut a = ChaCha20Rng::seed_from_u64(9);
        let mut b = ChaCha20Rng::seed_from_u64(9);
        let noise = m.sample(&mut a);
        assert_eq!(m.perturb(42.0, &mut b), 42.0 + noise);
    }

    #[test]
    fn rejects_non_positive_parameters() {
        assert!(LaplaceMechanism::new(0.0, 1.0).is_err());
        assert!(LaplaceMechanism::new(-1.0, 1.0).is_err());
        assert!(LaplaceMechanism::new(f64::NAN, 1.0).is_err());
        assert!(LaplaceMechanism::new(1.0, 0.0).is_err());
    }
}

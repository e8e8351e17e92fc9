//! The reward-generating seam between samplers and the outside world.

use rand::{Rng, RngCore};

use crate::error::{BanditError, BanditResult, OracleError};

/// Source of stochastic success/failure outcomes for arm trials.
///
/// In production an oracle runs a physics simulation or a real grasp; in
/// tests it is a Bernoulli draw. The sampler passes its own generator so a
/// seeded run stays reproducible end to end.
pub trait Oracle {
    /// Number of arms this oracle can try.
    fn num_arms(&self) -> usize;

    /// Runs one trial of `arm`.
    ///
    /// # Errors
    ///
    /// Returns an [`OracleError`] if the arm cannot be evaluated. The sampler
    /// then stops selecting that arm for the rest of the run.
    fn trial(&mut self, arm: usize, rng: &mut dyn RngCore) -> Result<bool, OracleError>;
}

/// Oracle with a fixed latent success probability per arm.
#[derive(Debug, Clone, PartialEq)]
pub struct BernoulliOracle {
    probabilities: Vec<f64>,
}

impl BernoulliOracle {
    /// Creates an oracle from per-arm success probabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if any probability lies outside `[0, 1]`.
    pub fn new(probabilities: Vec<f64>) -> BanditResult<Self> {
        if let Some(p) = probabilities.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(BanditError::invalid_parameter(format!(
                "success probability must be in [0, 1], got {p}"
            )));
        }
        Ok(Self { probabilities })
    }

    /// Latent success probabilities.
    #[must_use]
    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }
}

impl Oracle for BernoulliOracle {
    fn num_arms(&self) -> usize {
        self.probabilities.len()
    }

    fn trial(&mut self, arm: usize, rng: &mut dyn RngCore) -> Result<bool, OracleError> {
        let p = *self
            .probabilities
            .get(arm)
            .ok_or(OracleError::UnknownArm(arm))?;
        Ok(rng.gen_bool(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_rejects_bad_probabilities() {
        assert!(BernoulliOracle::new(vec![0.5, 1.2]).is_err());
        assert!(BernoulliOracle::new(vec![f64::NAN]).is_err());
        assert!(BernoulliOracle::new(vec![0.0, 1.0]).is_ok());
    }

    #[test]
    fn test_deterministic_extremes() {
        let mut oracle = BernoulliOracle::new(vec![0.0, 1.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..20 {
            assert!(!oracle.trial(0, &mut rng).unwrap());
            assert!(oracle.trial(1, &mut rng).unwrap());
        }
    }

    #[test]
    fn test_unknown_arm() {
        let mut oracle = BernoulliOracle::new(vec![0.5]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(oracle.trial(4, &mut rng), Err(OracleError::UnknownArm(4)));
    }

    #[test]
    fn test_empirical_rate() {
        let mut oracle = BernoulliOracle::new(vec![0.3]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let hits = (0..4000)
            .filter(|_| oracle.trial(0, &mut rng).unwrap())
            .count();
        let rate = hits as f64 / 4000.0;
        assert!((rate - 0.3).abs() < 0.03, "rate {rate}");
    }
}

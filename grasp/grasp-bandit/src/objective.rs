//! Arm selection over per-arm scores.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Turns per-arm scores into a single chosen arm.
///
/// Scores are whatever the sampler ranks by: posterior draws for Thompson
/// sampling, posterior means when reporting the current leader. NaN scores
/// and arms marked ineligible are never chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Highest score wins; ties go to the lowest index.
    #[default]
    Maximize,
    /// Highest score wins; ties are broken uniformly at random.
    MaximizeRandomTies,
}

impl Objective {
    /// Picks an arm, or `None` if no arm is eligible.
    ///
    /// `eligible` is indexed like `scores`; missing entries count as
    /// eligible.
    pub fn select<R: Rng + ?Sized>(
        self,
        scores: &[f64],
        eligible: &[bool],
        rng: &mut R,
    ) -> Option<usize> {
        let candidates = scores
            .iter()
            .enumerate()
            .filter(|&(i, s)| !s.is_nan() && eligible.get(i).copied().unwrap_or(true));

        match self {
            Self::Maximize => first_max(candidates),
            Self::MaximizeRandomTies => {
                let mut best = f64::NEG_INFINITY;
                let mut ties: Vec<usize> = Vec::new();
                for (i, &s) in candidates {
                    if ties.is_empty() || s > best {
                        best = s;
                        ties.clear();
                        ties.push(i);
                    } else if s == best {
                        ties.push(i);
                    }
                }
                match ties.len() {
                    0 => None,
                    1 => Some(ties[0]),
                    n => Some(ties[rng.gen_range(0..n)]),
                }
            }
        }
    }
}

/// Index of the largest eligible, non-NaN score; ties go to the lowest index.
///
/// The deterministic form of [`Objective::Maximize`], used to report the
/// current leader without touching a random generator.
#[must_use]
pub fn argmax(scores: &[f64], eligible: &[bool]) -> Option<usize> {
    first_max(
        scores
            .iter()
            .enumerate()
            .filter(|&(i, s)| !s.is_nan() && eligible.get(i).copied().unwrap_or(true)),
    )
}

fn first_max<'a>(candidates: impl Iterator<Item = (usize, &'a f64)>) -> Option<usize> {
    candidates
        .fold(None, |best: Option<(usize, f64)>, (i, &s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_maximize_first_index_wins_ties() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let scores = [0.2, 0.9, 0.9, 0.1];
        assert_eq!(Objective::Maximize.select(&scores, &[], &mut rng), Some(1));
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4], &[]), Some(1));
        assert_eq!(argmax(&[0.1, 0.4, 0.4], &[true, false, true]), Some(2));
        assert_eq!(argmax(&[f64::NAN], &[]), None);
    }

    #[test]
    fn test_ineligible_and_nan_skipped() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let scores = [f64::NAN, 0.9, 0.5, 0.4];
        let eligible = [true, false, true, true];
        assert_eq!(Objective::Maximize.select(&scores, &eligible, &mut rng), Some(2));
        assert_eq!(
            Objective::MaximizeRandomTies.select(&scores, &eligible, &mut rng),
            Some(2)
        );
    }

    #[test]
    fn test_nothing_eligible() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(Objective::Maximize.select(&[], &[], &mut rng), None);
        assert_eq!(
            Objective::MaximizeRandomTies.select(&[0.5, 0.5], &[false, false], &mut rng),
            None
        );
        assert_eq!(Objective::Maximize.select(&[f64::NAN], &[], &mut rng), None);
    }

    #[test]
    fn test_random_ties_cover_all_leaders() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let scores = [0.7, 0.1, 0.7, 0.7];
        let mut seen = [0usize; 4];
        for _ in 0..300 {
            let arm = Objective::MaximizeRandomTies
                .select(&scores, &[], &mut rng)
                .unwrap();
            seen[arm] += 1;
        }
        assert_eq!(seen[1], 0);
        assert!(seen[0] > 0 && seen[2] > 0 && seen[3] > 0);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Objective::MaximizeRandomTies).unwrap();
        assert_eq!(json, "\"maximize_random_ties\"");
    }
}

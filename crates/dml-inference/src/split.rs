//! Random two-way sample splits.

use dml_core::{Error, Result, Split};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Draw a uniform random split of `0..n_obs` into halves of size
/// `floor(n/2)` and `ceil(n/2)`.
pub fn draw_split(n_obs: usize, rng: &mut StdRng) -> Result<Split> {
    if n_obs < 2 {
        return Err(Error::Validation(format!("cannot split {n_obs} observations in two")));
    }
    let mut idx: Vec<usize> = (0..n_obs).collect();
    idx.shuffle(rng);
    let second = idx.split_off(n_obs / 2);
    Split::new(idx, second, n_obs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;

    #[test]
    fn test_split_sizes_odd() {
        let s = draw_split(7, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(s.first().len(), 3);
        assert_eq!(s.second().len(), 4);
    }

    #[test]
    fn test_split_reproducible() {
        let a = draw_split(50, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = draw_split(50, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_split_too_small() {
        assert!(draw_split(1, &mut StdRng::seed_from_u64(0)).is_err());
    }

    proptest! {
        #[test]
        fn prop_split_partitions(n in 2usize..500, seed in any::<u64>()) {
            let s = draw_split(n, &mut StdRng::seed_from_u64(seed)).unwrap();
            prop_assert_eq!(s.first().len() + s.second().len(), n);
            prop_assert!(s.first().len().abs_diff(s.second().len()) <= 1);
            let mut seen = vec![false; n];
            for &i in s.first().iter().chain(s.second()) {
                prop_assert!(!seen[i]);
                seen[i] = true;
            }
            prop_assert!(seen.into_iter().all(|v| v));
        }
    }
}

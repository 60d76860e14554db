//! Weight-biased selection via the exponential-racing trick (design note §9).
//!
//! Rather than calling a language shuffle, each candidate draws a race key
//! `key = -ln(U) / weight` from an independent `U(0,1]` sample; the smallest
//! key wins. This is equivalent to a weighted-without-replacement shuffle but
//! is expressed explicitly so it stays deterministic under a seeded RNG,
//! which the property tests in `skill_rotation` depend on.

use rand::Rng;

/// Draw a single exponential race key for a candidate with the given weight.
/// Panics if `weight <= 0.0` — callers must filter non-positive weights
/// before racing (a zero-weight skill is simply excluded from the draw).
pub fn race_key<R: Rng + ?Sized>(rng: &mut R, weight: f64) -> f64 {
    debug_assert!(weight > 0.0, "race_key requires a strictly positive weight");
    // rng.gen::<f64>() samples [0, 1); nudge away from 0 so ln is finite.
    let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    -u.ln() / weight
}

/// Order `items` (each paired with a positive weight) ascending by race key,
/// returning the reordered items. Ties are broken by original index to keep
/// the draw a total order.
pub fn weighted_shuffle<R: Rng + ?Sized, T>(rng: &mut R, items: Vec<(T, f64)>) -> Vec<T> {
    let mut keyed: Vec<(f64, usize, T)> = items
        .into_iter()
        .enumerate()
        .filter(|(_, (_, w))| *w > 0.0)
        .map(|(i, (item, w))| (race_key(rng, w), i, item))
        .collect();
    keyed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));
    keyed.into_iter().map(|(_, _, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn higher_weight_wins_more_often() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut first_place_counts = [0u32; 2];
        for _ in 0..2000 {
            let order = weighted_shuffle(&mut rng, vec![("heavy", 10.0), ("light", 1.0)]);
            if order[0] == "heavy" {
                first_place_counts[0] += 1;
            } else {
                first_place_counts[1] += 1;
            }
        }
        assert!(first_place_counts[0] > first_place_counts[1]);
    }

    #[test]
    fn zero_weight_excluded() {
        let mut rng = StdRng::seed_from_u64(1);
        let order = weighted_shuffle(&mut rng, vec![("a", 1.0), ("b", 0.0)]);
        assert_eq!(order, vec!["a"]);
    }

    #[test]
    fn deterministic_under_fixed_seed() {
        let mut rng1 = StdRng::seed_from_u64(42);
        let mut rng2 = StdRng::seed_from_u64(42);
        let order1 = weighted_shuffle(&mut rng1, vec![("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        let order2 = weighted_shuffle(&mut rng2, vec![("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(order1, order2);
    }
}

//! Injectable random source shared by the simulators.

use std::fmt;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Thread-safe wrapper around any [`RngCore`].
///
/// Production code uses [`Dice::from_entropy`]; tests pass a seeded
/// [`StdRng`] or a stepping generator to get deterministic draws.
pub struct Dice {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl fmt::Debug for Dice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dice").finish_non_exhaustive()
    }
}

impl Dice {
    pub fn from_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    pub fn from_entropy() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    pub fn index(&self, len: usize) -> usize {
        self.with(|rng| rng.gen_range(0..len))
    }

    /// `base + u * span` for uniform `u` in `[0, 1)`, rounded to cents.
    ///
    /// Rounding means the result lies in `[base, base + span]`.
    pub fn amount(&self, base: f64, span: f64) -> f64 {
        let u: f64 = self.with(|rng| rng.r#gen());
        ((base + u * span) * 100.0).round() / 100.0
    }

    fn with<T>(&self, f: impl FnOnce(&mut dyn RngCore) -> T) -> T {
        // Draws cannot leave the generator in a torn state.
        let mut guard = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(guard.as_mut())
    }
}

impl Default for Dice {
    fn default() -> Self {
        Self::from_entropy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_dice_are_deterministic() {
        let a = Dice::seeded(42);
        let b = Dice::seeded(42);
        let draws_a: Vec<usize> = (0..20).map(|_| a.index(5)).collect();
        let draws_b: Vec<usize> = (0..20).map(|_| b.index(5)).collect();
        assert_eq!(draws_a, draws_b);
    }

    #[test]
    fn index_stays_in_range() {
        let dice = Dice::seeded(7);
        assert!((0..1_000).map(|_| dice.index(5)).all(|i| i < 5));
    }

    #[test]
    fn amount_stays_in_range_with_two_decimals() {
        let dice = Dice::seeded(9);
        for _ in 0..1_000 {
            let price = dice.amount(1.2, 2.2);
            assert!((1.2..=3.4).contains(&price), "price out of range: {price}");
            let cents = price * 100.0;
            assert!((cents - cents.round()).abs() < 1e-6);
        }
    }
}

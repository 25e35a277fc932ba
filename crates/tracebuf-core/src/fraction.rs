//! Fixed-point atomic fractions.
//!
//! There is no atomic floating point type in std, so fractions in `0.0..=1.0`
//! are stored as parts per ten thousand inside an `AtomicU32`.

use std::sync::atomic::{AtomicU32, Ordering};

/// Fixed-point scale: one unit is 0.01%.
pub const FRACTION_SCALE: u32 = 10_000;

/// A fraction in `0.0..=1.0` that can be read and replaced atomically.
#[derive(Debug)]
pub struct AtomicFraction {
    units: AtomicU32,
}

impl AtomicFraction {
    /// Create a new fraction, clamping into `0.0..=1.0`.
    pub fn new(value: f64) -> Self {
        Self {
            units: AtomicU32::new(to_units(value)),
        }
    }

    /// Current value as a float.
    pub fn get(&self) -> f64 {
        f64::from(self.units()) / f64::from(FRACTION_SCALE)
    }

    /// Current value in fixed-point units.
    pub fn units(&self) -> u32 {
        self.units.load(Ordering::Acquire)
    }

    /// Replace the value, clamping into `0.0..=1.0`. Returns the stored value.
    pub fn set(&self, value: f64) -> f64 {
        let units = to_units(value);
        self.units.store(units, Ordering::Release);
        f64::from(units) / f64::from(FRACTION_SCALE)
    }

    /// Whether `numerator / denominator` is strictly greater than this fraction.
    ///
    /// Evaluated in integer arithmetic. A zero denominator exceeds any
    /// fraction as soon as the numerator is non-zero.
    pub fn is_exceeded_by(&self, numerator: u64, denominator: u64) -> bool {
        if denominator == 0 {
            return numerator > 0;
        }
        let lhs = u128::from(numerator) * u128::from(FRACTION_SCALE);
        let rhs = u128::from(self.units()) * u128::from(denominator);
        lhs > rhs
    }

    /// `value * fraction`, rounded up.
    pub fn scale_ceil(&self, value: u64) -> u64 {
        let scaled = u128::from(value) * u128::from(self.units());
        scaled.div_ceil(u128::from(FRACTION_SCALE)) as u64
    }
}

fn to_units(value: f64) -> u32 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * f64::from(FRACTION_SCALE)).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_roundtrip_precision() {
        let fraction = AtomicFraction::new(0.8);
        assert_eq!(fraction.units(), 8_000);
        assert!((fraction.get() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fraction_clamps() {
        let fraction = AtomicFraction::new(1.7);
        assert_eq!(fraction.units(), FRACTION_SCALE);

        assert_eq!(fraction.set(-0.2), 0.0);
        assert_eq!(fraction.set(f64::NAN), 0.0);
    }

    #[test]
    fn test_is_exceeded_by_is_strict() {
        let fraction = AtomicFraction::new(0.8);
        assert!(!fraction.is_exceeded_by(800, 1000));
        assert!(fraction.is_exceeded_by(801, 1000));
        assert!(fraction.is_exceeded_by(850, 1000));
        assert!(!fraction.is_exceeded_by(0, 1000));
    }

    #[test]
    fn test_is_exceeded_by_zero_denominator() {
        let fraction = AtomicFraction::new(0.5);
        assert!(!fraction.is_exceeded_by(0, 0));
        assert!(fraction.is_exceeded_by(1, 0));
    }

    #[test]
    fn test_scale_ceil() {
        let fraction = AtomicFraction::new(0.1);
        assert_eq!(fraction.scale_ceil(1000), 100);
        assert_eq!(fraction.scale_ceil(1001), 101);
        assert_eq!(fraction.scale_ceil(0), 0);
        assert_eq!(AtomicFraction::new(1.0).scale_ceil(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_is_exceeded_by_large_values() {
        let fraction = AtomicFraction::new(0.9);
        assert!(fraction.is_exceeded_by(u64::MAX, u64::MAX - 1));
        assert!(!fraction.is_exceeded_by(u64::MAX / 2, u64::MAX));
    }
}

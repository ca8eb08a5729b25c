//! Barrier repulsion magnitude as a function of distance.
//!
//! The default falloff is a cubic Bézier in the normalised distance
//! `x = d / range`:
//! y(x) = (1−x)³ + 3(1−x)²x·c₁ + 3(1−x)x²·c₂
//! with inner control values c₁ = 1 − k/3 and c₂ = (1 − k)/3 derived from
//! the change rate `k ∈ [0, 1]`. It starts at 1 on the barrier and
//! decreases monotonically to 0 at `range`.

use serde::{Deserialize, Serialize};

/// Monotone falloff `f(distance_to_barrier) -> magnitude`.
pub trait RepulsionMagnitude {
    fn magnitude(&self, distance_to_barrier: f64) -> f64;
}

impl<F> RepulsionMagnitude for F
where
    F: Fn(f64) -> f64,
{
    fn magnitude(&self, distance_to_barrier: f64) -> f64 {
        self(distance_to_barrier)
    }
}

/// Bézier-shaped repulsion falloff.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BezierRepulsion {
    /// Distance beyond which repulsion vanishes
    pub range: f64,
    /// Shape of the curve: 0 keeps force high until near `range`, 1 drops early
    pub change_rate: f64,
    /// Magnitude at zero distance (acceleration units)
    pub strength: f64,
}

impl Default for BezierRepulsion {
    fn default() -> Self {
        Self {
            range: 0.8,
            change_rate: 0.6,
            strength: 10.0,
        }
    }
}

impl BezierRepulsion {
    pub fn new(range: f64, change_rate: f64, strength: f64) -> Self {
        Self {
            range,
            change_rate,
            strength,
        }
    }
}

impl RepulsionMagnitude for BezierRepulsion {
    fn magnitude(&self, distance_to_barrier: f64) -> f64 {
        if self.range <= 0.0 || distance_to_barrier >= self.range {
            return 0.0;
        }
        let x = (distance_to_barrier / self.range).max(0.0);
        let k = self.change_rate.clamp(0.0, 1.0);
        let c1 = 1.0 - k / 3.0;
        let c2 = (1.0 - k) / 3.0;
        let ix = 1.0 - x;
        let y = ix * ix * ix + 3.0 * ix * ix * x * c1 + 3.0 * ix * x * x * c2;
        self.strength * y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn bezier_endpoints() {
        let f = BezierRepulsion::new(2.0, 0.5, 4.0);
        assert_abs_diff_eq!(f.magnitude(0.0), 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f.magnitude(2.0), 0.0);
        assert_abs_diff_eq!(f.magnitude(5.0), 0.0);
    }

    #[test]
    fn bezier_is_monotone() {
        for k in [0.0, 0.3, 1.0] {
            let f = BezierRepulsion::new(1.0, k, 1.0);
            let mut prev = f.magnitude(0.0);
            for i in 1..=100 {
                let m = f.magnitude(i as f64 / 100.0);
                assert!(m <= prev + 1e-12, "k={k} not monotone at {i}");
                prev = m;
            }
        }
    }

    #[test]
    fn closures_are_profiles() {
        let linear = |d: f64| (1.0 - d).max(0.0);
        assert_abs_diff_eq!(linear.magnitude(0.25), 0.75);
    }
}

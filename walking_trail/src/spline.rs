//! Scalar interpolants over strictly ascending abscissae.
//!
//! - [`CubicSpline`]     — natural cubic spline (C², zero end curvature)
//! - [`MonotoneSpline`]  — Fritsch–Carlson/PCHIP Hermite cubic; preserves
//!   monotonicity, used for time ↔ arclength reparametrization
//! - [`LinearInterpolant`] — piecewise linear, exact at the knots
//!
//! All of them clamp queries to the sampled domain. Callers guarantee at
//! least two knots and strictly ascending `xs`.

use serde::{Deserialize, Serialize};

/// Index `k` of the interval `[xs[k], xs[k+1]]` containing `x` (clamped).
fn interval(xs: &[f64], x: f64) -> usize {
    let n = xs.len();
    let k = xs.partition_point(|&xi| xi <= x);
    k.saturating_sub(1).min(n - 2)
}

fn clamp_domain(xs: &[f64], x: f64) -> f64 {
    x.clamp(xs[0], xs[xs.len() - 1])
}

// ---------------------------------------------------------------------------
// Linear
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearInterpolant {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl LinearInterpolant {
    pub fn new(xs: &[f64], ys: &[f64]) -> Self {
        debug_assert!(xs.len() >= 2 && xs.len() == ys.len());
        Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
        }
    }

    pub fn eval(&self, x: f64) -> f64 {
        let x = clamp_domain(&self.xs, x);
        let k = interval(&self.xs, x);
        let t = (x - self.xs[k]) / (self.xs[k + 1] - self.xs[k]);
        self.ys[k] * (1.0 - t) + self.ys[k + 1] * t
    }

    /// Slope of the interval containing `x`.
    pub fn derivative(&self, x: f64) -> f64 {
        let x = clamp_domain(&self.xs, x);
        let k = interval(&self.xs, x);
        (self.ys[k + 1] - self.ys[k]) / (self.xs[k + 1] - self.xs[k])
    }
}

// ---------------------------------------------------------------------------
// Natural cubic
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second derivative at each knot
    m: Vec<f64>,
}

impl CubicSpline {
    /// Natural spline: solves the tridiagonal system for the knot second
    /// derivatives with the Thomas algorithm.
    pub fn natural(xs: &[f64], ys: &[f64]) -> Self {
        debug_assert!(xs.len() >= 2 && xs.len() == ys.len());
        let n = xs.len();
        let mut m = vec![0.0; n];
        if n > 2 {
            let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
            // Unknowns m[1..n-1]; sub/main/super diagonals and right-hand side
            let size = n - 2;
            let mut diag = vec![0.0; size];
            let mut upper = vec![0.0; size];
            let mut rhs = vec![0.0; size];
            for r in 0..size {
                let i = r + 1;
                diag[r] = 2.0 * (h[i - 1] + h[i]);
                upper[r] = h[i];
                rhs[r] = 6.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
            }
            // Forward sweep (sub-diagonal entry of row r is h[r])
            for r in 1..size {
                let w = h[r] / diag[r - 1];
                diag[r] -= w * upper[r - 1];
                rhs[r] -= w * rhs[r - 1];
            }
            // Back substitution
            let mut sol = vec![0.0; size];
            sol[size - 1] = rhs[size - 1] / diag[size - 1];
            for r in (0..size - 1).rev() {
                sol[r] = (rhs[r] - upper[r] * sol[r + 1]) / diag[r];
            }
            m[1..n - 1].copy_from_slice(&sol);
        }
        Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            m,
        }
    }

    pub fn eval(&self, x: f64) -> f64 {
        let x = clamp_domain(&self.xs, x);
        let k = interval(&self.xs, x);
        let (x0, x1) = (self.xs[k], self.xs[k + 1]);
        let (y0, y1) = (self.ys[k], self.ys[k + 1]);
        let (m0, m1) = (self.m[k], self.m[k + 1]);
        let h = x1 - x0;
        let a = x1 - x;
        let b = x - x0;
        m0 * a * a * a / (6.0 * h)
            + m1 * b * b * b / (6.0 * h)
            + (y0 / h - m0 * h / 6.0) * a
            + (y1 / h - m1 * h / 6.0) * b
    }

    pub fn derivative(&self, x: f64) -> f64 {
        let x = clamp_domain(&self.xs, x);
        let k = interval(&self.xs, x);
        let (x0, x1) = (self.xs[k], self.xs[k + 1]);
        let (y0, y1) = (self.ys[k], self.ys[k + 1]);
        let (m0, m1) = (self.m[k], self.m[k + 1]);
        let h = x1 - x0;
        let a = x1 - x;
        let b = x - x0;
        -m0 * a * a / (2.0 * h) + m1 * b * b / (2.0 * h) + (y1 - y0) / h - (m1 - m0) * h / 6.0
    }
}

// ---------------------------------------------------------------------------
// Monotone cubic (PCHIP)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonotoneSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Hermite tangent at each knot
    slopes: Vec<f64>,
}

impl MonotoneSpline {
    pub fn new(xs: &[f64], ys: &[f64]) -> Self {
        debug_assert!(xs.len() >= 2 && xs.len() == ys.len());
        let n = xs.len();
        let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
        let delta: Vec<f64> = (0..n - 1).map(|k| (ys[k + 1] - ys[k]) / h[k]).collect();

        let mut slopes = vec![0.0; n];
        slopes[0] = delta[0];
        slopes[n - 1] = delta[n - 2];
        for k in 1..n - 1 {
            let (d0, d1) = (delta[k - 1], delta[k]);
            if d0 * d1 <= 0.0 {
                continue;
            }
            // Weighted harmonic mean of the neighbouring secants
            let w1 = 2.0 * h[k] + h[k - 1];
            let w2 = h[k] + 2.0 * h[k - 1];
            slopes[k] = (w1 + w2) / (w1 / d0 + w2 / d1);
        }

        Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            slopes,
        }
    }

    pub fn eval(&self, x: f64) -> f64 {
        let x = clamp_domain(&self.xs, x);
        let k = interval(&self.xs, x);
        let h = self.xs[k + 1] - self.xs[k];
        let t = (x - self.xs[k]) / h;
        let t2 = t * t;
        let t3 = t2 * t;
        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;
        h00 * self.ys[k]
            + h10 * h * self.slopes[k]
            + h01 * self.ys[k + 1]
            + h11 * h * self.slopes[k + 1]
    }
}

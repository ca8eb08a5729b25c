//! Fundamental types used across the entire workspace.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

// ---------------------------------------------------------------------------
// Vectors: f64 throughout, value semantics (Copy) so no state is ever aliased.
// ---------------------------------------------------------------------------

/// 2D vector `[u, v]`, used both as a point and as a free vector.
pub type Uv = Vector2<f64>;

/// Lengths below this are treated as zero when unitizing.
pub const UNITIZE_EPSILON: f64 = 1e-12;

/// Shorthand constructor.
#[inline]
pub fn uv(u: f64, v: f64) -> Uv {
    Uv::new(u, v)
}

/// 2D cross product `a.u * b.v - a.v * b.u` (signed parallelogram area).
#[inline]
pub fn cross(a: &Uv, b: &Uv) -> f64 {
    a.perp(b)
}

/// Vector operations that `nalgebra` either lacks or defines with
/// NaN-producing edge cases.
pub trait UvExt {
    /// Unit vector in the same direction; a zero-length vector is returned unchanged.
    fn unitized(&self) -> Uv;
    /// Vector projection onto `axis` (zero when `axis` has no length).
    fn projected_onto(&self, axis: &Uv) -> Uv;
    /// Mirror across the line whose unit normal is `normal`.
    fn reflected(&self, normal: &Uv) -> Uv;
    /// Counter-clockwise rotation by `angle` radians.
    fn rotated(&self, angle: f64) -> Uv;
    /// Signed angle from `self` to `other` in (-π, π].
    fn signed_angle_to(&self, other: &Uv) -> f64;
    /// True when both components are finite.
    fn is_finite_uv(&self) -> bool;
}

impl UvExt for Uv {
    fn unitized(&self) -> Uv {
        let len = self.norm();
        if len > UNITIZE_EPSILON {
            self / len
        } else {
            *self
        }
    }

    fn projected_onto(&self, axis: &Uv) -> Uv {
        let len_sq = axis.norm_squared();
        if len_sq <= UNITIZE_EPSILON * UNITIZE_EPSILON {
            return Uv::zeros();
        }
        axis * (self.dot(axis) / len_sq)
    }

    fn reflected(&self, normal: &Uv) -> Uv {
        let n = normal.unitized();
        self - n * (2.0 * self.dot(&n))
    }

    fn rotated(&self, angle: f64) -> Uv {
        let (s, c) = angle.sin_cos();
        uv(c * self.x - s * self.y, s * self.x + c * self.y)
    }

    fn signed_angle_to(&self, other: &Uv) -> f64 {
        cross(self, other).atan2(self.dot(other))
    }

    fn is_finite_uv(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

// ---------------------------------------------------------------------------
// Kinematic state
// ---------------------------------------------------------------------------

/// Kinematic state of an agent: where it is, where it faces, how it moves.
///
/// `direction` is kept unit length by whoever produces the state. `velocity`
/// is optional because observed trails may record location and facing only.
/// Equality is exact on every component (two `None` velocities are equal).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub location: Uv,
    pub direction: Uv,
    pub velocity: Option<Uv>,
}

impl State {
    pub fn new(location: Uv, direction: Uv, velocity: Option<Uv>) -> Self {
        Self {
            location,
            direction,
            velocity,
        }
    }

    /// Speed, zero when velocity is unknown.
    pub fn speed(&self) -> f64 {
        self.velocity.map(|v| v.norm()).unwrap_or(0.0)
    }

    /// Weighted average of states. Direction is re-unitized; velocity is
    /// averaged only if every state carries one. Returns `None` when the
    /// total weight is zero or the input is empty.
    pub fn weighted_average(samples: &[(State, f64)]) -> Option<State> {
        let total: f64 = samples.iter().map(|(_, w)| *w).sum();
        if samples.is_empty() || total == 0.0 {
            return None;
        }
        let mut location = Uv::zeros();
        let mut direction = Uv::zeros();
        let mut velocity = Some(Uv::zeros());
        for (state, w) in samples {
            location += state.location * *w;
            direction += state.direction * *w;
            velocity = match (velocity, state.velocity) {
                (Some(acc), Some(v)) => Some(acc + v * *w),
                _ => None,
            };
        }
        Some(State {
            location: location / total,
            direction: direction.unitized(),
            velocity: velocity.map(|v| v / total),
        })
    }
}

fn zip_velocity(a: Option<Uv>, b: Option<Uv>, f: impl Fn(Uv, Uv) -> Uv) -> Option<Uv> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        _ => None,
    }
}

impl Add for State {
    type Output = State;
    fn add(self, rhs: State) -> State {
        State {
            location: self.location + rhs.location,
            direction: self.direction + rhs.direction,
            velocity: zip_velocity(self.velocity, rhs.velocity, |a, b| a + b),
        }
    }
}

impl Sub for State {
    type Output = State;
    fn sub(self, rhs: State) -> State {
        State {
            location: self.location - rhs.location,
            direction: self.direction - rhs.direction,
            velocity: zip_velocity(self.velocity, rhs.velocity, |a, b| a - b),
        }
    }
}

impl Mul<f64> for State {
    type Output = State;
    fn mul(self, rhs: f64) -> State {
        State {
            location: self.location * rhs,
            direction: self.direction * rhs,
            velocity: self.velocity.map(|v| v * rhs),
        }
    }
}

impl Div<f64> for State {
    type Output = State;
    fn div(self, rhs: f64) -> State {
        State {
            location: self.location / rhs,
            direction: self.direction / rhs,
            velocity: self.velocity.map(|v| v / rhs),
        }
    }
}

/// Formats as `[u,v]` using the shortest round-trip representation.
pub struct UvText<'a>(pub &'a Uv);

impl fmt::Display for UvText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.0.x, self.0.y)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location:{}; Velocity:", UvText(&self.location))?;
        match &self.velocity {
            Some(v) => write!(f, "{}", UvText(v))?,
            None => write!(f, "null")?,
        }
        write!(f, "; Direction: {}", UvText(&self.direction))
    }
}

// ---------------------------------------------------------------------------
// Cells and destinations
// ---------------------------------------------------------------------------

/// Integer address of a floor cell.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CellIndex {
    pub i: i32,
    pub j: i32,
}

impl CellIndex {
    pub fn new(i: i32, j: i32) -> Self {
        Self { i, j }
    }

    pub fn offset(&self, di: i32, dj: i32) -> Self {
        Self::new(self.i + di, self.j + dj)
    }
}

impl fmt::Display for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C({},{})", self.i, self.j)
    }
}

/// A waypoint reachable from a cell, with a precomputed desirability cost.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellDestination {
    pub destination: Uv,
    pub desirability_cost: f64,
}

impl CellDestination {
    pub fn new(destination: Uv, desirability_cost: f64) -> Self {
        Self {
            destination,
            desirability_cost,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

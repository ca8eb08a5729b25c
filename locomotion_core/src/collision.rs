//! Barrier proximity and collision resolution.
//!
//! The integrator only talks to the [`CollisionService`] trait. Both queries
//! return `Option` instead of failing: "no barrier nearby" and "no contact
//! along this move" are ordinary answers, not errors.
//!
//! ## Resolution contract
//! For a move `prev → next` of a body of radius `R`, the service reports the
//! fraction of the move that remains *after* first contact:
//! `r = 1 − s` where `s` is the contact parameter along the move.
//! * `r ≤ 0`: contact at (or beyond) the end of the move
//! * `0 < r ≤ 1`: contact part-way through
//! * `r > 1`: no contact, the move ends inside a buffer but does not
//!   close on the barrier (pass-through)
//!
//! A body that starts inside a buffer and keeps closing on the barrier is
//! in contact at the start of the move (`r = 1`).

use crate::geometry::UvLine;
use crate::types::{Uv, UvExt};
use serde::{Deserialize, Serialize};

/// Remainder proportion reported for an overlapping move with no contact.
pub const PASS_THROUGH_REMAINDER: f64 = 2.0;

/// Snapshot of the nearest barrier as seen from `location`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BarrierSnapshot {
    /// Where the query was made
    pub location: Uv,
    /// Distance from `location` to the barrier edge
    pub distance_to_barrier: f64,
    /// Unit vector pointing from the barrier toward `location`
    pub normalized_repulsion: Uv,
    /// The nearest barrier edge
    pub barrier: UvLine,
    pub closest_point_on_barrier: Uv,
}

/// Outcome of resolving a penetrating move.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollisionResolution {
    /// Fraction of the move remaining after contact (see module docs)
    pub time_step_remainder_proportion: f64,
    /// Body-centre location at first contact
    pub collision_point: Uv,
    /// Unit normal at contact, pointing away from the barrier
    pub collision_normal: Uv,
}

/// Barrier geometry queries consumed by the integrator.
pub trait CollisionService {
    /// Nearest barrier to `location`, or `None` when nothing is in range.
    fn find_nearest_barrier(&self, location: &Uv) -> Option<BarrierSnapshot>;

    /// First contact of a body of radius `body_radius` moving from `prev` to
    /// `next`. `tolerance` widens the accepted contact window past the end of
    /// the move. `None` means the move never touches a barrier buffer.
    fn resolve_collision(
        &self,
        prev: &Uv,
        next: &Uv,
        body_radius: f64,
        tolerance: f64,
    ) -> Option<CollisionResolution>;
}

// ---------------------------------------------------------------------------
// Segment-set implementation
// ---------------------------------------------------------------------------

/// A set of straight barrier edges with an optional query radius.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BarrierField {
    pub barriers: Vec<UvLine>,
    /// Barriers farther than this are invisible to `find_nearest_barrier`
    pub search_radius: Option<f64>,
}

impl BarrierField {
    pub fn new(barriers: Vec<UvLine>) -> Self {
        Self {
            barriers,
            search_radius: None,
        }
    }

    pub fn with_search_radius(mut self, radius: f64) -> Self {
        self.search_radius = Some(radius);
        self
    }

    /// Closed polygon outline as barrier edges.
    pub fn from_polygon(vertices: &[Uv]) -> Self {
        let n = vertices.len();
        if n < 2 {
            return Self::default();
        }
        let barriers = (0..n)
            .map(|i| UvLine::new(vertices[i], vertices[(i + 1) % n]))
            .collect();
        Self::new(barriers)
    }

    fn outward_normal(barrier: &UvLine, location: &Uv, closest: &Uv) -> Uv {
        let away = (location - closest).unitized();
        if away.norm_squared() > 0.0 {
            return away;
        }
        let d = barrier.direction();
        Uv::new(-d.y, d.x)
    }

    /// Earliest contact parameter `s` of `p0 + s·d` with the radius-`r`
    /// buffer around `barrier`, if the move approaches it.
    fn contact_parameter(barrier: &UvLine, p0: &Uv, d: &Uv, r: f64) -> Option<f64> {
        let mut best: Option<f64> = None;
        let mut keep = |s: f64| {
            if s.is_finite() {
                best = Some(best.map_or(s, |b: f64| b.min(s)));
            }
        };

        // Flat side of the buffer
        let dir = barrier.direction();
        if dir.norm_squared() > 0.0 {
            let n = Uv::new(-dir.y, dir.x);
            let c0 = (p0 - barrier.start).dot(&n);
            let c1 = d.dot(&n);
            let side = if c0 != 0.0 { c0.signum() } else { -c1.signum() };
            if side * c1 < 0.0 {
                let s = (side * r - c0) / c1;
                let t = barrier.projection_parameter(&(p0 + d * s));
                if (0.0..=1.0).contains(&t) {
                    keep(s);
                }
            }
        }

        // Rounded caps at the two endpoints
        let a = d.norm_squared();
        if a > 0.0 {
            for end in [barrier.start, barrier.end] {
                let w = p0 - end;
                let b = 2.0 * d.dot(&w);
                let c = w.norm_squared() - r * r;
                let disc = b * b - 4.0 * a * c;
                if disc < 0.0 {
                    continue;
                }
                let sq = disc.sqrt();
                let exit = (-b + sq) / (2.0 * a);
                if exit > 0.0 {
                    keep((-b - sq) / (2.0 * a));
                }
            }
        }
        best
    }
}

impl CollisionService for BarrierField {
    fn find_nearest_barrier(&self, location: &Uv) -> Option<BarrierSnapshot> {
        let (barrier, closest, distance) = self
            .barriers
            .iter()
            .map(|b| {
                let closest = b.closest_point(location);
                (*b, closest, (location - closest).norm())
            })
            .min_by(|a, b| a.2.total_cmp(&b.2))?;
        if let Some(radius) = self.search_radius {
            if distance > radius {
                return None;
            }
        }
        Some(BarrierSnapshot {
            location: *location,
            distance_to_barrier: distance,
            normalized_repulsion: Self::outward_normal(&barrier, location, &closest),
            barrier,
            closest_point_on_barrier: closest,
        })
    }

    fn resolve_collision(
        &self,
        prev: &Uv,
        next: &Uv,
        body_radius: f64,
        tolerance: f64,
    ) -> Option<CollisionResolution> {
        let d = next - prev;
        let mut hit: Option<(f64, UvLine)> = None;
        for barrier in &self.barriers {
            let Some(s) = Self::contact_parameter(barrier, prev, &d, body_radius) else {
                continue;
            };
            // Already inside this buffer: only a move that closes in is a contact
            let closing = barrier.distance_to(next) < barrier.distance_to(prev) - tolerance;
            if s < 0.0 && !closing {
                continue;
            }
            let s = s.max(0.0);
            if s <= 1.0 + tolerance && hit.map_or(true, |(best, _)| s < best) {
                hit = Some((s, *barrier));
            }
        }

        match hit {
            Some((s, barrier)) => {
                let point = prev + d * s;
                let closest = barrier.closest_point(&point);
                Some(CollisionResolution {
                    time_step_remainder_proportion: 1.0 - s,
                    collision_point: point,
                    collision_normal: Self::outward_normal(&barrier, &point, &closest),
                })
            }
            None => {
                let snapshot = self.find_nearest_barrier(next)?;
                if snapshot.distance_to_barrier > body_radius {
                    return None;
                }
                Some(CollisionResolution {
                    time_step_remainder_proportion: PASS_THROUGH_REMAINDER,
                    collision_point: *next,
                    collision_normal: snapshot.normalized_repulsion,
                })
            }
        }
    }
}

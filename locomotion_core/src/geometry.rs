//! Line-segment geometry and facing rotation helpers.

use crate::types::{cross, Uv, UvExt};
use serde::{Deserialize, Serialize};

/// A barrier edge or any other directed segment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UvLine {
    pub start: Uv,
    pub end: Uv,
}

impl UvLine {
    pub fn new(start: Uv, end: Uv) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        (self.end - self.start).norm()
    }

    /// Unit direction from `start` to `end` (zero for a degenerate segment).
    pub fn direction(&self) -> Uv {
        (self.end - self.start).unitized()
    }

    /// Parameter `t` of the orthogonal projection of `p` on the infinite line,
    /// with `t = 0` at `start` and `t = 1` at `end`.
    pub fn projection_parameter(&self, p: &Uv) -> f64 {
        let d = self.end - self.start;
        let len_sq = d.norm_squared();
        if len_sq == 0.0 {
            return 0.0;
        }
        (p - self.start).dot(&d) / len_sq
    }

    /// Closest point of the segment to `p`.
    pub fn closest_point(&self, p: &Uv) -> Uv {
        let t = self.projection_parameter(p).clamp(0.0, 1.0);
        self.start + (self.end - self.start) * t
    }

    pub fn distance_to(&self, p: &Uv) -> f64 {
        (p - self.closest_point(p)).norm()
    }

    /// Reflect a free vector across this line.
    pub fn reflect(&self, v: &Uv) -> Uv {
        let d = self.direction();
        let normal = Uv::new(-d.y, d.x);
        v.reflected(&normal)
    }

    /// Intersection point of two segments, if they cross.
    pub fn intersection(&self, other: &UvLine) -> Option<Uv> {
        let r = self.end - self.start;
        let s = other.end - other.start;
        let denom = cross(&r, &s);
        if denom.abs() < 1e-12 {
            return None;
        }
        let qp = other.start - self.start;
        let t = cross(&qp, &s) / denom;
        let u = cross(&qp, &r) / denom;
        if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
            Some(self.start + r * t)
        } else {
            None
        }
    }
}

/// Rotate the unit facing `from` toward `to` by at most `max_angle` radians.
///
/// Returns the new unit facing. If `to` is zero length the facing is kept.
pub fn rotate_toward(from: &Uv, to: &Uv, max_angle: f64) -> Uv {
    let target = to.unitized();
    if target.norm_squared() == 0.0 {
        return *from;
    }
    let current = from.unitized();
    if current.norm_squared() == 0.0 {
        return target;
    }
    let angle = current.signed_angle_to(&target);
    let max_angle = max_angle.max(0.0);
    if angle.abs() <= max_angle {
        target
    } else {
        current.rotated(max_angle.copysign(angle)).unitized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::uv;
    use approx::assert_abs_diff_eq;

    #[test]
    fn closest_point_clamps_to_segment() {
        let line = UvLine::new(uv(0.0, 0.0), uv(10.0, 0.0));
        assert_eq!(line.closest_point(&uv(5.0, 3.0)), uv(5.0, 0.0));
        assert_eq!(line.closest_point(&uv(-4.0, 3.0)), uv(0.0, 0.0));
        assert_abs_diff_eq!(line.distance_to(&uv(13.0, 4.0)), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn segments_intersect() {
        let a = UvLine::new(uv(0.0, 0.0), uv(2.0, 2.0));
        let b = UvLine::new(uv(0.0, 2.0), uv(2.0, 0.0));
        let p = a.intersection(&b).unwrap();
        assert_abs_diff_eq!(p.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.y, 1.0, epsilon = 1e-12);
        let c = UvLine::new(uv(5.0, 5.0), uv(6.0, 5.0));
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn rotation_is_rate_limited() {
        let out = rotate_toward(&uv(1.0, 0.0), &uv(0.0, 1.0), 0.1);
        assert_abs_diff_eq!(out.y.atan2(out.x), 0.1, epsilon = 1e-12);
        let full = rotate_toward(&uv(1.0, 0.0), &uv(0.0, 1.0), 2.0);
        assert_abs_diff_eq!(full.y, 1.0, epsilon = 1e-12);
        assert_eq!(rotate_toward(&uv(1.0, 0.0), &Uv::zeros(), 1.0), uv(1.0, 0.0));
    }
}

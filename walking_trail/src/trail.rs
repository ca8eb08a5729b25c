//! Smooth, differentiable walking trails fitted through sparse observations.
//!
//! # Model
//! Each observation is a `(time, State)` pair. Depending on the
//! [`TrailInputMode`], direction and velocity are either fitted from the
//! observations or derived from the location curve.
//!
//! - Location (and observed direction/velocity) per axis: natural cubic
//!   spline **and** a piecewise-linear interpolant over time. Queries blend
//!   the two with `curvature · spline + (1 − curvature) · linear`.
//! - Arclength: cumulative distance between successive observed locations,
//!   with monotone cubic reparametrizations time → length and length → time.
//!
//! The base fit never changes after construction. The tunables (curvature
//! and the two sampling densities) only rebuild the derived caches.

use locomotion_core::{uv, State, Uv, UvExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::spline::{CubicSpline, LinearInterpolant, MonotoneSpline};

pub const DEFAULT_CURVATURE: f64 = 1.0;
pub const DEFAULT_POINTS_PER_UNIT_LENGTH: f64 = 5.0;
pub const DEFAULT_STATES_PER_UNIT_LENGTH: f64 = 5.0;
/// Most points or states a trail will cache.
pub const MAX_RESAMPLED: usize = 1_000_000;

/// Half-width (seconds) of the central difference used for derived velocity.
const DIFFERENTIATION_STEP: f64 = 1e-4;

// ---------------------------------------------------------------------------
// Input mode / errors
// ---------------------------------------------------------------------------

/// Which state components the observations carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrailInputMode {
    /// Location, direction and velocity observed
    Full,
    /// Location and direction observed, velocity derived
    LocationDirection,
    /// Location only, direction and velocity derived
    Location,
}

impl TrailInputMode {
    /// Code used by the text format.
    pub fn code(self) -> u8 {
        match self {
            TrailInputMode::Full => 0,
            TrailInputMode::LocationDirection => 1,
            TrailInputMode::Location => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TrailInputMode::Full),
            1 => Some(TrailInputMode::LocationDirection),
            2 => Some(TrailInputMode::Location),
            _ => None,
        }
    }

    pub fn observes_direction(self) -> bool {
        !matches!(self, TrailInputMode::Location)
    }

    pub fn observes_velocity(self) -> bool {
        matches!(self, TrailInputMode::Full)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TrailError {
    #[error("a trail needs at least 2 observations, got {0}")]
    TooFewSamples(usize),
    #[error("{times} observation times but {states} observed states")]
    LengthMismatch { times: usize, states: usize },
    #[error("observation times must be strictly ascending: t[{index}] = {current} after {previous}")]
    NotAscending {
        index: usize,
        previous: f64,
        current: f64,
    },
    #[error("observation {index} has a non-finite time or state component")]
    NonFinite { index: usize },
    #[error("observation {index} has no velocity, which mode {mode:?} requires")]
    MissingVelocity { index: usize, mode: TrailInputMode },
    #[error("observation {index} has a zero direction, which mode {mode:?} requires")]
    MissingDirection { index: usize, mode: TrailInputMode },
    #[error("walking speed must be positive and finite, got {0}")]
    InvalidSpeed(f64),
    #[error("{name} must be {expected}, got {value}")]
    InvalidParameter {
        name: &'static str,
        expected: &'static str,
        value: f64,
    },
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

// ---------------------------------------------------------------------------
// Per-axis interpolant pair
// ---------------------------------------------------------------------------

/// Spline and linear interpolants of a 2D quantity over time.
#[derive(Clone, Debug)]
struct AxisPair {
    spline_u: CubicSpline,
    spline_v: CubicSpline,
    linear_u: LinearInterpolant,
    linear_v: LinearInterpolant,
}

impl AxisPair {
    fn fit(times: &[f64], values: impl Iterator<Item = Uv>) -> Self {
        let (us, vs): (Vec<f64>, Vec<f64>) = values.map(|p| (p.x, p.y)).unzip();
        Self {
            spline_u: CubicSpline::natural(times, &us),
            spline_v: CubicSpline::natural(times, &vs),
            linear_u: LinearInterpolant::new(times, &us),
            linear_v: LinearInterpolant::new(times, &vs),
        }
    }

    fn spline(&self, t: f64) -> Uv {
        uv(self.spline_u.eval(t), self.spline_v.eval(t))
    }

    fn linear(&self, t: f64) -> Uv {
        uv(self.linear_u.eval(t), self.linear_v.eval(t))
    }

    fn blend(&self, t: f64, curvature: f64) -> Uv {
        self.spline(t) * curvature + self.linear(t) * (1.0 - curvature)
    }
}

// ---------------------------------------------------------------------------
// WalkingTrail
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct WalkingTrail {
    mode: TrailInputMode,
    times: Vec<f64>,
    states: Vec<State>,
    /// Cumulative arclength at each observation
    lengths: Vec<f64>,
    time_to_length: MonotoneSpline,
    /// `None` when every observation sits at the same location
    length_to_time: Option<MonotoneSpline>,
    location: AxisPair,
    direction: Option<AxisPair>,
    velocity: Option<AxisPair>,

    curvature: f64,
    points_per_unit_length: f64,
    states_per_unit_length: f64,

    approximated_points: Vec<Uv>,
    interpolated_states: Vec<State>,
    interpolated_interval: f64,
}

impl WalkingTrail {
    /// Fit a trail through `(times[i], states[i])`.
    pub fn new(times: &[f64], states: &[State], mode: TrailInputMode) -> Result<Self, TrailError> {
        validate(times, states, mode)?;

        let mut lengths = Vec::with_capacity(states.len());
        let mut total = 0.0;
        lengths.push(0.0);
        for w in states.windows(2) {
            total += (w[1].location - w[0].location).norm();
            lengths.push(total);
        }

        let time_to_length = MonotoneSpline::new(times, &lengths);
        let length_to_time = {
            // Stationary stretches repeat a length; keep the first time at each
            let mut ls = vec![lengths[0]];
            let mut ts = vec![times[0]];
            for (l, t) in lengths.iter().zip(times.iter()).skip(1) {
                if *l > ls[ls.len() - 1] {
                    ls.push(*l);
                    ts.push(*t);
                }
            }
            (ls.len() >= 2).then(|| MonotoneSpline::new(&ls, &ts))
        };

        let location = AxisPair::fit(times, states.iter().map(|s| s.location));
        let direction = mode
            .observes_direction()
            .then(|| AxisPair::fit(times, states.iter().map(|s| s.direction)));
        let velocity = mode.observes_velocity().then(|| {
            AxisPair::fit(
                times,
                states.iter().map(|s| s.velocity.unwrap_or_else(Uv::zeros)),
            )
        });

        let mut trail = Self {
            mode,
            times: times.to_vec(),
            states: states.to_vec(),
            lengths,
            time_to_length,
            length_to_time,
            location,
            direction,
            velocity,
            curvature: DEFAULT_CURVATURE,
            points_per_unit_length: DEFAULT_POINTS_PER_UNIT_LENGTH,
            states_per_unit_length: DEFAULT_STATES_PER_UNIT_LENGTH,
            approximated_points: Vec::new(),
            interpolated_states: Vec::new(),
            interpolated_interval: 0.0,
        };
        trail.refresh_points();
        trail.refresh_states();

        debug!(
            samples = trail.times.len(),
            ?mode,
            length = trail.total_length(),
            duration = trail.duration(),
            "walking trail fitted"
        );
        Ok(trail)
    }

    /// Trail through hand-drawn points walked at a constant `speed`.
    ///
    /// Times come from segment length / speed. The stored states carry the
    /// segment direction and `direction · speed`, but only the locations are
    /// fitted (mode [`TrailInputMode::Location`]).
    pub fn from_polyline(points: &[Uv], speed: f64) -> Result<Self, TrailError> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(TrailError::InvalidSpeed(speed));
        }
        if points.len() < 2 {
            return Err(TrailError::TooFewSamples(points.len()));
        }
        let n = points.len();
        let mut times = Vec::with_capacity(n);
        let mut states = Vec::with_capacity(n);
        let mut t = 0.0;
        for i in 0..n {
            if i > 0 {
                t += (points[i] - points[i - 1]).norm() / speed;
            }
            let heading = if i + 1 < n {
                points[i + 1] - points[i]
            } else {
                points[i] - points[i - 1]
            }
            .unitized();
            times.push(t);
            states.push(State::new(points[i], heading, Some(heading * speed)));
        }
        Self::new(&times, &states, TrailInputMode::Location)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn mode(&self) -> TrailInputMode {
        self.mode
    }

    pub fn observation_times(&self) -> &[f64] {
        &self.times
    }

    pub fn observed_states(&self) -> &[State] {
        &self.states
    }

    pub fn start_time(&self) -> f64 {
        self.times[0]
    }

    pub fn end_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn duration(&self) -> f64 {
        self.end_time() - self.start_time()
    }

    /// Polyline length through the observed locations.
    pub fn total_length(&self) -> f64 {
        self.lengths[self.lengths.len() - 1]
    }

    pub fn curvature(&self) -> f64 {
        self.curvature
    }

    pub fn points_per_unit_length(&self) -> f64 {
        self.points_per_unit_length
    }

    pub fn states_per_unit_length(&self) -> f64 {
        self.states_per_unit_length
    }

    // -----------------------------------------------------------------------
    // Tunables
    // -----------------------------------------------------------------------

    /// Blend factor in `[0, 1]`: 0 is the polyline, 1 the cubic spline.
    pub fn set_curvature(&mut self, curvature: f64) -> Result<(), TrailError> {
        if !(0.0..=1.0).contains(&curvature) {
            return Err(TrailError::InvalidParameter {
                name: "curvature",
                expected: "within [0, 1]",
                value: curvature,
            });
        }
        self.curvature = curvature;
        self.refresh_points();
        self.refresh_states();
        Ok(())
    }

    pub fn set_points_per_unit_length(&mut self, density: f64) -> Result<(), TrailError> {
        self.points_per_unit_length =
            check_density("points per unit length", density, self.total_length())?;
        self.refresh_points();
        Ok(())
    }

    pub fn set_states_per_unit_length(&mut self, density: f64) -> Result<(), TrailError> {
        self.states_per_unit_length =
            check_density("states per unit length", density, self.duration())?;
        self.refresh_states();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    fn clamp_time(&self, t: f64) -> f64 {
        t.clamp(self.start_time(), self.end_time())
    }

    /// Blended location at time `t` (clamped to the trail).
    pub fn location(&self, t: f64) -> Uv {
        self.location.blend(self.clamp_time(t), self.curvature)
    }

    /// Raw cubic-spline location, ignoring curvature.
    pub fn spline_location(&self, t: f64) -> Uv {
        self.location.spline(self.clamp_time(t))
    }

    /// Raw piecewise-linear location, ignoring curvature.
    pub fn linear_location(&self, t: f64) -> Uv {
        self.location.linear(self.clamp_time(t))
    }

    pub fn velocity(&self, t: f64) -> Uv {
        let t = self.clamp_time(t);
        match &self.velocity {
            Some(v) => v.blend(t, self.curvature),
            None => self.differentiate(t),
        }
    }

    /// Unit facing at `t`; zero only where the trail is stationary and the
    /// facing is not observed.
    pub fn direction(&self, t: f64) -> Uv {
        let t = self.clamp_time(t);
        match &self.direction {
            Some(d) => d.blend(t, self.curvature).unitized(),
            None => self.velocity(t).unitized(),
        }
    }

    pub fn state(&self, t: f64) -> State {
        State::new(self.location(t), self.direction(t), Some(self.velocity(t)))
    }

    /// Arclength walked by time `t`.
    pub fn length_at_time(&self, t: f64) -> f64 {
        self.time_to_length.eval(self.clamp_time(t))
    }

    /// Time at which arclength `s` is reached.
    pub fn time_at_length(&self, s: f64) -> f64 {
        match &self.length_to_time {
            Some(spline) => spline.eval(s),
            None => self.start_time(),
        }
    }

    fn differentiate(&self, t: f64) -> Uv {
        let lo = (t - DIFFERENTIATION_STEP).max(self.start_time());
        let hi = (t + DIFFERENTIATION_STEP).min(self.end_time());
        (self.location.blend(hi, self.curvature) - self.location.blend(lo, self.curvature)) / (hi - lo)
    }

    // -----------------------------------------------------------------------
    // Caches
    // -----------------------------------------------------------------------

    /// Points at uniform arclength spacing along the trail.
    pub fn approximated_points(&self) -> &[Uv] {
        &self.approximated_points
    }

    /// States at uniform time spacing from start to end.
    pub fn interpolated_states(&self) -> &[State] {
        &self.interpolated_states
    }

    pub fn time_interval_between_interpolated_states(&self) -> f64 {
        self.interpolated_interval
    }

    fn refresh_points(&mut self) {
        let length = self.total_length();
        let count = (length * self.points_per_unit_length)
            .round()
            .min(MAX_RESAMPLED as f64) as usize
            + 1;
        self.approximated_points = (0..count)
            .map(|k| {
                let s = if count > 1 {
                    length * k as f64 / (count - 1) as f64
                } else {
                    0.0
                };
                self.location(self.time_at_length(s))
            })
            .collect();
    }

    fn refresh_states(&mut self) {
        let duration = self.duration();
        let count = ((duration * self.states_per_unit_length)
            .floor()
            .min(MAX_RESAMPLED as f64) as usize)
            .max(2);
        let interval = duration / (count - 1) as f64;
        let start = self.start_time();
        let end = self.end_time();
        self.interpolated_interval = interval;
        self.interpolated_states = (0..count)
            .map(|k| {
                let t = if k + 1 == count {
                    end
                } else {
                    start + interval * k as f64
                };
                self.state(t)
            })
            .collect();
    }
}

/// `value` samples per unit over `extent` units.
fn check_density(name: &'static str, value: f64, extent: f64) -> Result<f64, TrailError> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(TrailError::InvalidParameter {
            name,
            expected: "finite and non-negative",
            value,
        });
    }
    if value * extent > MAX_RESAMPLED as f64 {
        return Err(TrailError::InvalidParameter {
            name,
            expected: "small enough for at most 1e6 samples along the trail",
            value,
        });
    }
    Ok(value)
}

fn validate(times: &[f64], states: &[State], mode: TrailInputMode) -> Result<(), TrailError> {
    if times.len() != states.len() {
        return Err(TrailError::LengthMismatch {
            times: times.len(),
            states: states.len(),
        });
    }
    if times.len() < 2 {
        return Err(TrailError::TooFewSamples(times.len()));
    }
    for (index, (t, s)) in times.iter().zip(states.iter()).enumerate() {
        let finite = t.is_finite()
            && s.location.is_finite_uv()
            && s.direction.is_finite_uv()
            && s.velocity.map_or(true, |v| v.is_finite_uv());
        if !finite {
            return Err(TrailError::NonFinite { index });
        }
        if index > 0 && *t <= times[index - 1] {
            return Err(TrailError::NotAscending {
                index,
                previous: times[index - 1],
                current: *t,
            });
        }
        if mode.observes_velocity() && s.velocity.is_none() {
            return Err(TrailError::MissingVelocity { index, mode });
        }
        if mode.observes_direction() && s.direction == Uv::zeros() {
            return Err(TrailError::MissingDirection { index, mode });
        }
    }
    Ok(())
}

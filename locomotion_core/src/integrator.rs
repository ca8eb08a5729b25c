//! Locomotion integrator: advances one agent by a full animation timestep.
//!
//! # Per sub-step
//! 1. Refresh the destination when due (decision period elapsed, no
//!    destination, destination reached, or a barrier closer than body size)
//! 2. Steering direction = unit vector toward the destination
//! 3. Barrier repulsion, applied only while the agent faces the barrier
//! 4. a = AccelerationMagnitude · direction + repulsion
//! 5. v += a·dt, capped at VelocityMagnitude
//! 6. x += v·dt
//! 7. Facing turns toward the steering direction by at most ω·dt
//! 8. If the body now overlaps the barrier buffer (distance ≤ BodySize/2),
//!    roll back to the contact instant, bounce, and integrate the remainder
//!    as another sub-step. A remainder proportion above 1 means the move
//!    made no contact and the full step stands
//!
//! ## Collision response
//! With unit normal n (away from the barrier), contact velocity v and
//! acceleration a:
//! v_n = (v·n)n,  v_t = v − v_n
//! ve  = e·v_n
//! vf  = v_t − min(f·|v_n|, |v_t|)·v_t/|v_t|
//! v'  = vf − ve − dt_post·(a·n)n

use crate::collision::{BarrierSnapshot, CollisionService};
use crate::destination::{select_destination, SelectionParams};
use crate::geometry::rotate_toward;
use crate::grid::{CellGrid, EscapeRoutes};
use crate::repulsion::{BezierRepulsion, RepulsionMagnitude};
use crate::types::{State, Uv, UvExt};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Default animation timestep (seconds).
pub const DEFAULT_TIME_STEP: f64 = 0.02;

/// Distance the body is pushed off the barrier after a contact.
pub const COLLISION_PENALTY: f64 = 1e-3;

/// Slack on the contact parameter accepted from the collision service.
pub const COLLISION_TOLERANCE: f64 = 1e-9;

/// Collision sub-steps allowed within one call before the rest is dropped.
pub const MAX_SUB_STEPS: usize = 16;

/// Destination counts as reached below this squared distance.
const ARRIVAL_DISTANCE_SQ: f64 = 0.01;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Per-agent locomotion parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentParams {
    /// Steering acceleration toward the destination (m/s²)
    pub acceleration_magnitude: f64,
    /// Speed cap (m/s)
    pub velocity_magnitude: f64,
    /// Maximum turning rate of the facing (rad/s)
    pub angular_velocity: f64,
    /// Body diameter (m); the safety buffer is half of it
    pub body_size: f64,
    /// Distance at which barriers start to repel (m)
    pub barrier_repulsion_range: f64,
    /// Shape of the repulsion falloff in [0, 1]
    pub repulsion_change_rate: f64,
    /// Repulsion acceleration on contact with a barrier (m/s²)
    pub barrier_repulsion_strength: f64,
    /// Fraction of normal speed kept on a bounce, in [0, 1]
    pub body_elasticity: f64,
    /// Coulomb-style friction coefficient against barriers, in [0, 1]
    pub barrier_friction: f64,
    /// Destination choice model
    pub selection: SelectionParams,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            acceleration_magnitude: 10.0,
            velocity_magnitude: 2.5,
            angular_velocity: std::f64::consts::PI,
            body_size: 0.6,
            barrier_repulsion_range: 0.8,
            repulsion_change_rate: 0.6,
            barrier_repulsion_strength: 10.0,
            body_elasticity: 0.1,
            barrier_friction: 0.1,
            selection: SelectionParams::default(),
        }
    }
}

impl AgentParams {
    /// Repulsion falloff described by these parameters.
    pub fn repulsion(&self) -> BezierRepulsion {
        BezierRepulsion::new(
            self.barrier_repulsion_range,
            self.repulsion_change_rate,
            self.barrier_repulsion_strength,
        )
    }

    pub fn body_radius(&self) -> f64 {
        self.body_size / 2.0
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Destination table and the grid used to look cells up.
#[derive(Clone, Copy)]
pub struct DestinationTable<'a> {
    pub routes: &'a EscapeRoutes,
    pub grid: &'a (dyn CellGrid + Sync),
}

/// Read-only surroundings an agent is integrated against.
///
/// Without a destination table the agent keeps whatever destination it was
/// given. Without a repulsion profile the one from [`AgentParams`] is used.
#[derive(Clone, Copy)]
pub struct Environment<'a> {
    pub collision: &'a (dyn CollisionService + Sync),
    pub destinations: Option<DestinationTable<'a>>,
    pub repulsion: Option<&'a (dyn RepulsionMagnitude + Sync)>,
}

impl<'a> Environment<'a> {
    pub fn new(collision: &'a (dyn CollisionService + Sync)) -> Self {
        Self {
            collision,
            destinations: None,
            repulsion: None,
        }
    }

    pub fn with_destinations(
        mut self,
        routes: &'a EscapeRoutes,
        grid: &'a (dyn CellGrid + Sync),
    ) -> Self {
        self.destinations = Some(DestinationTable { routes, grid });
        self
    }

    pub fn with_repulsion(mut self, repulsion: &'a (dyn RepulsionMagnitude + Sync)) -> Self {
        self.repulsion = Some(repulsion);
        self
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Fatal integration failures; the current run must stop.
#[derive(Debug, Error, PartialEq)]
pub enum IntegrationError {
    #[error("time step must be finite and non-negative, got {0}")]
    InvalidTimeStep(f64),
    #[error("overlap at [{u}, {v}] (distance {distance}) has no collision resolution")]
    UnresolvedCollision { u: f64, v: f64, distance: f64 },
    #[error("collision service returned remainder proportion {0}")]
    MalformedResolution(f64),
    #[error("integration produced a non-finite state")]
    NonFiniteState,
}

/// How a sub-step ended.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SubStepKind {
    /// Whole remainder integrated without touching a barrier
    Free,
    /// Stopped at a barrier contact
    Contact { remainder_proportion: f64 },
    /// Sub-step limit hit; the remainder elapsed in place
    Stalled,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubStep {
    pub duration: f64,
    pub kind: SubStepKind,
}

/// Everything a renderer or recorder needs after one timestep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub state: State,
    pub destination: Option<Uv>,
    pub edge_collision_state: Option<BarrierSnapshot>,
    pub sub_steps: Vec<SubStep>,
    /// A barrier was in view and pushed the agent during this step
    pub repulsion_active: bool,
    pub destination_refreshed: bool,
}

impl StepReport {
    /// Sum of the sub-step durations; equals the requested timestep.
    pub fn consumed_time(&self) -> f64 {
        self.sub_steps.iter().map(|s| s.duration).sum()
    }

    pub fn collided(&self) -> bool {
        self.contacts() > 0
    }

    /// Number of barrier contacts resolved within the step.
    pub fn contacts(&self) -> usize {
        self.sub_steps
            .iter()
            .filter(|s| matches!(s.kind, SubStepKind::Contact { .. }))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Kinematics helpers
// ---------------------------------------------------------------------------

/// Scale `v` down to `cap` if it is faster.
pub fn clamp_speed(v: Uv, cap: f64) -> Uv {
    if v.norm() > cap {
        v.unitized() * cap
    } else {
        v
    }
}

/// Post-contact velocity for contact velocity `v`, acceleration `a`, unit
/// normal `normal` (away from the barrier) and post-contact time `post_dt`.
pub fn collision_response(
    v: &Uv,
    a: &Uv,
    normal: &Uv,
    post_dt: f64,
    elasticity: f64,
    friction: f64,
) -> Uv {
    let n = normal.unitized();
    let v_normal = n * v.dot(&n);
    let v_tangent = v - v_normal;
    let ve = v_normal * elasticity;

    let tangent_speed = v_tangent.norm();
    let vf = if tangent_speed > 0.0 {
        let loss = (friction * v_normal.norm()).min(tangent_speed);
        v_tangent - v_tangent * (loss / tangent_speed)
    } else {
        v_tangent
    };

    let a_normal = n * a.dot(&n);
    vf - ve - a_normal * post_dt
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// One pedestrian agent and its private integration state.
#[derive(Clone, Debug)]
pub struct Agent {
    pub params: AgentParams,
    pub state: State,
    pub destination: Option<Uv>,
    /// Nearest barrier at `state.location`, as of the last step
    pub edge_collision_state: Option<BarrierSnapshot>,
    /// Time walked toward the current destination
    pub walk_time: f64,
    /// Walk time after which a new destination is drawn
    pub decision_period: f64,
    rng: ChaCha8Rng,
}

impl Agent {
    pub fn new(params: AgentParams, state: State, seed: u64) -> Self {
        let decision_period = params.selection.decision_mean;
        Self {
            params,
            state,
            destination: None,
            edge_collision_state: None,
            walk_time: 0.0,
            decision_period,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn with_destination(mut self, destination: Uv) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Put the agent somewhere else and forget barrier and timer state.
    pub fn reset(&mut self, state: State, destination: Option<Uv>) {
        self.state = state;
        self.destination = destination;
        self.edge_collision_state = None;
        self.walk_time = 0.0;
        self.decision_period = self.params.selection.decision_mean;
    }

    /// Facing as an angle from the +u axis (radians).
    pub fn heading(&self) -> f64 {
        self.state.direction.y.atan2(self.state.direction.x)
    }

    fn needs_new_destination(&self) -> bool {
        let Some(destination) = self.destination else {
            return true;
        };
        if self.walk_time > self.decision_period {
            return true;
        }
        if (destination - self.state.location).norm_squared() < ARRIVAL_DISTANCE_SQ {
            return true;
        }
        self.edge_collision_state
            .is_some_and(|s| s.distance_to_barrier < self.params.body_size)
    }

    /// Draw a new destination; failures leave the current one in place.
    fn refresh_destination(&mut self, table: &DestinationTable<'_>) -> bool {
        match select_destination(
            &self.state,
            table.routes,
            table.grid,
            &self.params.selection,
            &mut self.rng,
        ) {
            Ok(Some(outcome)) => {
                debug!(
                    cell = %outcome.cell,
                    u = outcome.destination.x,
                    v = outcome.destination.y,
                    period = outcome.decision_period,
                    "new destination"
                );
                self.destination = Some(outcome.destination);
                self.walk_time = 0.0;
                self.decision_period = outcome.decision_period;
                true
            }
            Ok(None) => {
                debug!("no reachable cell; keeping destination");
                false
            }
            Err(err) => {
                warn!(error = %err, "destination selection failed; keeping destination");
                false
            }
        }
    }

    /// Repulsion acceleration and whether it was applied.
    fn repulsion_force(&self, env: &Environment<'_>) -> (Uv, bool) {
        let Some(snapshot) = &self.edge_collision_state else {
            return (Uv::zeros(), false);
        };
        if snapshot.normalized_repulsion.dot(&self.state.direction) >= 0.0 {
            return (Uv::zeros(), false);
        }
        let magnitude = match env.repulsion {
            Some(profile) => profile.magnitude(snapshot.distance_to_barrier),
            None => self.params.repulsion().magnitude(snapshot.distance_to_barrier),
        };
        (snapshot.normalized_repulsion * magnitude, true)
    }

    fn refresh_edge_state(&mut self, env: &Environment<'_>) {
        let stale = self
            .edge_collision_state
            .map_or(true, |s| s.location != self.state.location);
        if stale {
            self.edge_collision_state = env.collision.find_nearest_barrier(&self.state.location);
        }
    }

    /// Advance by a full timestep `h`, splitting it at barrier contacts.
    ///
    /// The exclusive borrow guarantees one step at a time per agent. Any
    /// error is fatal to the current run.
    pub fn time_step_update(
        &mut self,
        h: f64,
        env: &Environment<'_>,
    ) -> Result<StepReport, IntegrationError> {
        if !h.is_finite() || h < 0.0 {
            return Err(IntegrationError::InvalidTimeStep(h));
        }

        let radius = self.params.body_radius();
        let cap = self.params.velocity_magnitude;
        let mut remaining = h;
        let mut sub_steps = Vec::new();
        let mut contacts = 0usize;
        let mut repulsion_active = false;
        let mut destination_refreshed = false;

        self.refresh_edge_state(env);

        while remaining > 0.0 {
            if contacts >= MAX_SUB_STEPS {
                warn!(
                    remaining,
                    contacts, "collision sub-step limit reached; holding position"
                );
                self.walk_time += remaining;
                sub_steps.push(SubStep {
                    duration: remaining,
                    kind: SubStepKind::Stalled,
                });
                break;
            }

            let dt = remaining;

            if self.needs_new_destination() {
                if let Some(table) = &env.destinations {
                    destination_refreshed |= self.refresh_destination(table);
                }
            }

            let start = self.state;
            let direction = self
                .destination
                .map(|d| (d - start.location).unitized())
                .unwrap_or_else(Uv::zeros);

            let (repulsion, inside_range) = self.repulsion_force(env);
            repulsion_active |= inside_range;

            let acceleration = direction * self.params.acceleration_magnitude + repulsion;
            let v0 = start.velocity.unwrap_or_else(Uv::zeros);
            let v1 = clamp_speed(v0 + acceleration * dt, cap);
            let x1 = start.location + v1 * dt;
            let facing1 = rotate_toward(&start.direction, &direction, self.params.angular_velocity * dt);

            let snapshot = env.collision.find_nearest_barrier(&x1);
            let resolution = match snapshot.filter(|s| s.distance_to_barrier <= radius) {
                Some(overlap) => Some(
                    env.collision
                        .resolve_collision(&start.location, &x1, radius, COLLISION_TOLERANCE)
                        .ok_or(IntegrationError::UnresolvedCollision {
                            u: x1.x,
                            v: x1.y,
                            distance: overlap.distance_to_barrier,
                        })?,
                ),
                None => None,
            };
            if let Some(res) = resolution.filter(|res| res.time_step_remainder_proportion.is_nan()) {
                return Err(IntegrationError::MalformedResolution(
                    res.time_step_remainder_proportion,
                ));
            }

            // r > 1: the move overlaps a buffer without closing on it
            let Some(resolution) =
                resolution.filter(|res| res.time_step_remainder_proportion <= 1.0)
            else {
                let next = State::new(x1, facing1, Some(v1));
                ensure_finite(&next)?;
                self.state = next;
                self.edge_collision_state = snapshot;
                self.walk_time += dt;
                sub_steps.push(SubStep {
                    duration: dt,
                    kind: SubStepKind::Free,
                });
                break;
            };

            let r = resolution.time_step_remainder_proportion;
            let (pre, post) = if r <= 0.0 {
                (dt, 0.0)
            } else {
                ((1.0 - r) * dt, r * dt)
            };

            let v_contact = clamp_speed(v0 + acceleration * pre, cap);
            let normal = resolution.collision_normal.unitized();
            let v_bounce = clamp_speed(
                collision_response(
                    &v_contact,
                    &acceleration,
                    &normal,
                    post,
                    self.params.body_elasticity,
                    self.params.barrier_friction,
                ),
                cap,
            );
            let contact = if pre > 0.0 {
                resolution.collision_point
            } else {
                start.location
            };
            // Facing turns for the post-contact portion only
            let facing = rotate_toward(
                &start.direction,
                &direction,
                self.params.angular_velocity * post,
            );

            let next = State::new(contact + normal * COLLISION_PENALTY, facing, Some(v_bounce));
            ensure_finite(&next)?;
            debug!(
                remainder = r,
                pre,
                post,
                u = next.location.x,
                v = next.location.y,
                "barrier contact"
            );

            self.state = next;
            self.edge_collision_state = env.collision.find_nearest_barrier(&next.location);
            self.walk_time += pre;
            sub_steps.push(SubStep {
                duration: pre,
                kind: SubStepKind::Contact {
                    remainder_proportion: r,
                },
            });
            contacts += 1;
            remaining = post;
        }

        Ok(StepReport {
            state: self.state,
            destination: self.destination,
            edge_collision_state: self.edge_collision_state,
            sub_steps,
            repulsion_active,
            destination_refreshed,
        })
    }
}

fn ensure_finite(state: &State) -> Result<(), IntegrationError> {
    let velocity_ok = state.velocity.map_or(true, |v| v.is_finite_uv());
    if state.location.is_finite_uv() && state.direction.is_finite_uv() && velocity_ok {
        Ok(())
    } else {
        Err(IntegrationError::NonFiniteState)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{BarrierField, CollisionResolution};
    use crate::geometry::UvLine;
    use crate::grid::UniformCellGrid;
    use crate::types::{uv, CellDestination, CellIndex};
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always reports an overlap; the first resolution returns `remainder`,
    /// later ones report no contact.
    struct FixedRemainder {
        remainder: f64,
        point: Uv,
        resolutions: AtomicUsize,
    }

    impl FixedRemainder {
        fn new(remainder: f64, point: Uv) -> Self {
            Self {
                remainder,
                point,
                resolutions: AtomicUsize::new(0),
            }
        }
    }

    impl CollisionService for FixedRemainder {
        fn find_nearest_barrier(&self, location: &Uv) -> Option<BarrierSnapshot> {
            Some(BarrierSnapshot {
                location: *location,
                distance_to_barrier: 0.0,
                normalized_repulsion: uv(-1.0, 0.0),
                barrier: UvLine::new(uv(1.0, -1.0), uv(1.0, 1.0)),
                closest_point_on_barrier: uv(1.0, location.y),
            })
        }

        fn resolve_collision(
            &self,
            _prev: &Uv,
            _next: &Uv,
            _body_radius: f64,
            _tolerance: f64,
        ) -> Option<CollisionResolution> {
            let first = self.resolutions.fetch_add(1, Ordering::SeqCst) == 0;
            Some(CollisionResolution {
                time_step_remainder_proportion: if first { self.remainder } else { 2.0 },
                collision_point: self.point,
                collision_normal: uv(-1.0, 0.0),
            })
        }
    }

    /// Coasting at 1 m/s along +u with no steering force.
    fn coasting() -> Agent {
        let params = AgentParams {
            acceleration_magnitude: 0.0,
            body_elasticity: 0.5,
            barrier_friction: 0.0,
            ..no_repulsion()
        };
        let start = State::new(uv(0.0, 0.0), uv(1.0, 0.0), Some(uv(1.0, 0.0)));
        Agent::new(params, start, 12).with_destination(uv(10.0, 0.0))
    }

    fn still_at(x: f64, y: f64, facing: Uv) -> State {
        State::new(uv(x, y), facing, Some(Uv::zeros()))
    }

    fn no_repulsion() -> AgentParams {
        AgentParams {
            barrier_repulsion_strength: 0.0,
            ..Default::default()
        }
    }

    fn wall_at_x(x: f64) -> BarrierField {
        BarrierField::new(vec![UvLine::new(uv(x, -50.0), uv(x, 50.0))])
    }

    #[test]
    fn corridor_reaches_cruise_speed_without_drift() {
        let field = BarrierField::default();
        let env = Environment::new(&field);
        let mut agent = Agent::new(AgentParams::default(), still_at(0.0, 0.0, uv(1.0, 0.0)), 1)
            .with_destination(uv(10.0, 0.0));

        // 2.5 m/s at 10 m/s² takes 0.25 s
        for _ in 0..20 {
            agent.time_step_update(0.02, &env).unwrap();
        }
        let x_before = agent.state.location.x;
        for _ in 0..50 {
            let report = agent.time_step_update(0.02, &env).unwrap();
            assert!(!report.collided());
            assert!(report.state.speed() <= 2.5 + 1e-9);
        }
        let advanced = agent.state.location.x - x_before;
        assert_abs_diff_eq!(advanced, 2.5, epsilon = 1e-9);
        assert_eq!(agent.state.location.y, 0.0);
        assert_eq!(agent.state.direction, uv(1.0, 0.0));
    }

    #[test]
    fn speed_never_exceeds_cap() {
        let field = wall_at_x(3.0);
        let env = Environment::new(&field);
        let params = AgentParams {
            acceleration_magnitude: 40.0,
            ..Default::default()
        };
        let mut agent =
            Agent::new(params, still_at(0.0, 0.0, uv(1.0, 0.0)), 2).with_destination(uv(10.0, 1.0));
        for _ in 0..200 {
            let report = agent.time_step_update(0.02, &env).unwrap();
            assert!(report.state.speed() <= 2.5 + 1e-9);
        }
    }

    #[test]
    fn body_never_penetrates_buffer() {
        let field = wall_at_x(3.0);
        let env = Environment::new(&field);
        let params = AgentParams::default();
        let radius = params.body_radius();
        let mut agent =
            Agent::new(params, still_at(0.0, 0.0, uv(1.0, 0.0)), 3).with_destination(uv(10.0, 2.0));
        let mut contacts = 0;
        for _ in 0..300 {
            let report = agent.time_step_update(0.02, &env).unwrap();
            contacts += usize::from(report.collided());
            let d = field
                .find_nearest_barrier(&report.state.location)
                .unwrap()
                .distance_to_barrier;
            assert!(d >= radius - 1e-9, "penetrated: distance {d}");
        }
        assert!(contacts > 0, "scenario should hit the wall");
    }

    #[test]
    fn sub_steps_conserve_time() {
        let field = BarrierField::from_polygon(&[
            uv(-1.0, -1.0),
            uv(1.0, -1.0),
            uv(1.0, 1.0),
            uv(-1.0, 1.0),
        ]);
        let env = Environment::new(&field);
        let params = AgentParams {
            body_elasticity: 1.0,
            barrier_friction: 0.0,
            ..no_repulsion()
        };
        let start = State::new(uv(0.0, 0.0), uv(1.0, 0.0), Some(uv(2.5, 1.0)));
        let mut agent = Agent::new(params, start, 4).with_destination(uv(5.0, 3.0));
        for h in [0.02, 0.05, 0.1, 0.013] {
            for _ in 0..40 {
                let report = agent.time_step_update(h, &env).unwrap();
                assert_abs_diff_eq!(report.consumed_time(), h, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn elastic_bounce_reverses_normal_speed() {
        let field = wall_at_x(1.0);
        let env = Environment::new(&field);
        let params = AgentParams {
            acceleration_magnitude: 0.01,
            velocity_magnitude: 2.0,
            body_elasticity: 1.0,
            barrier_friction: 0.0,
            ..no_repulsion()
        };
        let start = State::new(uv(0.0, 0.0), uv(1.0, 0.0), Some(uv(2.0, 0.0)));
        let mut agent = Agent::new(params, start, 5).with_destination(uv(5.0, 0.0));

        // Contact at x = 0.7 happens during the 0.35 s mark
        let mut bounced = None;
        for _ in 0..30 {
            let report = agent.time_step_update(0.02, &env).unwrap();
            if report.collided() {
                bounced = Some(report);
                break;
            }
        }
        let report = bounced.expect("agent should reach the wall");
        let v = report.state.velocity.unwrap();
        assert_abs_diff_eq!(v.x, -2.0, epsilon = 1e-3);
        assert_abs_diff_eq!(v.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn inelastic_bounce_kills_normal_speed() {
        let field = wall_at_x(1.0);
        let env = Environment::new(&field);
        let params = AgentParams {
            acceleration_magnitude: 0.01,
            velocity_magnitude: 2.0,
            body_elasticity: 0.0,
            barrier_friction: 0.0,
            ..no_repulsion()
        };
        let start = State::new(uv(0.0, 0.0), uv(1.0, 0.0), Some(uv(2.0, 0.0)));
        let mut agent = Agent::new(params, start, 6).with_destination(uv(5.0, 0.0));
        let report = (0..30)
            .map(|_| agent.time_step_update(0.02, &env).unwrap())
            .find(|r| r.collided())
            .expect("agent should reach the wall");
        assert_abs_diff_eq!(report.state.velocity.unwrap().x, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn response_decomposition() {
        let n = uv(-1.0, 0.0);
        let v = uv(2.0, 1.0);
        // Elastic, frictionless: mirror
        let out = collision_response(&v, &Uv::zeros(), &n, 0.0, 1.0, 0.0);
        assert_abs_diff_eq!(out.x, -2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.y, 1.0, epsilon = 1e-12);
        // Friction capped by tangential speed
        let out = collision_response(&v, &Uv::zeros(), &n, 0.0, 0.0, 1.0);
        assert_abs_diff_eq!(out.norm(), 0.0, epsilon = 1e-12);
        let out = collision_response(&v, &Uv::zeros(), &n, 0.0, 0.0, 0.25);
        assert_abs_diff_eq!(out.y, 0.5, epsilon = 1e-12);
        // Pure normal hit: tangential part is zero and must not divide by zero
        let out = collision_response(&uv(2.0, 0.0), &Uv::zeros(), &n, 0.0, 0.5, 0.5);
        assert_abs_diff_eq!(out.x, -1.0, epsilon = 1e-12);
        assert!(out.is_finite_uv());
        // Normal acceleration over the post-contact time
        let out = collision_response(&uv(2.0, 0.0), &uv(10.0, 0.0), &n, 0.1, 0.0, 0.0);
        assert_abs_diff_eq!(out.x, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn repulsion_only_when_facing_barrier() {
        let field = wall_at_x(1.0);
        let env = Environment::new(&field);
        let mut toward = Agent::new(AgentParams::default(), still_at(0.5, 0.0, uv(1.0, 0.0)), 7)
            .with_destination(uv(0.5, 5.0));
        assert!(toward.time_step_update(0.02, &env).unwrap().repulsion_active);

        let mut away = Agent::new(AgentParams::default(), still_at(0.5, 0.0, uv(-1.0, 0.0)), 7)
            .with_destination(uv(0.5, 5.0));
        assert!(!away.time_step_update(0.02, &env).unwrap().repulsion_active);
    }

    #[test]
    fn destination_refresh_uses_table() {
        let field = BarrierField::default();
        let grid = UniformCellGrid::new(uv(0.0, 0.0), 1.0, 10, 10);
        let mut routes = EscapeRoutes::new();
        routes.insert(CellIndex::new(1, 1), vec![CellDestination::new(uv(8.0, 1.5), 0.0)]);
        let env = Environment::new(&field).with_destinations(&routes, &grid);

        let mut agent = Agent::new(AgentParams::default(), still_at(1.5, 1.5, uv(1.0, 0.0)), 8);
        let report = agent.time_step_update(0.02, &env).unwrap();
        assert!(report.destination_refreshed);
        assert_eq!(report.destination, Some(uv(8.0, 1.5)));
    }

    #[test]
    fn unreachable_table_keeps_destination() {
        let field = BarrierField::default();
        let grid = UniformCellGrid::new(uv(0.0, 0.0), 1.0, 10, 10);
        let routes = EscapeRoutes::new();
        let env = Environment::new(&field).with_destinations(&routes, &grid);
        let mut agent = Agent::new(AgentParams::default(), still_at(1.5, 1.5, uv(1.0, 0.0)), 9)
            .with_destination(uv(1.52, 1.5));
        let report = agent.time_step_update(0.02, &env).unwrap();
        assert!(!report.destination_refreshed);
        assert_eq!(report.destination, Some(uv(1.52, 1.5)));
    }

    #[test]
    fn invalid_time_step_is_fatal() {
        let field = BarrierField::default();
        let env = Environment::new(&field);
        let mut agent = Agent::new(AgentParams::default(), still_at(0.0, 0.0, uv(1.0, 0.0)), 10);
        assert!(matches!(
            agent.time_step_update(f64::NAN, &env),
            Err(IntegrationError::InvalidTimeStep(_))
        ));
        assert!(agent.time_step_update(-0.02, &env).is_err());
    }

    #[test]
    fn zero_time_step_is_a_noop() {
        let field = BarrierField::default();
        let env = Environment::new(&field);
        let start = still_at(1.0, 2.0, uv(1.0, 0.0));
        let mut agent = Agent::new(AgentParams::default(), start, 11).with_destination(uv(5.0, 2.0));
        let report = agent.time_step_update(0.0, &env).unwrap();
        assert_eq!(report.state, start);
        assert!(report.sub_steps.is_empty());
    }

    #[test]
    fn remainder_above_one_takes_the_full_step() {
        let service = FixedRemainder::new(2.0, uv(0.5, 0.0));
        let env = Environment::new(&service);
        let mut agent = coasting();
        let report = agent.time_step_update(0.02, &env).unwrap();

        assert_eq!(
            report.sub_steps,
            vec![SubStep {
                duration: 0.02,
                kind: SubStepKind::Free
            }]
        );
        assert!(!report.collided());
        assert_abs_diff_eq!(report.state.location.x, 0.02, epsilon = 1e-12);
        assert_eq!(report.state.velocity, Some(uv(1.0, 0.0)));
        assert_abs_diff_eq!(report.consumed_time(), 0.02, epsilon = 1e-12);
    }

    #[test]
    fn remainder_at_or_below_zero_consumes_the_step_before_contact() {
        for r in [0.0, -0.5] {
            let service = FixedRemainder::new(r, uv(0.015, 0.0));
            let env = Environment::new(&service);
            let mut agent = coasting();
            let report = agent.time_step_update(0.02, &env).unwrap();

            assert_eq!(
                report.sub_steps,
                vec![SubStep {
                    duration: 0.02,
                    kind: SubStepKind::Contact {
                        remainder_proportion: r
                    }
                }]
            );
            // Contact point nudged off the barrier, normal speed halved and reversed
            assert_abs_diff_eq!(
                report.state.location.x,
                0.015 - COLLISION_PENALTY,
                epsilon = 1e-12
            );
            let v = report.state.velocity.unwrap();
            assert_abs_diff_eq!(v.x, -0.5, epsilon = 1e-12);
            assert_abs_diff_eq!(v.y, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(report.consumed_time(), 0.02, epsilon = 1e-12);
        }
    }

    #[test]
    fn partial_remainder_splits_the_step() {
        let service = FixedRemainder::new(0.5, uv(0.01, 0.0));
        let env = Environment::new(&service);
        let mut agent = coasting();
        let report = agent.time_step_update(0.02, &env).unwrap();

        assert_eq!(report.sub_steps.len(), 2);
        assert_eq!(
            report.sub_steps[0].kind,
            SubStepKind::Contact {
                remainder_proportion: 0.5
            }
        );
        assert_abs_diff_eq!(report.sub_steps[0].duration, 0.01, epsilon = 1e-12);
        assert_eq!(report.sub_steps[1].kind, SubStepKind::Free);
        assert_abs_diff_eq!(report.sub_steps[1].duration, 0.01, epsilon = 1e-12);

        // Bounced at 0.01 - penalty, then 0.01 s at -0.5 m/s
        let expected = 0.01 - COLLISION_PENALTY - 0.5 * 0.01;
        assert_abs_diff_eq!(report.state.location.x, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(report.state.velocity.unwrap().x, -0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(report.consumed_time(), 0.02, epsilon = 1e-12);
    }

    #[test]
    fn nan_remainder_is_fatal() {
        let service = FixedRemainder::new(f64::NAN, uv(0.01, 0.0));
        let env = Environment::new(&service);
        let mut agent = coasting();
        assert!(matches!(
            agent.time_step_update(0.02, &env),
            Err(IntegrationError::MalformedResolution(_))
        ));
    }

    #[test]
    fn walks_away_from_a_wall_it_starts_next_to() {
        let field = wall_at_x(1.0);
        let env = Environment::new(&field);
        let start = State::new(uv(0.8, 0.0), uv(-1.0, 0.0), Some(uv(-1.0, 0.0)));
        let mut agent =
            Agent::new(AgentParams::default(), start, 13).with_destination(uv(-5.0, 0.0));

        let mut x = agent.state.location.x;
        for _ in 0..10 {
            let report = agent.time_step_update(0.02, &env).unwrap();
            assert!(!report.collided());
            assert_eq!(report.sub_steps.len(), 1);
            assert!(report.state.velocity.unwrap().x < 0.0);
            assert!(report.state.location.x < x - 0.02);
            x = report.state.location.x;
        }
    }
}

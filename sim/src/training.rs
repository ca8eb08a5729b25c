//! Parameter training against observed walking trails.
//!
//! # Fitness
//! For every trail, the agent is reset onto each interpolated state with its
//! destination set to where the trail will be `look_ahead` seconds later,
//! then integrated for one interpolation interval. The squared location and
//! (weighted) direction error against the next interpolated state is
//! averaged per trail and across trails. Lower is better.
//!
//! Trails are independent and evaluated in parallel with rayon; each one
//! gets its own agent (and RNG), the collision service is shared read-only.
//!
//! # Trials
//! [`run_trials`] evaluates candidate parameter sets in order and checks a
//! [`CancellationToken`] between evaluations, so a long search can be
//! aborted without leaving a half-evaluated trial behind.

use locomotion_core::{Agent, AgentParams, CollisionService, Environment, State, DEFAULT_TIME_STEP};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use walking_trail::WalkingTrail;

/// Fitness callback invoked once per trial by an optimizer.
pub trait Fitness {
    /// Parameters the next [`Fitness::evaluate`] uses.
    fn set_params(&mut self, params: AgentParams);
    fn evaluate(&mut self) -> f64;
    /// Simulated states produced by the last evaluation.
    fn last_trajectory(&self) -> &[State];
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Seconds ahead on the trail used as the agent's destination
    pub look_ahead: f64,
    /// Weight of the squared direction error relative to location error
    pub direction_weight: f64,
    /// Seed for the per-trail agents
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            look_ahead: 1.0,
            direction_weight: 1.0,
            seed: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared flag checked between fitness evaluations.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Trail fitness
// ---------------------------------------------------------------------------

pub struct TrailFitness<'a> {
    trails: &'a [WalkingTrail],
    collision: &'a (dyn CollisionService + Sync),
    pub params: AgentParams,
    pub config: TrainingConfig,
    trajectory: Vec<State>,
}

impl<'a> TrailFitness<'a> {
    pub fn new(
        trails: &'a [WalkingTrail],
        collision: &'a (dyn CollisionService + Sync),
        params: AgentParams,
        config: TrainingConfig,
    ) -> Self {
        Self {
            trails,
            collision,
            params,
            config,
            trajectory: Vec::new(),
        }
    }
}

impl Fitness for TrailFitness<'_> {
    fn set_params(&mut self, params: AgentParams) {
        self.params = params;
    }

    fn evaluate(&mut self) -> f64 {
        if self.trails.is_empty() {
            self.trajectory.clear();
            return 0.0;
        }
        let env = Environment::new(self.collision);
        let params = &self.params;
        let config = &self.config;
        let per_trail: Vec<(f64, Vec<State>)> = self
            .trails
            .par_iter()
            .enumerate()
            .map(|(i, trail)| {
                let seed = config.seed.wrapping_add(i as u64);
                trail_error(trail, params, &env, config, seed)
            })
            .collect();

        let total: f64 = per_trail.iter().map(|(e, _)| *e).sum();
        self.trajectory = per_trail.into_iter().flat_map(|(_, t)| t).collect();
        total / self.trails.len() as f64
    }

    fn last_trajectory(&self) -> &[State] {
        &self.trajectory
    }
}

/// Mean per-interval error along one trail and the simulated states.
fn trail_error(
    trail: &WalkingTrail,
    params: &AgentParams,
    env: &Environment<'_>,
    config: &TrainingConfig,
    seed: u64,
) -> (f64, Vec<State>) {
    let states = trail.interpolated_states();
    let interval = trail.time_interval_between_interpolated_states();
    let intervals = states.len() - 1;
    let sub_steps = (interval / DEFAULT_TIME_STEP).ceil().max(1.0) as usize;
    let h = interval / sub_steps as f64;

    let mut agent = Agent::new(params.clone(), states[0], seed);
    let mut trajectory = Vec::with_capacity(intervals);
    let mut error = 0.0;

    for k in 0..intervals {
        let t = trail.start_time() + interval * k as f64;
        agent.reset(states[k], Some(trail.location(t + config.look_ahead)));
        for _ in 0..sub_steps {
            if let Err(err) = agent.time_step_update(h, env) {
                warn!(error = %err, interval = k, "trail integration failed");
                return (f64::INFINITY, trajectory);
            }
        }
        let next = &states[k + 1];
        error += (agent.state.location - next.location).norm_squared()
            + config.direction_weight * (agent.state.direction - next.direction).norm_squared();
        trajectory.push(agent.state);
    }
    (error / intervals as f64, trajectory)
}

// ---------------------------------------------------------------------------
// Trials
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub index: usize,
    pub params: AgentParams,
    pub fitness: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub results: Vec<TrialResult>,
    /// Lowest finite fitness among the completed trials
    pub best: Option<TrialResult>,
    pub cancelled: bool,
}

/// Evaluate each candidate in turn until done or cancelled.
pub fn run_trials<F: Fitness + ?Sized>(
    fitness: &mut F,
    candidates: &[AgentParams],
    token: &CancellationToken,
) -> TrialSummary {
    let mut results = Vec::with_capacity(candidates.len());
    let mut cancelled = false;
    for (index, params) in candidates.iter().enumerate() {
        if token.is_cancelled() {
            info!(completed = index, total = candidates.len(), "training cancelled");
            cancelled = true;
            break;
        }
        fitness.set_params(params.clone());
        let value = fitness.evaluate();
        info!(trial = index, fitness = value, "trial evaluated");
        results.push(TrialResult {
            index,
            params: params.clone(),
            fitness: value,
        });
    }

    let best = results
        .iter()
        .filter(|r| r.fitness.is_finite())
        .min_by(|a, b| a.fitness.total_cmp(&b.fitness))
        .cloned();
    TrialSummary {
        results,
        best,
        cancelled,
    }
}

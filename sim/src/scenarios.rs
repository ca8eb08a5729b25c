//! Scenario definitions and the fixed-step run loop.
//!
//! Each scenario is a named floor (barriers, optional cell grid and
//! destination table) plus one agent's parameters and starting state.
//! All scenarios are deterministic given the same seed.

use crate::replay::{AgentFrame, ReplayLog};
use locomotion_core::{
    uv, Agent, AgentParams, BarrierField, CellDestination, CellIndex, Environment, EscapeRoutes,
    IntegrationError, State, StepReport, UniformCellGrid, Uv, UvLine, DEFAULT_TIME_STEP,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// Open 10-unit straight walk to a fixed destination
    Corridor,
    /// Head-on approach to a wall with a fully elastic body
    WallBounce,
    /// 20×20 walled room with per-cell escape routes
    Room,
}

/// A fully configured scenario.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub duration: f64, // seconds
    pub h: f64,        // nominal timestep
    pub params: AgentParams,
    pub start: State,
    pub destination: Option<Uv>,
    pub barriers: BarrierField,
    /// Grid and table for destination selection; without them the
    /// destination stays fixed.
    pub grid: Option<UniformCellGrid>,
    pub routes: EscapeRoutes,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::Corridor => Self::corridor(seed),
            ScenarioKind::WallBounce => Self::wall_bounce(seed),
            ScenarioKind::Room => Self::room(seed),
        }
    }

    /// Environment borrowing this scenario's floor.
    pub fn environment(&self) -> Environment<'_> {
        let env = Environment::new(&self.barriers);
        match &self.grid {
            Some(grid) => env.with_destinations(&self.routes, grid),
            None => env,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 1: Corridor
    // -----------------------------------------------------------------------
    fn corridor(seed: u64) -> Self {
        Scenario {
            name: "corridor".into(),
            seed,
            duration: 3.0,
            h: DEFAULT_TIME_STEP,
            params: AgentParams {
                acceleration_magnitude: 10.0,
                velocity_magnitude: 2.5,
                ..Default::default()
            },
            start: at_rest(uv(0.0, 0.0), uv(1.0, 0.0)),
            destination: Some(uv(10.0, 0.0)),
            barriers: BarrierField::default(),
            grid: None,
            routes: EscapeRoutes::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 2: Wall bounce
    // -----------------------------------------------------------------------
    fn wall_bounce(seed: u64) -> Self {
        Scenario {
            name: "wall_bounce".into(),
            seed,
            duration: 5.0,
            h: DEFAULT_TIME_STEP,
            params: AgentParams {
                body_elasticity: 1.0,
                barrier_friction: 0.0,
                barrier_repulsion_strength: 0.0,
                ..Default::default()
            },
            start: at_rest(uv(0.0, 0.0), uv(1.0, 0.0)),
            destination: Some(uv(10.0, 0.0)),
            barriers: BarrierField::new(vec![UvLine::new(uv(5.0, -5.0), uv(5.0, 5.0))]),
            grid: None,
            routes: EscapeRoutes::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 3: Room with escape routes
    // -----------------------------------------------------------------------
    fn room(seed: u64) -> Self {
        let size = 20.0;
        let grid = UniformCellGrid::new(Uv::zeros(), 1.0, 20, 20);
        let exits = [
            (uv(2.0, 2.0), 0.4),
            (uv(18.0, 2.0), 0.1),
            (uv(18.0, 18.0), 0.7),
            (uv(2.0, 18.0), 0.2),
            (uv(10.0, 10.0), 0.5),
        ];
        let mut routes = EscapeRoutes::new();
        for i in 0..grid.columns {
            for j in 0..grid.rows {
                let dests = exits
                    .iter()
                    .map(|(p, cost)| CellDestination::new(*p, *cost))
                    .collect();
                routes.insert(CellIndex::new(i, j), dests);
            }
        }

        Scenario {
            name: "room".into(),
            seed,
            duration: 30.0,
            h: DEFAULT_TIME_STEP,
            params: AgentParams::default(),
            start: at_rest(uv(10.0, 10.0), uv(1.0, 0.0)),
            destination: None,
            barriers: BarrierField::from_polygon(&[
                uv(0.0, 0.0),
                uv(size, 0.0),
                uv(size, size),
                uv(0.0, size),
            ]),
            grid: Some(grid),
            routes,
        }
    }
}

fn at_rest(location: Uv, facing: Uv) -> State {
    State::new(location, facing, Some(Uv::zeros()))
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    #[error("simulation was stopped by an earlier failure")]
    Stopped,
    #[error(transparent)]
    Integration(#[from] IntegrationError),
}

/// One agent stepping through a scenario.
///
/// A fatal integration error stops the simulation for good; frames recorded
/// up to that point stay available.
pub struct Simulation<'s> {
    scenario: &'s Scenario,
    pub agent: Agent,
    pub time: f64,
    pub frames: Vec<AgentFrame>,
    stopped: bool,
}

impl<'s> Simulation<'s> {
    pub fn new(scenario: &'s Scenario) -> Self {
        let mut agent = Agent::new(scenario.params.clone(), scenario.start, scenario.seed);
        agent.destination = scenario.destination;
        Self {
            scenario,
            agent,
            time: 0.0,
            frames: Vec::new(),
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Advance by `h` and record a frame.
    pub fn step(&mut self, h: f64) -> Result<StepReport, SimError> {
        if self.stopped {
            return Err(SimError::Stopped);
        }
        let scenario = self.scenario;
        let env = scenario.environment();
        let report = match self.agent.time_step_update(h, &env) {
            Ok(report) => report,
            Err(err) => {
                error!(scenario = %scenario.name, time = self.time, error = %err, "run aborted");
                self.stopped = true;
                return Err(err.into());
            }
        };
        self.time += h;
        self.frames.push(AgentFrame {
            time: self.time,
            state: report.state,
            destination: report.destination,
            contacts: report.contacts(),
        });
        Ok(report)
    }

    /// Step at the scenario's nominal `h` until its duration is covered.
    pub fn run(&mut self) -> Result<(), SimError> {
        let h = self.scenario.h;
        let steps = (self.scenario.duration / h).round() as usize;
        let start = std::time::Instant::now();
        for _ in 0..steps {
            self.step(h)?;
        }
        info!(
            scenario = %self.scenario.name,
            steps,
            contacts = self.frames.iter().map(|f| f.contacts).sum::<usize>(),
            elapsed_s = start.elapsed().as_secs_f64(),
            "run finished"
        );
        Ok(())
    }

    /// Frames recorded so far as a replay log.
    pub fn replay(&self) -> ReplayLog {
        ReplayLog {
            scenario_name: self.scenario.name.clone(),
            seed: self.scenario.seed,
            h: self.scenario.h,
            duration: self.time,
            frames: self.frames.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn frame_at<'a>(sim: &'a Simulation<'_>, t: f64) -> &'a AgentFrame {
        sim.frames
            .iter()
            .min_by(|a, b| (a.time - t).abs().total_cmp(&(b.time - t).abs()))
            .unwrap()
    }

    #[test]
    fn corridor_walks_at_the_velocity_cap() {
        let scenario = Scenario::build(ScenarioKind::Corridor, 1);
        let mut sim = Simulation::new(&scenario);
        sim.run().unwrap();
        assert_eq!(sim.frames.len(), 150);

        let a = frame_at(&sim, 1.0).state.location;
        let b = frame_at(&sim, 2.0).state.location;
        assert_abs_diff_eq!(b.x - a.x, 2.5, epsilon = 1e-9);
        for f in &sim.frames {
            assert_eq!(f.state.location.y, 0.0);
            assert_eq!(f.contacts, 0);
        }
    }

    #[test]
    fn wall_bounce_reverses_without_penetrating() {
        let scenario = Scenario::build(ScenarioKind::WallBounce, 1);
        let radius = scenario.params.body_radius();
        let mut sim = Simulation::new(&scenario);
        sim.run().unwrap();

        let log = sim.replay();
        assert!(log.total_contacts() > 0);
        assert!(log
            .frames
            .iter()
            .any(|f| f.state.velocity.is_some_and(|v| v.x < 0.0)));
        for f in &log.frames {
            assert!(f.state.location.x <= 5.0 - radius + 1e-6);
        }
    }

    #[test]
    fn room_run_stays_inside_and_picks_destinations() {
        let scenario = Scenario::build(ScenarioKind::Room, 9);
        let mut sim = Simulation::new(&scenario);
        sim.run().unwrap();

        let mut destinations: Vec<Uv> = Vec::new();
        for f in &sim.frames {
            let p = f.state.location;
            assert!(p.x > 0.0 && p.x < 20.0 && p.y > 0.0 && p.y < 20.0);
            if let Some(d) = f.destination {
                if !destinations.contains(&d) {
                    destinations.push(d);
                }
            }
        }
        assert!(!destinations.is_empty());
    }

    #[test]
    fn same_seed_same_run() {
        let scenario = Scenario::build(ScenarioKind::Room, 4);
        let mut a = Simulation::new(&scenario);
        let mut b = Simulation::new(&scenario);
        for _ in 0..200 {
            a.step(scenario.h).unwrap();
            b.step(scenario.h).unwrap();
        }
        assert_eq!(a.frames, b.frames);
    }

    #[test]
    fn fatal_error_stops_the_run() {
        let scenario = Scenario::build(ScenarioKind::Corridor, 1);
        let mut sim = Simulation::new(&scenario);
        sim.step(0.02).unwrap();
        assert!(matches!(
            sim.step(f64::NAN),
            Err(SimError::Integration(IntegrationError::InvalidTimeStep(_)))
        ));
        assert!(sim.is_stopped());
        assert_eq!(sim.step(0.02), Err(SimError::Stopped));
        assert_eq!(sim.frames.len(), 1);
    }
}

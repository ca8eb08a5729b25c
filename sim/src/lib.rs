//! `sim` — Scenario runner: agent scenarios, animation clock, replay, training.

pub mod clock;
pub mod replay;
pub mod scenarios;
pub mod training;

pub use clock::AnimationClock;
pub use replay::{load_replay, save_replay, AgentFrame, ReplayLog};
pub use scenarios::{Scenario, ScenarioKind, SimError, Simulation};
pub use training::{
    run_trials, CancellationToken, Fitness, TrailFitness, TrainingConfig, TrialResult, TrialSummary,
};

//! `locomotion_core` — Pedestrian agent locomotion on a cellular floor.
//!
//! # Module layout
//! - [`types`]       — Vectors, kinematic state, cell indices, destinations
//! - [`geometry`]    — Line segments and rate-limited facing rotation
//! - [`collision`]   — Barrier proximity / contact resolution service
//! - [`repulsion`]   — Distance-based barrier repulsion falloff
//! - [`grid`]        — Cell lookup and per-cell destination tables
//! - [`destination`] — Weighted-random destination selection
//! - [`integrator`]  — Per-timestep steering, integration and collision response

pub mod collision;
pub mod destination;
pub mod geometry;
pub mod grid;
pub mod integrator;
pub mod repulsion;
pub mod types;

pub use collision::{BarrierField, BarrierSnapshot, CollisionResolution, CollisionService};
pub use destination::{select_destination, SelectionError, SelectionOutcome, SelectionParams};
pub use geometry::UvLine;
pub use grid::{CellGrid, EscapeRoutes, UniformCellGrid};
pub use integrator::{
    Agent, AgentParams, Environment, IntegrationError, StepReport, SubStep, SubStepKind,
    DEFAULT_TIME_STEP,
};
pub use repulsion::{BezierRepulsion, RepulsionMagnitude};
pub use types::{uv, CellDestination, CellIndex, State, Uv, UvExt};

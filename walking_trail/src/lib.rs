//! `walking_trail` — Spline reconstruction of observed pedestrian trails.
//!
//! - [`spline`] — natural cubic, monotone cubic and linear interpolants
//! - [`trail`]  — `WalkingTrail`: fitting, blended queries, resampling caches
//! - [`text`]   — line-oriented text import/export
//! - [`sketch`] — incremental hand-drawn polyline capture

pub mod sketch;
pub mod spline;
pub mod text;
pub mod trail;

pub use sketch::PolylineSketch;
pub use text::parse_state;
pub use trail::{TrailError, TrailInputMode, WalkingTrail};

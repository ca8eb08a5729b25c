//! Wall-clock driven timestep source for interactive runs.
//!
//! A frame timer calls [`AnimationClock::tick`] with the current time; the
//! returned delta is what the integrator should advance by. Long stalls
//! (window drags, debugger pauses) are capped at `h_max` so a single step
//! never tunnels through a barrier buffer.

use locomotion_core::DEFAULT_TIME_STEP;

#[derive(Clone, Debug)]
pub struct AnimationClock {
    pub h_max: f64,
    last: Option<f64>,
}

impl Default for AnimationClock {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl AnimationClock {
    pub fn new(h_max: f64) -> Self {
        Self { h_max, last: None }
    }

    /// Timestep for a frame at `now` (seconds).
    ///
    /// The first tick has no reference and yields the default step. A clock
    /// that went backwards yields `h_max`.
    pub fn tick(&mut self, now: f64) -> f64 {
        let h = match self.last {
            None => DEFAULT_TIME_STEP.min(self.h_max),
            Some(prev) => {
                let delta = now - prev;
                if delta < 0.0 || !delta.is_finite() {
                    self.h_max
                } else {
                    delta.min(self.h_max)
                }
            }
        };
        self.last = Some(now);
        h
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

//! Replay: serialize/deserialize agent runs for offline analysis and playback.

use locomotion_core::{State, Uv};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A full recorded run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayLog {
    pub scenario_name: String,
    pub seed: u64,
    /// Nominal timestep
    pub h: f64,
    pub duration: f64,
    /// Agent state after each step, in chronological order
    pub frames: Vec<AgentFrame>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentFrame {
    pub time: f64,
    pub state: State,
    pub destination: Option<Uv>,
    /// Number of barrier contacts resolved within the step
    pub contacts: usize,
}

impl ReplayLog {
    /// Walked path length, summed over consecutive frames.
    pub fn path_length(&self) -> f64 {
        self.frames
            .windows(2)
            .map(|w| (w[1].state.location - w[0].state.location).norm())
            .sum()
    }

    pub fn total_contacts(&self) -> usize {
        self.frames.iter().map(|f| f.contacts).sum()
    }
}

/// Save a replay log to a JSON file.
pub fn save_replay(log: &ReplayLog, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, log)?;
    Ok(())
}

/// Load a replay log from a JSON file.
pub fn load_replay(path: &Path) -> anyhow::Result<ReplayLog> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let log: ReplayLog = serde_json::from_reader(reader)?;
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use locomotion_core::uv;

    fn frame(time: f64, x: f64, contacts: usize) -> AgentFrame {
        AgentFrame {
            time,
            state: State::new(uv(x, 0.0), uv(1.0, 0.0), Some(uv(2.0, 0.0))),
            destination: Some(uv(10.0, 0.0)),
            contacts,
        }
    }

    #[test]
    fn save_and_load() {
        let log = ReplayLog {
            scenario_name: "corridor".into(),
            seed: 3,
            h: 0.02,
            duration: 0.04,
            frames: vec![frame(0.02, 0.0, 0), frame(0.04, 0.5, 1), frame(0.06, 1.25, 2)],
        };
        assert_eq!(log.total_contacts(), 3);
        assert_abs_diff_eq!(log.path_length(), 1.25, epsilon = 1e-12);

        let path = std::env::temp_dir().join(format!("replay_{}.json", std::process::id()));
        save_replay(&log, &path).unwrap();
        let back = load_replay(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, log);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_replay(Path::new("/nonexistent/replay.json")).is_err());
    }
}

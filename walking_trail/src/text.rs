//! Line-oriented text format for recorded trails.
//!
//! ```text
//! # lines starting with '#' are comments
//! 2
//! 0
//! Location:[0,0]; Velocity:null; Direction: [1,0]
//! 1.5
//! Location:[3,0]; Velocity:null; Direction: [1,0]
//! ```
//!
//! The first non-comment line is the [`TrailInputMode`] code, followed by
//! alternating time and state lines. Numbers are written in their shortest
//! round-trip form, so a written trail reads back to the same samples.

use locomotion_core::{uv, State, Uv};

use crate::trail::{TrailError, TrailInputMode, WalkingTrail};

impl WalkingTrail {
    pub fn to_string_representation(&self) -> String {
        let mut out = String::new();
        out.push_str("# walking trail: input mode, then time / state pairs\n");
        out.push_str(&format!("{}\n", self.mode().code()));
        for (t, s) in self.observation_times().iter().zip(self.observed_states()) {
            out.push_str(&format!("{t}\n{s}\n"));
        }
        out
    }

    pub fn from_string_representation(text: &str) -> Result<Self, TrailError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

        let (line, code) = lines.next().ok_or(TrailError::Parse {
            line: 0,
            message: "missing input mode".into(),
        })?;
        let mode = code
            .parse::<u8>()
            .ok()
            .and_then(TrailInputMode::from_code)
            .ok_or_else(|| TrailError::Parse {
                line,
                message: format!("unknown input mode '{code}'"),
            })?;

        let mut times = Vec::new();
        let mut states = Vec::new();
        while let Some((line, time)) = lines.next() {
            let t = time.parse::<f64>().map_err(|_| TrailError::Parse {
                line,
                message: format!("expected a time, found '{time}'"),
            })?;
            let (line, state) = lines.next().ok_or(TrailError::Parse {
                line,
                message: "time without a state line".into(),
            })?;
            times.push(t);
            states.push(parse_state(state).map_err(|message| TrailError::Parse { line, message })?);
        }

        WalkingTrail::new(&times, &states, mode)
    }
}

/// Parse `Location:[u,v]; Velocity:[u,v]|null; Direction: [u,v]`.
///
/// Fields may come in any order. Location is required; a missing direction
/// reads as zero and a missing velocity as `None`.
pub fn parse_state(text: &str) -> Result<State, String> {
    let mut location = None;
    let mut direction = Uv::zeros();
    let mut velocity = None;
    for field in text.split(';').map(str::trim).filter(|f| !f.is_empty()) {
        let (key, value) = field
            .split_once(':')
            .ok_or_else(|| format!("field '{field}' has no ':'"))?;
        let value = value.trim();
        match key.trim() {
            "Location" => location = Some(parse_uv(value)?),
            "Direction" => direction = parse_uv(value)?,
            "Velocity" if value == "null" => velocity = None,
            "Velocity" => velocity = Some(parse_uv(value)?),
            other => return Err(format!("unknown field '{other}'")),
        }
    }
    let location = location.ok_or("state has no Location")?;
    Ok(State::new(location, direction, velocity))
}

fn parse_uv(text: &str) -> Result<Uv, String> {
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| format!("expected [u,v], found '{text}'"))?;
    let (u, v) = inner
        .split_once(',')
        .ok_or_else(|| format!("expected [u,v], found '{text}'"))?;
    let num = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|e| format!("bad number '{}': {e}", s.trim()))
    };
    Ok(uv(num(u)?, num(v)?))
}

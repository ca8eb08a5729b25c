//! Destination selection: pick the next waypoint from the per-cell table.
//!
//! # Procedure
//! 1. Find the agent's cell. If it has no entry, scan a 5×5 block around it
//!    for the best cell that does (see [`fallback_cell`]).
//! 2. Keep destinations inside the forward visibility cone; if none remain,
//!    keep all of them.
//! 3. Weight each candidate with a two-term exponential mixture over the
//!    angle cost `(cosθ + 1) / 2` and the precomputed desirability cost.
//! 4. Roulette-wheel draw.
//! 5. Draw the next decision period from `Exp(1 / λ_decision)`.

use crate::grid::{CellGrid, EscapeRoutes};
use crate::types::{CellDestination, CellIndex, State, Uv, UvExt};
use rand::Rng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Half-width of the fallback neighbourhood (5×5 block).
const NEIGHBORHOOD_RADIUS: i32 = 2;

/// Parameters of the destination choice model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionParams {
    /// Full opening angle of the forward visibility cone (radians)
    pub visibility_angle: f64,
    /// λ of the angle term
    pub angle_weight: f64,
    /// λ of the desirability term
    pub desirability_weight: f64,
    /// Mean time between spontaneous destination changes (seconds)
    pub decision_mean: f64,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            visibility_angle: 160f64.to_radians(),
            angle_weight: 1.0,
            desirability_weight: 1.0,
            decision_mean: 3.0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("destination weights are degenerate (total {0})")]
    DegenerateWeights(f64),
    #[error("decision period mean must be positive, got {0}")]
    InvalidDecisionMean(f64),
}

/// A successful draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionOutcome {
    pub destination: Uv,
    /// Time until the next spontaneous refresh
    pub decision_period: f64,
    /// Cell whose table was used
    pub cell: CellIndex,
}

/// Mixture weight of one candidate.
pub fn destination_weight(angle_cost: f64, desirability_cost: f64, params: &SelectionParams) -> f64 {
    let la = params.angle_weight;
    let ld = params.desirability_weight;
    la * (-la * angle_cost).exp() + ld * (-ld * desirability_cost).exp()
}

/// Normalised angle cost `(cosθ + 1) / 2` between the facing and the
/// direction to `destination`.
pub fn angle_cost(state: &State, destination: &Uv) -> f64 {
    let to_dest = (destination - state.location).unitized();
    (to_dest.dot(&state.direction) + 1.0) / 2.0
}

/// Best neighbouring cell with destinations when the agent's own cell has none.
///
/// Only offsets with `i != 0 && j != 0` are scanned, which leaves out the
/// row and column through the centre. Candidates ahead of the agent come
/// first, then nearer ones, then lower indices.
pub fn fallback_cell<G: CellGrid + ?Sized>(
    state: &State,
    center: CellIndex,
    routes: &EscapeRoutes,
    grid: &G,
) -> Option<CellIndex> {
    let mut candidates: Vec<(bool, f64, CellIndex)> = Vec::new();
    for i in -NEIGHBORHOOD_RADIUS..=NEIGHBORHOOD_RADIUS {
        for j in -NEIGHBORHOOD_RADIUS..=NEIGHBORHOOD_RADIUS {
            if !(i != 0 && j != 0) {
                continue;
            }
            let index = center.offset(i, j);
            let has_routes = routes.get(&index).is_some_and(|d| !d.is_empty());
            if !has_routes {
                continue;
            }
            let Some(cell_center) = grid.cell_center(&index) else {
                continue;
            };
            let offset = cell_center - state.location;
            let behind = offset.unitized().dot(&state.direction) < 0.0;
            candidates.push((behind, offset.norm(), index));
        }
    }
    candidates
        .into_iter()
        .min_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
                .then_with(|| a.2.cmp(&b.2))
        })
        .map(|(_, _, index)| index)
}

/// Candidate list for the agent's current location, if any cell is reachable.
pub fn candidate_destinations<'a, G: CellGrid + ?Sized>(
    state: &State,
    routes: &'a EscapeRoutes,
    grid: &G,
) -> Option<(CellIndex, &'a [CellDestination])> {
    let own = grid.cell_at(&state.location)?;
    let cell = match routes.get(&own) {
        Some(list) if !list.is_empty() => own,
        _ => fallback_cell(state, own, routes, grid)?,
    };
    routes.get(&cell).map(|list| (cell, list.as_slice()))
}

/// Roulette-wheel choice over `weights`; returns the chosen index.
pub fn roulette<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Result<usize, SelectionError> {
    let total: f64 = weights.iter().sum();
    if weights.is_empty() || !total.is_finite() || total <= 0.0 {
        return Err(SelectionError::DegenerateWeights(total));
    }
    let pick = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if pick < cumulative {
            return Ok(i);
        }
    }
    Ok(weights.len() - 1)
}

/// Draw a new destination for `state`.
///
/// `Ok(None)` means no reachable cell was found; the caller keeps its
/// current destination.
pub fn select_destination<G, R>(
    state: &State,
    routes: &EscapeRoutes,
    grid: &G,
    params: &SelectionParams,
    rng: &mut R,
) -> Result<Option<SelectionOutcome>, SelectionError>
where
    G: CellGrid + ?Sized,
    R: Rng + ?Sized,
{
    let Some((cell, all)) = candidate_destinations(state, routes, grid) else {
        return Ok(None);
    };

    let min_cos = (params.visibility_angle / 2.0).cos();
    let visible: Vec<&CellDestination> = all
        .iter()
        .filter(|d| (d.destination - state.location).unitized().dot(&state.direction) >= min_cos)
        .collect();
    let candidates: Vec<&CellDestination> = if visible.is_empty() {
        all.iter().collect()
    } else {
        visible
    };

    let weights: Vec<f64> = candidates
        .iter()
        .map(|d| destination_weight(angle_cost(state, &d.destination), d.desirability_cost, params))
        .collect();
    let chosen = candidates[roulette(&weights, rng)?];

    if !(params.decision_mean > 0.0) {
        return Err(SelectionError::InvalidDecisionMean(params.decision_mean));
    }
    let exp = Exp::new(1.0 / params.decision_mean)
        .map_err(|_| SelectionError::InvalidDecisionMean(params.decision_mean))?;

    Ok(Some(SelectionOutcome {
        destination: chosen.destination,
        decision_period: exp.sample(rng),
        cell,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::UniformCellGrid;
    use crate::types::uv;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn grid() -> UniformCellGrid {
        UniformCellGrid::new(uv(0.0, 0.0), 1.0, 20, 20)
    }

    fn facing_east_at(x: f64, y: f64) -> State {
        State::new(uv(x, y), uv(1.0, 0.0), Some(Uv::zeros()))
    }

    #[test]
    fn own_cell_is_used_first() {
        let mut routes = EscapeRoutes::new();
        routes.insert(CellIndex::new(5, 5), vec![CellDestination::new(uv(9.0, 5.5), 0.0)]);
        let state = facing_east_at(5.5, 5.5);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let out = select_destination(&state, &routes, &grid(), &SelectionParams::default(), &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(out.cell, CellIndex::new(5, 5));
        assert_eq!(out.destination, uv(9.0, 5.5));
        assert!(out.decision_period > 0.0);
    }

    #[test]
    fn fallback_skips_axis_neighbours() {
        let mut routes = EscapeRoutes::new();
        // Directly east: excluded by the i != 0 && j != 0 filter
        routes.insert(CellIndex::new(6, 5), vec![CellDestination::new(uv(9.0, 5.5), 0.0)]);
        let state = facing_east_at(5.5, 5.5);
        assert_eq!(fallback_cell(&state, CellIndex::new(5, 5), &routes, &grid()), None);

        // Diagonal neighbours: the one ahead wins over the nearer one behind
        routes.insert(CellIndex::new(4, 4), vec![CellDestination::new(uv(1.0, 1.0), 0.0)]);
        routes.insert(CellIndex::new(7, 7), vec![CellDestination::new(uv(9.0, 9.0), 0.0)]);
        assert_eq!(
            fallback_cell(&state, CellIndex::new(5, 5), &routes, &grid()),
            Some(CellIndex::new(7, 7))
        );
        routes.insert(CellIndex::new(6, 6), vec![CellDestination::new(uv(9.0, 9.0), 0.0)]);
        assert_eq!(
            fallback_cell(&state, CellIndex::new(5, 5), &routes, &grid()),
            Some(CellIndex::new(6, 6))
        );
    }

    #[test]
    fn unreachable_cell_is_a_noop() {
        let routes = EscapeRoutes::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let state = facing_east_at(5.5, 5.5);
        let out = select_destination(&state, &routes, &grid(), &SelectionParams::default(), &mut rng);
        assert_eq!(out, Ok(None));
        let off_floor = facing_east_at(-3.0, 0.0);
        let out = select_destination(&off_floor, &routes, &grid(), &SelectionParams::default(), &mut rng);
        assert_eq!(out, Ok(None));
    }

    #[test]
    fn visibility_cone_filters_and_falls_back() {
        let mut routes = EscapeRoutes::new();
        routes.insert(
            CellIndex::new(5, 5),
            vec![
                CellDestination::new(uv(9.0, 5.5), 0.0),
                CellDestination::new(uv(1.0, 5.5), 0.0),
            ],
        );
        let state = facing_east_at(5.5, 5.5);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..50 {
            let out = select_destination(&state, &routes, &grid(), &SelectionParams::default(), &mut rng)
                .unwrap()
                .unwrap();
            assert_eq!(out.destination, uv(9.0, 5.5));
        }

        // Only a destination behind: fall back to the unfiltered list
        routes.insert(CellIndex::new(5, 5), vec![CellDestination::new(uv(1.0, 5.5), 0.0)]);
        let out = select_destination(&state, &routes, &grid(), &SelectionParams::default(), &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(out.destination, uv(1.0, 5.5));
    }

    #[test]
    fn sampling_frequency_matches_weights() {
        let params = SelectionParams {
            visibility_angle: 1.5 * std::f64::consts::PI,
            angle_weight: 2.0,
            desirability_weight: 0.5,
            decision_mean: 1.0,
        };
        let ahead = CellDestination::new(uv(6.5, 5.5), 0.2);
        let side = CellDestination::new(uv(5.5, 6.5), 1.5);
        let mut routes = EscapeRoutes::new();
        routes.insert(CellIndex::new(5, 5), vec![ahead, side]);
        let state = facing_east_at(5.5, 5.5);

        let w1 = destination_weight(1.0, ahead.desirability_cost, &params);
        let w2 = destination_weight(0.5, side.desirability_cost, &params);
        let expected = w1 / (w1 + w2);

        for seed in [7u64, 11, 13] {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let n = 20_000;
            let hits = (0..n)
                .filter(|_| {
                    select_destination(&state, &routes, &grid(), &params, &mut rng)
                        .unwrap()
                        .unwrap()
                        .destination
                        == ahead.destination
                })
                .count();
            let freq = hits as f64 / n as f64;
            assert!(
                (freq - expected).abs() < 0.02,
                "seed {seed}: frequency {freq} vs expected {expected}"
            );
        }
    }

    #[test]
    fn roulette_rejects_zero_weights() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(roulette(&[0.0, 0.0], &mut rng).is_err());
        assert!(roulette(&[], &mut rng).is_err());
        assert_eq!(roulette(&[0.0, 1.0], &mut rng), Ok(1));
    }

    #[test]
    fn invalid_decision_mean_is_reported() {
        let mut routes = EscapeRoutes::new();
        routes.insert(CellIndex::new(5, 5), vec![CellDestination::new(uv(9.0, 5.5), 0.0)]);
        let params = SelectionParams {
            decision_mean: 0.0,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = select_destination(&facing_east_at(5.5, 5.5), &routes, &grid(), &params, &mut rng);
        assert_eq!(out, Err(SelectionError::InvalidDecisionMean(0.0)));
    }
}

use crate::simulation_engine::grid::Grid;
use crate::simulation_engine::vehicles::Direction;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How a car picks among several candidate cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LaneChoice {
    Uniform,
    /// Busier lanes are proportionally more likely.
    TrafficBased,
}

/// Picks one of `candidates`, or `None` if there are none.
pub fn pick_location<R: Rng>(
    grid: &Grid,
    candidates: &[(usize, usize)],
    direction: Direction,
    choice: LaneChoice,
    rng: &mut R,
) -> Option<(usize, usize)> {
    if candidates.is_empty() {
        return None;
    }
    let index = match choice {
        LaneChoice::Uniform => rng.random_range(0..candidates.len()),
        LaneChoice::TrafficBased => traffic_weighted_index(grid, candidates, direction, rng),
    };
    Some(candidates[index])
}

/// Weights every candidate by the occupancy of its lane and samples one.
/// With no traffic anywhere all weights are zero and the choice is uniform.
fn traffic_weighted_index<R: Rng>(
    grid: &Grid,
    candidates: &[(usize, usize)],
    direction: Direction,
    rng: &mut R,
) -> usize {
    let weights: Vec<f64> = candidates
        .iter()
        .map(|&(x, y)| grid.lane_traffic(direction, x, y) as f64)
        .collect();
    match WeightedIndex::new(&weights) {
        Ok(distribution) => distribution.sample(rng),
        Err(_) => rng.random_range(0..candidates.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::simulation_engine::grid::{CellFilter, Position};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn three_lane_grid() -> Grid {
        let config = SimulationConfig {
            size_of_lane: 9,
            num_horizontal_lanes: 3,
            num_horizontal_cars: 5,
            ..Default::default()
        };
        let mut rng = SmallRng::seed_from_u64(3);
        Grid::new(&config, &mut rng).unwrap()
    }

    #[test]
    fn empty_candidates_pick_nothing() {
        let grid = three_lane_grid();
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(
            pick_location(&grid, &[], Direction::Horizontal, LaneChoice::Uniform, &mut rng),
            None
        );
    }

    #[test]
    fn uniform_choice_reaches_every_candidate() {
        let grid = three_lane_grid();
        let candidates = grid.candidate_cells(Direction::Horizontal, 0, CellFilter::Open);
        let mut rng = SmallRng::seed_from_u64(2);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let picked = pick_location(
                &grid,
                &candidates,
                Direction::Horizontal,
                LaneChoice::Uniform,
                &mut rng,
            )
            .unwrap();
            assert!(candidates.contains(&picked));
            seen.insert(picked);
        }
        assert_eq!(seen.len(), candidates.len());
    }

    #[test]
    fn traffic_based_choice_follows_lane_occupancy() {
        let mut grid = three_lane_grid();
        // Lane row 3 carries all the traffic; rows 4 and 5 are empty.
        for y in 2..5 {
            let car = grid.pull_from_in_root(Direction::Horizontal).unwrap();
            grid.place_car(car, Position::Cell(3, y));
        }
        let candidates = grid.candidate_cells(Direction::Horizontal, 0, CellFilter::Open);
        let mut rng = SmallRng::seed_from_u64(4);
        for _ in 0..100 {
            let picked = pick_location(
                &grid,
                &candidates,
                Direction::Horizontal,
                LaneChoice::TrafficBased,
                &mut rng,
            );
            assert_eq!(picked, Some((3, 0)));
        }
    }

    #[test]
    fn traffic_based_choice_without_traffic_is_uniform() {
        let grid = three_lane_grid();
        let candidates = grid.candidate_cells(Direction::Horizontal, 0, CellFilter::Open);
        let mut rng = SmallRng::seed_from_u64(5);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(
                pick_location(
                    &grid,
                    &candidates,
                    Direction::Horizontal,
                    LaneChoice::TrafficBased,
                    &mut rng,
                )
                .unwrap(),
            );
        }
        assert_eq!(seen.len(), 3);
    }
}

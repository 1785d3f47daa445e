use crate::config::SimulationConfig;
use crate::error::ConfigurationError;
use crate::simulation_engine::sampling::SpeedModel;
use crate::simulation_engine::vehicles::{Car, CarId, Direction};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

/// Tag of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationState {
    Empty,
    Intersection,
    Lane,
    Parking,
    Accident,
    Crosswalk,
}

/// Which cells a candidate search keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellFilter {
    /// Drivable and holding no cars.
    Open,
    /// Holding at least one car, and not blocked by an accident.
    Occupied,
    Any,
}

/// One grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub x: usize,
    pub y: usize,
    pub state: LocationState,
    pub cars: BTreeMap<CarId, Car>,
}

impl Location {
    fn new(x: usize, y: usize) -> Self {
        Self {
            x,
            y,
            state: LocationState::Empty,
            cars: BTreeMap::new(),
        }
    }

    /// A drivable cell with nobody on it.
    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
            && matches!(
                self.state,
                LocationState::Lane | LocationState::Intersection | LocationState::Crosswalk
            )
    }

    /// Cars may only pull over into parking from plain lane or crosswalk cells.
    pub fn permits_parking_exit(&self) -> bool {
        matches!(self.state, LocationState::Lane | LocationState::Crosswalk)
    }

    pub fn matches(&self, filter: CellFilter) -> bool {
        match filter {
            CellFilter::Open => self.is_empty(),
            CellFilter::Occupied => {
                !self.cars.is_empty() && self.state != LocationState::Accident
            }
            CellFilter::Any => true,
        }
    }
}

/// Where a car currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    Cell(usize, usize),
    InRoot(Direction),
    OutRoot(Direction),
}

/// Returns the inclusive index range of `count` lanes centred on the grid midpoint.
///
/// Even counts shift the window one to the left so it stays centred without fractional
/// indices. `None` when there are no lanes.
pub fn lane_range(count: usize, size: usize) -> Option<RangeInclusive<usize>> {
    if count == 0 || size == 0 {
        return None;
    }
    let mid = size / 2;
    let half = count / 2;
    let low = mid.saturating_sub(half);
    let high = if count % 2 == 0 { mid + half - 1 } else { mid + half };
    Some(low..=high.min(size - 1))
}

/// The square matrix of cells plus the four flow roots.
#[derive(Debug, Clone)]
pub struct Grid {
    size: usize,
    horizontal_band: Option<RangeInclusive<usize>>,
    vertical_band: Option<RangeInclusive<usize>>,
    /// Indexed `cells[x][y]`; `x` is the row.
    cells: Vec<Vec<Location>>,
    in_roots: [BTreeMap<CarId, Car>; 2],
    out_roots: [BTreeMap<CarId, Car>; 2],
    positions: HashMap<CarId, Position>,
}

impl Grid {
    /// Builds the grid, tags lanes, intersections and parking, and fills the in-flow roots.
    pub fn new<R: Rng>(config: &SimulationConfig, rng: &mut R) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let size = config.size_of_lane;
        let horizontal_band = lane_range(config.num_horizontal_lanes, size);
        let vertical_band = lane_range(config.num_vertical_lanes, size);

        let mut cells: Vec<Vec<Location>> = (0..size)
            .map(|x| (0..size).map(|y| Location::new(x, y)).collect())
            .collect();

        // Horizontal lanes are rows.
        if let Some(band) = &horizontal_band {
            for x in band.clone() {
                for cell in cells[x].iter_mut() {
                    cell.state = LocationState::Lane;
                }
            }
        }
        // Vertical lanes are columns; crossing a horizontal lane makes an intersection.
        if let Some(band) = &vertical_band {
            for row in cells.iter_mut() {
                for y in band.clone() {
                    row[y].state = if row[y].state == LocationState::Lane {
                        LocationState::Intersection
                    } else {
                        LocationState::Lane
                    };
                }
            }
        }

        let mut grid = Self {
            size,
            horizontal_band,
            vertical_band,
            cells,
            in_roots: [BTreeMap::new(), BTreeMap::new()],
            out_roots: [BTreeMap::new(), BTreeMap::new()],
            positions: HashMap::new(),
        };

        if config.parking_enabled {
            grid.add_parking();
        }

        let speeds = SpeedModel::from_config(config);
        for direction in Direction::BOTH {
            if grid.band(direction).is_none() {
                continue;
            }
            for number in 0..grid_car_count(config, direction) {
                let id = CarId { direction, number };
                let speed = speeds.sample(rng).value;
                grid.place_car(Car::new(id, speed, config.car_movement_p), Position::InRoot(direction));
            }
        }

        Ok(grid)
    }

    /// Parking sits one step past the far edge of each lane band.
    fn add_parking(&mut self) {
        let size = self.size;
        if let Some(row) = self.horizontal_band.as_ref().map(|band| *band.end() + 1) {
            if row < size {
                for y in 0..size {
                    self.mark_parking(row, y);
                }
            }
        }
        if let Some(column) = self.vertical_band.as_ref().map(|band| *band.end() + 1) {
            if column < size {
                for x in 0..size {
                    self.mark_parking(x, column);
                }
            }
        }
    }

    fn mark_parking(&mut self, x: usize, y: usize) {
        let cell = &mut self.cells[x][y];
        if !matches!(cell.state, LocationState::Lane | LocationState::Intersection) {
            cell.state = LocationState::Parking;
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn band(&self, direction: Direction) -> Option<&RangeInclusive<usize>> {
        match direction {
            Direction::Horizontal => self.horizontal_band.as_ref(),
            Direction::Vertical => self.vertical_band.as_ref(),
        }
    }

    pub fn location(&self, x: usize, y: usize) -> &Location {
        &self.cells[x][y]
    }

    pub fn rows(&self) -> &[Vec<Location>] {
        &self.cells
    }

    pub fn in_root(&self, direction: Direction) -> &BTreeMap<CarId, Car> {
        &self.in_roots[direction.index()]
    }

    pub fn out_root(&self, direction: Direction) -> &BTreeMap<CarId, Car> {
        &self.out_roots[direction.index()]
    }

    pub fn set_state(&mut self, x: usize, y: usize, state: LocationState) {
        self.cells[x][y].state = state;
    }

    /// Cells of one cross-section of `direction`'s lane band.
    ///
    /// For horizontal traffic `axis_index` is a column and one cell per lane row is
    /// considered; for vertical traffic it is a row.
    pub fn candidate_cells(
        &self,
        direction: Direction,
        axis_index: usize,
        filter: CellFilter,
    ) -> Vec<(usize, usize)> {
        let Some(band) = self.band(direction) else {
            return Vec::new();
        };
        if axis_index >= self.size {
            return Vec::new();
        }
        band.clone()
            .map(|lane| match direction {
                Direction::Horizontal => (lane, axis_index),
                Direction::Vertical => (axis_index, lane),
            })
            .filter(|&(x, y)| self.cells[x][y].matches(filter))
            .collect()
    }

    /// The cell straight ahead, or `None` at the far edge.
    pub fn next_straight(&self, direction: Direction, x: usize, y: usize) -> Option<(usize, usize)> {
        match direction {
            Direction::Horizontal if y + 1 < self.size => Some((x, y + 1)),
            Direction::Vertical if x + 1 < self.size => Some((x + 1, y)),
            _ => None,
        }
    }

    /// Index of the next cross-section along `direction`, or `None` at the far edge.
    pub fn downstream_index(&self, direction: Direction, x: usize, y: usize) -> Option<usize> {
        let along = match direction {
            Direction::Horizontal => y,
            Direction::Vertical => x,
        };
        (along + 1 < self.size).then_some(along + 1)
    }

    /// The parking cell beside `(x, y)` for a car travelling in `direction`.
    pub fn parking_cell_for(&self, direction: Direction, x: usize, y: usize) -> Option<(usize, usize)> {
        let edge = *self.band(direction)?.end() + 1;
        let cell = match direction {
            Direction::Horizontal => (edge, y),
            Direction::Vertical => (x, edge),
        };
        (edge < self.size && self.cells[cell.0][cell.1].state == LocationState::Parking)
            .then_some(cell)
    }

    /// Traffic on the lane through `(x, y)`: occupied cells along the whole lane.
    pub fn lane_traffic(&self, direction: Direction, x: usize, y: usize) -> usize {
        match direction {
            Direction::Horizontal => self.cells[x].iter().filter(|cell| !cell.cars.is_empty()).count(),
            Direction::Vertical => self.cells.iter().filter(|row| !row[y].cars.is_empty()).count(),
        }
    }

    /// One plus the number of occupied orthogonal neighbours of `(x, y)`.
    pub fn occupied_nearby(&self, x: usize, y: usize) -> usize {
        let mut neighbours = Vec::with_capacity(4);
        if x + 1 < self.size {
            neighbours.push((x + 1, y));
        }
        if x > 0 {
            neighbours.push((x - 1, y));
        }
        if y + 1 < self.size {
            neighbours.push((x, y + 1));
        }
        if y > 0 {
            neighbours.push((x, y - 1));
        }
        1 + neighbours
            .into_iter()
            .filter(|&(nx, ny)| !self.cells[nx][ny].cars.is_empty())
            .count()
    }

    pub fn position_of(&self, id: CarId) -> Option<Position> {
        self.positions.get(&id).copied()
    }

    pub fn car(&self, id: CarId) -> Option<&Car> {
        match self.position_of(id)? {
            Position::Cell(x, y) => self.cells[x][y].cars.get(&id),
            Position::InRoot(d) => self.in_roots[d.index()].get(&id),
            Position::OutRoot(d) => self.out_roots[d.index()].get(&id),
        }
    }

    pub fn car_mut(&mut self, id: CarId) -> Option<&mut Car> {
        match self.position_of(id)? {
            Position::Cell(x, y) => self.cells[x][y].cars.get_mut(&id),
            Position::InRoot(d) => self.in_roots[d.index()].get_mut(&id),
            Position::OutRoot(d) => self.out_roots[d.index()].get_mut(&id),
        }
    }

    /// Removes a car from whichever container owns it.
    pub fn take_car(&mut self, id: CarId) -> Option<Car> {
        let position = self.positions.remove(&id)?;
        let container = self.container_mut(position);
        container.remove(&id)
    }

    /// Hands a car to a new owner. The car must not be owned by anything else.
    pub fn place_car(&mut self, mut car: Car, position: Position) {
        car.position = match position {
            Position::Cell(x, y) => Some((x, y)),
            Position::InRoot(_) | Position::OutRoot(_) => None,
        };
        let id = car.id;
        self.positions.insert(id, position);
        self.container_mut(position).insert(id, car);
    }

    /// Pulls any waiting car out of an in-flow root.
    pub fn pull_from_in_root(&mut self, direction: Direction) -> Option<Car> {
        let (id, car) = self.in_roots[direction.index()].pop_first()?;
        self.positions.remove(&id);
        Some(car)
    }

    fn container_mut(&mut self, position: Position) -> &mut BTreeMap<CarId, Car> {
        match position {
            Position::Cell(x, y) => &mut self.cells[x][y].cars,
            Position::InRoot(d) => &mut self.in_roots[d.index()],
            Position::OutRoot(d) => &mut self.out_roots[d.index()],
        }
    }

    /// Opens a crosswalk across the lane band next to a parking cell once it is full enough.
    /// Returns how many cells flipped.
    pub fn open_crosswalk_if_needed(
        &mut self,
        parking: (usize, usize),
        direction: Direction,
        cutoff: usize,
    ) -> usize {
        if self.cells[parking.0][parking.1].cars.len() < cutoff {
            return 0;
        }
        self.flip_crossing(parking, direction, LocationState::Lane, LocationState::Crosswalk)
    }

    /// Closes the crosswalk again once the parking cell drops below the cutoff.
    pub fn close_crosswalk_if_needed(
        &mut self,
        parking: (usize, usize),
        direction: Direction,
        cutoff: usize,
    ) -> usize {
        if self.cells[parking.0][parking.1].cars.len() >= cutoff {
            return 0;
        }
        self.flip_crossing(parking, direction, LocationState::Crosswalk, LocationState::Lane)
    }

    fn flip_crossing(
        &mut self,
        parking: (usize, usize),
        direction: Direction,
        from: LocationState,
        to: LocationState,
    ) -> usize {
        let axis_index = match direction {
            Direction::Horizontal => parking.1,
            Direction::Vertical => parking.0,
        };
        let mut flipped = 0;
        for (x, y) in self.candidate_cells(direction, axis_index, CellFilter::Any) {
            if self.cells[x][y].state == from {
                self.cells[x][y].state = to;
                flipped += 1;
            }
        }
        flipped
    }

    /// Total number of cars across every cell and root.
    pub fn car_count(&self) -> usize {
        let on_grid: usize = self.cells.iter().flatten().map(|cell| cell.cars.len()).sum();
        let in_roots: usize = self.in_roots.iter().map(BTreeMap::len).sum();
        let out_roots: usize = self.out_roots.iter().map(BTreeMap::len).sum();
        on_grid + in_roots + out_roots
    }

    /// Checks that every car is owned by exactly the container its position says.
    pub fn ownership_is_consistent(&self) -> bool {
        if self.car_count() != self.positions.len() {
            return false;
        }
        self.positions.iter().all(|(&id, &position)| {
            let owned = match position {
                Position::Cell(x, y) => self.cells[x][y].cars.get(&id),
                Position::InRoot(d) => self.in_roots[d.index()].get(&id),
                Position::OutRoot(d) => self.out_roots[d.index()].get(&id),
            };
            owned.is_some_and(|car| {
                car.position
                    == match position {
                        Position::Cell(x, y) => Some((x, y)),
                        _ => None,
                    }
            })
        })
    }
}

/// Cars a direction contributes; a direction without lanes contributes none.
pub fn grid_car_count(config: &SimulationConfig, direction: Direction) -> usize {
    match direction {
        Direction::Horizontal if config.num_horizontal_lanes > 0 => config.num_horizontal_cars,
        Direction::Vertical if config.num_vertical_lanes > 0 => config.num_vertical_cars,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn grid(config: &SimulationConfig) -> Grid {
        let mut rng = SmallRng::seed_from_u64(11);
        Grid::new(config, &mut rng).unwrap()
    }

    #[test]
    fn lane_range_has_exact_count_and_stays_centred() {
        for size in 3..40 {
            for count in 1..size {
                let range = lane_range(count, size).unwrap();
                assert_eq!(range.clone().count(), count, "size {size} count {count}");
                assert!(*range.end() < size);
                let midpoint = (*range.start() + *range.end()) as f64 / 2.0;
                assert!(
                    ((size / 2) as f64 - midpoint).abs() <= 1.0,
                    "size {size} count {count} midpoint {midpoint}"
                );
            }
        }
    }

    #[test]
    fn lane_range_examples() {
        assert_eq!(lane_range(1, 10), Some(5..=5));
        assert_eq!(lane_range(2, 10), Some(4..=5));
        assert_eq!(lane_range(2, 9), Some(3..=4));
        assert_eq!(lane_range(4, 10), Some(3..=6));
        assert_eq!(lane_range(3, 10), Some(4..=6));
        assert_eq!(lane_range(0, 10), None);
    }

    #[test]
    fn construction_rejects_bad_geometry() {
        let mut rng = SmallRng::seed_from_u64(1);
        let config = SimulationConfig {
            size_of_lane: 2,
            ..Default::default()
        };
        assert_eq!(
            Grid::new(&config, &mut rng).unwrap_err(),
            ConfigurationError::GridTooSmall(2)
        );
    }

    #[test]
    fn tags_lanes_and_intersections() {
        let config = SimulationConfig {
            size_of_lane: 7,
            num_horizontal_lanes: 1,
            num_vertical_lanes: 2,
            ..Default::default()
        };
        let grid = grid(&config);
        // Horizontal band is row 3; vertical band is columns 2..=3.
        assert_eq!(grid.location(3, 0).state, LocationState::Lane);
        assert_eq!(grid.location(3, 2).state, LocationState::Intersection);
        assert_eq!(grid.location(3, 3).state, LocationState::Intersection);
        assert_eq!(grid.location(0, 2).state, LocationState::Lane);
        assert_eq!(grid.location(0, 0).state, LocationState::Empty);
        assert_eq!(grid.location(6, 6).state, LocationState::Empty);
    }

    #[test]
    fn parking_sits_past_each_band_and_skips_lanes() {
        let config = SimulationConfig {
            size_of_lane: 7,
            parking_enabled: true,
            ..Default::default()
        };
        let grid = grid(&config);
        // Both bands are index 3, so parking is row 4 and column 4.
        assert_eq!(grid.location(4, 0).state, LocationState::Parking);
        assert_eq!(grid.location(0, 4).state, LocationState::Parking);
        assert_eq!(grid.location(4, 3).state, LocationState::Lane);
        assert_eq!(grid.location(3, 4).state, LocationState::Lane);
        assert_eq!(grid.parking_cell_for(Direction::Horizontal, 3, 1), Some((4, 1)));
        assert_eq!(grid.parking_cell_for(Direction::Vertical, 1, 3), Some((1, 4)));
        // The parking row crosses the vertical lane, so there is no spot there.
        assert_eq!(grid.parking_cell_for(Direction::Horizontal, 3, 3), None);
    }

    #[test]
    fn no_parking_unless_enabled() {
        let grid = grid(&SimulationConfig {
            size_of_lane: 7,
            ..Default::default()
        });
        assert!(grid
            .rows()
            .iter()
            .flatten()
            .all(|cell| cell.state != LocationState::Parking));
    }

    #[test]
    fn in_roots_hold_configured_cars() {
        let config = SimulationConfig {
            num_horizontal_cars: 4,
            num_vertical_cars: 6,
            ..Default::default()
        };
        let grid = grid(&config);
        assert_eq!(grid.in_root(Direction::Horizontal).len(), 4);
        assert_eq!(grid.in_root(Direction::Vertical).len(), 6);
        assert!(grid.ownership_is_consistent());
    }

    #[test]
    fn direction_without_lanes_gets_no_cars() {
        let config = SimulationConfig {
            num_vertical_lanes: 0,
            ..Default::default()
        };
        let grid = grid(&config);
        assert!(grid.in_root(Direction::Vertical).is_empty());
        assert!(grid
            .candidate_cells(Direction::Vertical, 0, CellFilter::Any)
            .is_empty());
    }

    #[test]
    fn candidate_filters() {
        let config = SimulationConfig {
            size_of_lane: 9,
            num_horizontal_lanes: 3,
            ..Default::default()
        };
        let mut grid = grid(&config);
        assert_eq!(
            grid.candidate_cells(Direction::Horizontal, 0, CellFilter::Open),
            vec![(3, 0), (4, 0), (5, 0)]
        );

        let car = grid.pull_from_in_root(Direction::Horizontal).unwrap();
        grid.place_car(car, Position::Cell(4, 0));
        assert_eq!(
            grid.candidate_cells(Direction::Horizontal, 0, CellFilter::Open),
            vec![(3, 0), (5, 0)]
        );
        assert_eq!(
            grid.candidate_cells(Direction::Horizontal, 0, CellFilter::Occupied),
            vec![(4, 0)]
        );

        grid.set_state(4, 0, LocationState::Accident);
        assert!(grid
            .candidate_cells(Direction::Horizontal, 0, CellFilter::Occupied)
            .is_empty());
        assert_eq!(
            grid.candidate_cells(Direction::Horizontal, 0, CellFilter::Any).len(),
            3
        );
    }

    #[test]
    fn moving_a_car_keeps_single_owner() {
        let mut grid = grid(&SimulationConfig::default());
        let car = grid.pull_from_in_root(Direction::Horizontal).unwrap();
        let id = car.id;
        grid.place_car(car, Position::Cell(5, 0));
        assert_eq!(grid.position_of(id), Some(Position::Cell(5, 0)));
        assert_eq!(grid.car(id).unwrap().position, Some((5, 0)));

        let car = grid.take_car(id).unwrap();
        grid.place_car(car, Position::Cell(5, 1));
        assert!(grid.location(5, 0).cars.is_empty());
        assert!(grid.location(5, 1).cars.contains_key(&id));
        assert!(grid.ownership_is_consistent());
        assert_eq!(grid.car_count(), 20);
    }

    #[test]
    fn next_cells_and_edges() {
        let grid = grid(&SimulationConfig::default());
        assert_eq!(grid.next_straight(Direction::Horizontal, 5, 3), Some((5, 4)));
        assert_eq!(grid.next_straight(Direction::Horizontal, 5, 9), None);
        assert_eq!(grid.next_straight(Direction::Vertical, 3, 5), Some((4, 5)));
        assert_eq!(grid.next_straight(Direction::Vertical, 9, 5), None);
        assert_eq!(grid.downstream_index(Direction::Vertical, 3, 5), Some(4));
        assert_eq!(grid.downstream_index(Direction::Horizontal, 5, 9), None);
    }

    #[test]
    fn nearby_count_starts_at_one() {
        let mut grid = grid(&SimulationConfig::default());
        assert_eq!(grid.occupied_nearby(5, 5), 1);
        let car = grid.pull_from_in_root(Direction::Horizontal).unwrap();
        grid.place_car(car, Position::Cell(5, 4));
        let car = grid.pull_from_in_root(Direction::Vertical).unwrap();
        grid.place_car(car, Position::Cell(4, 5));
        assert_eq!(grid.occupied_nearby(5, 5), 3);
        assert_eq!(grid.occupied_nearby(0, 0), 1);
    }

    #[test]
    fn lane_traffic_counts_the_whole_lane() {
        let mut grid = grid(&SimulationConfig::default());
        for y in [0, 3, 7] {
            let car = grid.pull_from_in_root(Direction::Horizontal).unwrap();
            grid.place_car(car, Position::Cell(5, y));
        }
        assert_eq!(grid.lane_traffic(Direction::Horizontal, 5, 0), 3);
        assert_eq!(grid.lane_traffic(Direction::Vertical, 0, 5), 0);
    }

    #[test]
    fn crosswalk_opens_and_closes_with_parking_occupancy() {
        let config = SimulationConfig {
            size_of_lane: 7,
            num_horizontal_lanes: 2,
            parking_enabled: true,
            cross_walk_cutoff: 2,
            ..Default::default()
        };
        let mut grid = grid(&config);
        // Horizontal band rows 2..=3, parking row 4; vertical band column 3.
        let parking = grid.parking_cell_for(Direction::Horizontal, 3, 1).unwrap();
        assert_eq!(parking, (4, 1));

        let first = grid.pull_from_in_root(Direction::Horizontal).unwrap();
        let first_id = first.id;
        grid.place_car(first, Position::Cell(4, 1));
        assert_eq!(grid.open_crosswalk_if_needed(parking, Direction::Horizontal, 2), 0);

        let second = grid.pull_from_in_root(Direction::Horizontal).unwrap();
        grid.place_car(second, Position::Cell(4, 1));
        assert_eq!(grid.open_crosswalk_if_needed(parking, Direction::Horizontal, 2), 2);
        assert_eq!(grid.location(2, 1).state, LocationState::Crosswalk);
        assert_eq!(grid.location(3, 1).state, LocationState::Crosswalk);
        assert_eq!(grid.location(3, 0).state, LocationState::Lane);

        assert_eq!(grid.close_crosswalk_if_needed(parking, Direction::Horizontal, 2), 0);
        grid.take_car(first_id).unwrap();
        assert_eq!(grid.close_crosswalk_if_needed(parking, Direction::Horizontal, 2), 2);
        assert_eq!(grid.location(2, 1).state, LocationState::Lane);
    }
}

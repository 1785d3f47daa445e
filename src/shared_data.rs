// src/shared_data.rs
//
// Read-only views handed out of the dispatch loop.
use crate::simulation_engine::grid::{Grid, LocationState};
use crate::simulation_engine::vehicles::{Car, CarId, CarState, Direction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const CELL_WIDTH: usize = 8;

/// One cell of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellView {
    pub state: LocationState,
    /// Occupant ids, sorted.
    pub cars: Vec<String>,
}

/// A point-in-time copy of the whole grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridView {
    pub size: usize,
    /// Indexed `cells[x][y]`, same as the grid.
    pub cells: Vec<Vec<CellView>>,
    pub in_horizontal: Vec<String>,
    pub in_vertical: Vec<String>,
    pub out_horizontal: Vec<String>,
    pub out_vertical: Vec<String>,
    pub accidents: usize,
    pub running: bool,
}

impl GridView {
    pub fn capture(grid: &Grid, accidents: usize, running: bool) -> Self {
        let cells = grid
            .rows()
            .iter()
            .map(|row| {
                row.iter()
                    .map(|location| CellView {
                        state: location.state,
                        cars: location.cars.keys().map(|id| id.to_string()).collect(),
                    })
                    .collect()
            })
            .collect();
        Self {
            size: grid.size(),
            cells,
            in_horizontal: root_ids(grid.in_root(Direction::Horizontal)),
            in_vertical: root_ids(grid.in_root(Direction::Vertical)),
            out_horizontal: root_ids(grid.out_root(Direction::Horizontal)),
            out_vertical: root_ids(grid.out_root(Direction::Vertical)),
            accidents,
            running,
        }
    }

    pub fn cell(&self, x: usize, y: usize) -> &CellView {
        &self.cells[x][y]
    }

    /// Number of cells currently carrying `state`.
    pub fn count_state(&self, state: LocationState) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|cell| cell.state == state)
            .count()
    }

    pub fn cars_on_grid(&self) -> usize {
        self.cells.iter().flatten().map(|cell| cell.cars.len()).sum()
    }
}

fn root_ids(cars: &BTreeMap<CarId, Car>) -> Vec<String> {
    cars.keys().map(CarId::to_string).collect()
}

fn pad(text: &str, fill: char) -> String {
    let mut padded = String::from(text);
    while padded.chars().count() < CELL_WIDTH {
        padded.push(fill);
    }
    padded
}

impl fmt::Display for GridView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "-".repeat(20))?;
        writeln!(
            f,
            " horizontalInBin {}  horizontalOutBin {}",
            self.in_horizontal.join(" "),
            self.out_horizontal.join(" ")
        )?;
        writeln!(
            f,
            " verticalInBin {}  verticalOutBin {}",
            self.in_vertical.join(" "),
            self.out_vertical.join(" ")
        )?;
        for row in &self.cells {
            for cell in row {
                let fill = match cell.state {
                    LocationState::Accident => 'X',
                    LocationState::Crosswalk => '#',
                    LocationState::Parking => 'P',
                    _ => '_',
                };
                let text = match cell.cars.first() {
                    None => pad("", fill),
                    Some(id) if cell.state == LocationState::Accident => pad(id, 'X'),
                    Some(id) => pad(id, ' '),
                };
                write!(f, "{text} ")?;
            }
            writeln!(f)?;
        }
        write!(f, " accidents {}", self.accidents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Both out-flow roots reached their configured car counts.
    Completed,
    Cancelled,
}

/// Summary returned once the dispatch loop stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub outcome: Outcome,
    pub accidents: usize,
    pub arrived_horizontal: usize,
    pub arrived_vertical: usize,
    pub deleted_horizontal: usize,
    pub deleted_vertical: usize,
    pub still_parked: usize,
    pub elapsed: Duration,
}

impl SimulationReport {
    pub fn from_grid(grid: &Grid, outcome: Outcome, accidents: usize, elapsed: Duration) -> Self {
        let count = |direction: Direction, state: CarState| {
            grid.out_root(direction)
                .values()
                .filter(|car| car.state == state)
                .count()
        };
        let still_parked = grid
            .rows()
            .iter()
            .flatten()
            .filter(|cell| cell.state == LocationState::Parking)
            .map(|cell| cell.cars.len())
            .sum();
        Self {
            outcome,
            accidents,
            arrived_horizontal: count(Direction::Horizontal, CarState::Working),
            arrived_vertical: count(Direction::Vertical, CarState::Working),
            deleted_horizontal: count(Direction::Horizontal, CarState::Deleted),
            deleted_vertical: count(Direction::Vertical, CarState::Deleted),
            still_parked,
            elapsed,
        }
    }
}

/// Seconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

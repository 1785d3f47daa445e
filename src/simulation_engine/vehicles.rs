use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis a car travels along. Horizontal cars walk columns left to right,
/// vertical cars walk rows top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Horizontal,
    Vertical,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Horizontal, Direction::Vertical];

    pub fn index(self) -> usize {
        match self {
            Direction::Horizontal => 0,
            Direction::Vertical => 1,
        }
    }
}

/// Unique identifier of a car, e.g. `hcar 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CarId {
    pub direction: Direction,
    pub number: usize,
}

impl fmt::Display for CarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Horizontal => write!(f, "hcar {}", self.number),
            Direction::Vertical => write!(f, "vcar {}", self.number),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarState {
    Working,
    /// Towed away after an unrecoverable accident.
    Deleted,
}

/// A traffic participant. Always owned by exactly one cell or flow root.
#[derive(Debug, Clone, PartialEq)]
pub struct Car {
    pub id: CarId,
    /// Rate of the car's movement clock.
    pub speed: f64,
    /// Grid coordinates, `None` while waiting in (or after leaving through) a flow root.
    pub position: Option<(usize, usize)>,
    pub direction: Direction,
    pub prob_movement: f64,
    pub slowing_down: bool,
    pub state: CarState,
    /// Generation of the car's movement clock. Only a clock carrying the current
    /// generation may move the car, so a car never has two live clocks.
    pub clock_epoch: u64,
}

impl Car {
    pub fn new(id: CarId, speed: f64, prob_movement: f64) -> Self {
        Self {
            id,
            speed,
            position: None,
            direction: id.direction,
            prob_movement,
            slowing_down: false,
            state: CarState::Working,
            clock_epoch: 0,
        }
    }

    /// Invalidates any outstanding clock and returns the generation for a new one.
    pub fn next_clock_epoch(&mut self) -> u64 {
        self.clock_epoch += 1;
        self.clock_epoch
    }
}

// episodes.rs
use crate::simulation_engine::grid::LocationState;
use crate::simulation_engine::vehicles::CarId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccidentResolution {
    Unresolved,
    /// The cars drive on from where they stopped.
    Resolved,
    /// The cars are towed off the grid.
    ToBeDeleted,
}

/// A crash blocking one cell until its clearing clock fires.
#[derive(Debug, Clone, PartialEq)]
pub struct Accident {
    pub location: (usize, usize),
    pub resolution: AccidentResolution,
    /// Tag the cell gets back once the accident is cleared.
    pub prev_state: LocationState,
    pub prob_restart: f64,
    pub removal_rate: f64,
}

impl Accident {
    pub fn new(
        location: (usize, usize),
        prev_state: LocationState,
        prob_restart: f64,
        removal_rate: f64,
    ) -> Self {
        Self {
            location,
            resolution: AccidentResolution::Unresolved,
            prev_state,
            prob_restart,
            removal_rate,
        }
    }

    /// Settles the outcome from a uniform draw on `[0, 1)`.
    pub fn resolve(&mut self, draw: f64) {
        self.resolution = if draw < self.prob_restart {
            AccidentResolution::Resolved
        } else {
            AccidentResolution::ToBeDeleted
        };
    }
}

/// A distracted car sitting in a parking cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ParkingEpisode {
    pub car: CarId,
    /// Lane cell the car pulled over from.
    pub prev_location: (usize, usize),
    pub parking_location: (usize, usize),
    pub parking_time_rate: f64,
    /// Failed attempts to find a free spot back on the lane.
    pub retries: u32,
}

/// A car crawling at reduced speed after a crosswalk or a police stop.
#[derive(Debug, Clone, PartialEq)]
pub struct SlowDown {
    pub car: CarId,
    pub old_speed: f64,
    pub slow_down_rate: f64,
}

use crate::simulation_engine::episodes::{Accident, ParkingEpisode, SlowDown};
use crate::simulation_engine::vehicles::{CarId, Direction};

/// Everything the dispatch loop can be asked to do. Timer tasks only ever send these;
/// the loop is the sole code path that touches the grid.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Move one waiting car from the in-flow root onto the grid.
    EnterGrid(Direction),
    /// Move one car at the far edge into the out-flow root.
    ExitGrid(Direction),
    /// A car's movement clock fired and the car wants to advance.
    CarStep { car: CarId, epoch: u64 },
    AccidentTimeout(Accident),
    ParkingTimeout(ParkingEpisode),
    SlowdownTimeout(SlowDown),
}

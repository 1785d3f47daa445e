pub mod communication;
pub mod config;
pub mod error;
pub mod global_variables;
pub mod monitoring;
pub mod shared_data;
pub mod simulation_engine;

pub use config::SimulationConfig;
pub use error::{ConfigurationError, SimulationError, SimulationResult};
pub use shared_data::{GridView, Outcome, SimulationReport};
pub use simulation_engine::grid::lane_range;
pub use simulation_engine::simulation::{start, SimulationHandle};

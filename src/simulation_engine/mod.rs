// simulation_engine/mod.rs
pub mod episodes;
pub mod grid;
pub mod lane_selection;
pub mod movement;
pub mod sampling;
pub mod simulation;
pub mod vehicles;

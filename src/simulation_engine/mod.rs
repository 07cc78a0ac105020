// simulation_engine/mod.rs
pub mod gate;
pub mod grid;
pub mod intersection;
pub mod signal;
pub mod simulation;
pub mod vehicles;

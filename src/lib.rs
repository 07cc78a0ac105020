//! Concurrent intersection-network simulator: vehicle agents and signal
//! controllers negotiating right-of-way through per-approach traffic lights,
//! with congestion-adaptive green times and emergency preemption.

pub mod config;
pub mod simulation_engine;

pub use config::SimConfig;
pub use simulation_engine::gate::{request_passage, PassageOutcome};
pub use simulation_engine::grid::{Attachment, GridError, Street, TrafficGrid};
pub use simulation_engine::intersection::{Intersection, IntersectionSnapshot};
pub use simulation_engine::signal::{Direction, LightPhase, TrafficLight};
pub use simulation_engine::simulation::{run_simulation, setup_grid};
pub use simulation_engine::vehicles::{run_vehicle, Vehicle, VehicleType};

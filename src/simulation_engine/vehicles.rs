use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::SimConfig;
use crate::simulation_engine::gate::{request_passage, PassageOutcome};
use crate::simulation_engine::grid::{Street, TrafficGrid};
use crate::simulation_engine::intersection::Intersection;

/// Different types of vehicles in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleType {
    Car,
    Bus,
    Truck,
    EmergencyVan,
}

/// A vehicle traveling through the grid. Each vehicle runs as its own task;
/// the only shared state it touches is its governing traffic light.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: u64,
    pub vehicle_type: VehicleType,
    pub speed: f64,
    /// Emergency vans spawn with the siren on; with it off they behave like
    /// any other vehicle.
    pub siren_on: bool,
}

impl Vehicle {
    pub fn new(id: u64, vehicle_type: VehicleType, speed: f64) -> Self {
        Self {
            id,
            vehicle_type,
            speed,
            siren_on: vehicle_type == VehicleType::EmergencyVan,
        }
    }

    pub fn label(&self) -> String {
        format!("{:?}-{}", self.vehicle_type, self.id)
    }
}

/// Picks the intersection a vehicle on `street` is heading towards,
/// excluding the one it just departed. A two-way dead end sends the vehicle
/// back; a one-way street with nowhere new to go leads out of the grid.
fn pick_target(
    grid: &TrafficGrid,
    street: &Street,
    exclude: Option<&str>,
) -> Option<Arc<Intersection>> {
    let connected = grid.intersections_connected_to(&street.id);
    let candidates: Vec<_> = connected
        .iter()
        .filter(|i| Some(i.id.as_str()) != exclude)
        .cloned()
        .collect();
    if !candidates.is_empty() {
        let pick = rand::rng().random_range(0..candidates.len());
        return Some(candidates[pick].clone());
    }
    if street.two_way {
        return connected.first().cloned();
    }
    None
}

/// Drives one vehicle from its start street until it leaves the grid, gets
/// stuck, or the simulation shuts down. This is the agent loop: advance
/// along the current street each tick, then negotiate the intersection at
/// its end.
pub async fn run_vehicle(
    vehicle: Vehicle,
    grid: Arc<TrafficGrid>,
    start_street: Arc<Street>,
    cfg: Arc<SimConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    let label = vehicle.label();
    let mut current_street = start_street;
    let mut position = 0.0_f64;

    let mut next_intersection = match pick_target(&grid, &current_street, None) {
        Some(i) => i,
        None => {
            log::warn!(
                "{} spawned on street {} with no connected intersection",
                label,
                current_street.id
            );
            return;
        }
    };
    log::info!(
        "{} starting on street {} towards {}",
        label,
        current_street.id,
        next_intersection.id
    );

    loop {
        if *shutdown.borrow() {
            log::debug!("{} stopping for shutdown", label);
            return;
        }
        sleep(Duration::from_millis(cfg.tick_ms)).await;
        position += vehicle.speed / current_street.length;
        if position < 1.0 {
            continue;
        }

        // Reached the end of the street: negotiate the intersection.
        let intersection = Arc::clone(&next_intersection);
        let arrival =
            match grid.arrival_direction_for(&intersection.id, Some(current_street.id.as_str())) {
            Some(d) => d,
            None => {
                log::error!(
                    "{} could not resolve its arrival direction at {} from street {}, ending journey",
                    label,
                    intersection.id,
                    current_street.id
                );
                return;
            }
        };

        let with_priority = vehicle.siren_on;
        if with_priority {
            log::info!(
                "{} requesting priority at {} from {:?}",
                label,
                intersection.id,
                arrival
            );
            intersection.handle_emergency(arrival);
            // Fixed reaction delay instead of a condition wait; the
            // preemption has already forced this approach green.
            sleep(Duration::from_millis(cfg.emergency_reaction_ms)).await;
        } else {
            match intersection.light_for(arrival) {
                Some(light) => match request_passage(&light, &cfg, &mut shutdown).await {
                    PassageOutcome::Aborted => {
                        log::info!("{} aborted while waiting at {}", label, intersection.id);
                        return;
                    }
                    PassageOutcome::ProceededYellow => {
                        log::info!(
                            "{} proceeding on YELLOW through {} from {:?}",
                            label,
                            intersection.id,
                            arrival
                        );
                    }
                    PassageOutcome::ProceededGreen => {
                        log::debug!(
                            "{} proceeding on green through {} from {:?}",
                            label,
                            intersection.id,
                            arrival
                        );
                    }
                },
                None => {
                    log::warn!(
                        "{} found no light for {:?} at {}, proceeding",
                        label,
                        arrival,
                        intersection.id
                    );
                }
            }
        }

        // Passage granted: pick an exit and depart.
        let exits = grid.exits_from(&intersection.id, Some(arrival), cfg.allow_u_turns);
        if exits.is_empty() {
            if with_priority {
                intersection.end_emergency(arrival);
            }
            log::info!(
                "{} found no exits from {}, ending journey",
                label,
                intersection.id
            );
            return;
        }
        let pick = rand::rng().random_range(0..exits.len());
        current_street = Arc::clone(&exits[pick]);
        position = 0.0;
        if with_priority {
            intersection.end_emergency(arrival);
        }

        match pick_target(&grid, &current_street, Some(&intersection.id)) {
            Some(target) => {
                log::info!(
                    "{} departed {} on street {} towards {}",
                    label,
                    intersection.id,
                    current_street.id,
                    target.id
                );
                next_intersection = target;
            }
            None => {
                log::info!(
                    "{} departed {} on street {} and left the grid",
                    label,
                    intersection.id,
                    current_street.id
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_engine::grid::Attachment;
    use crate::simulation_engine::signal::{Direction, LightPhase};
    use Direction::*;

    /// One intersection, one approach, one exit street that leaves the grid.
    fn through_grid(cfg: &SimConfig) -> Arc<TrafficGrid> {
        let mut grid = TrafficGrid::new();
        let i1 = grid.add_intersection(Intersection::new("I1", cfg));
        grid.add_street(Street::one_way("S-in", 100.0, South));
        grid.add_street(Street::one_way("S-exit", 100.0, North));
        grid.connect_street("S-in", "I1", North, Attachment::Incoming, cfg)
            .unwrap();
        grid.connect_street("S-exit", "I1", North, Attachment::Outgoing, cfg)
            .unwrap();
        i1.configure_phases(vec![North]);
        Arc::new(grid)
    }

    #[tokio::test(start_paused = true)]
    async fn car_crosses_a_green_intersection_and_leaves() {
        let cfg = Arc::new(SimConfig::default());
        let grid = through_grid(&cfg);
        let start = grid.street("S-in").unwrap();
        let (_tx, rx) = watch::channel(false);

        let car = Vehicle::new(1, VehicleType::Car, 50.0);
        run_vehicle(car, Arc::clone(&grid), start, Arc::clone(&cfg), rx).await;
        // Journey completed; the light is untouched by the passage.
        let i1 = grid.intersection("I1").unwrap();
        assert_eq!(i1.light_for(North).unwrap().phase(), LightPhase::Green);
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_van_preempts_and_releases() {
        let cfg = Arc::new(SimConfig::default());
        let grid = through_grid(&cfg);
        let i1 = grid.intersection("I1").unwrap();
        // Force the approach red so only the preemption can let the van in.
        i1.light_for(North).unwrap().turn_red();

        let start = grid.street("S-in").unwrap();
        let (_tx, rx) = watch::channel(false);
        let van = Vehicle::new(2, VehicleType::EmergencyVan, 80.0);
        run_vehicle(van, Arc::clone(&grid), start, Arc::clone(&cfg), rx).await;

        let snap = i1.snapshot();
        assert_eq!(snap.emergency, None, "preemption must be released");
        assert!(!snap.lights[0].emergency);
        // end_emergency re-seeded the normal phase.
        assert_eq!(i1.light_for(North).unwrap().phase(), LightPhase::Green);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_a_journey_mid_street() {
        let cfg = Arc::new(SimConfig::default());
        let grid = through_grid(&cfg);
        let start = grid.street("S-in").unwrap();
        let (tx, rx) = watch::channel(false);

        let car = Vehicle::new(3, VehicleType::Car, 0.5); // never reaches the end
        let handle = tokio::spawn(run_vehicle(
            car,
            Arc::clone(&grid),
            start,
            Arc::clone(&cfg),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn siren_defaults_follow_vehicle_type() {
        assert!(Vehicle::new(1, VehicleType::EmergencyVan, 80.0).siren_on);
        assert!(!Vehicle::new(2, VehicleType::Car, 60.0).siren_on);
    }
}

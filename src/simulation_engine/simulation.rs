use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::config::SimConfig;
use crate::simulation_engine::grid::{Attachment, GridError, Street, TrafficGrid};
use crate::simulation_engine::intersection::{Intersection, IntersectionSnapshot};
use crate::simulation_engine::signal::Direction;
use crate::simulation_engine::vehicles::{run_vehicle, Vehicle, VehicleType};

/// Builds the demo topology: two intersections joined by a two-way street,
/// with a one-way feeder and a one-way exit at each end.
pub fn setup_grid(cfg: &SimConfig) -> Result<TrafficGrid, GridError> {
    use Direction::*;

    let mut grid = TrafficGrid::new();
    let i1 = grid.add_intersection(Intersection::new("I1", cfg));
    let i2 = grid.add_intersection(Intersection::new("I2", cfg));

    grid.add_street(Street::two_way("S1-I1E-I2W", 100.0));
    grid.add_street(Street::one_way("S2-N-I1S", 80.0, South));
    grid.add_street(Street::one_way("S3-I1N-Exit", 80.0, North));
    grid.add_street(Street::one_way("S4-E-I2W", 70.0, West));
    grid.add_street(Street::one_way("S5-I2E-Exit", 70.0, East));

    grid.connect_street("S1-I1E-I2W", "I1", West, Attachment::Incoming, cfg)?;
    grid.connect_street("S1-I1E-I2W", "I1", East, Attachment::Outgoing, cfg)?;
    grid.connect_street("S2-N-I1S", "I1", North, Attachment::Incoming, cfg)?;
    grid.connect_street("S3-I1N-Exit", "I1", North, Attachment::Outgoing, cfg)?;

    grid.connect_street("S1-I1E-I2W", "I2", East, Attachment::Incoming, cfg)?;
    grid.connect_street("S1-I1E-I2W", "I2", West, Attachment::Outgoing, cfg)?;
    grid.connect_street("S4-E-I2W", "I2", East, Attachment::Incoming, cfg)?;
    grid.connect_street("S5-I2E-Exit", "I2", East, Attachment::Outgoing, cfg)?;

    i1.configure_phases(vec![North, West]);
    i2.configure_phases(vec![East]);

    log::info!("grid setup complete: 2 intersections, 5 streets");
    Ok(grid)
}

/// Spawns one vehicle task on a random street. Roughly one in ten spawns is
/// an emergency van (configurable), the rest a mix of cars, trucks and buses.
fn spawn_vehicle(
    id: u64,
    grid: &Arc<TrafficGrid>,
    cfg: &Arc<SimConfig>,
    shutdown: &watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    let streets = grid.streets();
    if streets.is_empty() {
        return None;
    }

    let (start, vehicle_type, speed) = {
        let mut rng = rand::rng();
        let start = rng.random_range(0..streets.len());
        let roll: f64 = rng.random_range(0.0..1.0);
        let vehicle_type = if roll < cfg.emergency_share {
            VehicleType::EmergencyVan
        } else if roll < cfg.emergency_share + 0.55 {
            VehicleType::Car
        } else if roll < cfg.emergency_share + 0.80 {
            VehicleType::Truck
        } else {
            VehicleType::Bus
        };
        let speed = match vehicle_type {
            VehicleType::Car => rng.random_range(5.0..10.0),
            VehicleType::Bus => rng.random_range(4.0..8.0),
            VehicleType::Truck => rng.random_range(4.0..7.0),
            VehicleType::EmergencyVan => rng.random_range(8.0..12.0),
        };
        (start, vehicle_type, speed)
    };

    log::info!(
        "spawning {:?} {} on street {}",
        vehicle_type,
        id,
        streets[start].id
    );
    Some(tokio::spawn(run_vehicle(
        Vehicle::new(id, vehicle_type, speed),
        Arc::clone(grid),
        Arc::clone(&streets[start]),
        Arc::clone(cfg),
        shutdown.clone(),
    )))
}

fn print_status(tick: u64, active_vehicles: usize, snapshots: &[IntersectionSnapshot]) {
    println!("\n--- Simulation tick: {} ---", tick);
    println!("Active vehicles: {}", active_vehicles);
    for snap in snapshots {
        let emergency = match snap.emergency {
            Some(d) => format!(" [EMERGENCY {:?}]", d),
            None => String::new(),
        };
        println!("Intersection {}{}:", snap.id, emergency);
        for light in &snap.lights {
            println!(
                "  {:?}: {:?} (passed on yellow: {}, green: {}ms, yellow: {}ms)",
                light.direction,
                light.phase,
                light.proceeded_on_yellow,
                light.green_ms,
                light.yellow_ms
            );
        }
    }
    println!("----------------------------\n");
}

/// Runs the simulation until ctrl-c or the configured runtime elapses:
/// ticks every intersection's phase machine, spawns vehicles periodically,
/// prints a status report, and drains all vehicle tasks on shutdown.
pub async fn run_simulation(cfg: SimConfig) -> Result<(), GridError> {
    let cfg = Arc::new(cfg);
    let grid = Arc::new(setup_grid(&cfg)?);
    let intersections = grid.intersections();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut vehicles: Vec<JoinHandle<()>> = Vec::new();
    let mut next_vehicle_id: u64 = 1;
    let mut tick_count: u64 = 0;

    let mut ticker = interval(Duration::from_millis(cfg.tick_ms));
    let mut last_spawn = tokio::time::Instant::now();
    let deadline = cfg
        .run_secs
        .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    log::info!("simulation starting");
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => {
                log::info!("ctrl-c received, shutting down");
                break;
            }
        }
        tick_count += 1;

        if last_spawn.elapsed() >= Duration::from_millis(cfg.spawn_interval_ms) {
            vehicles.retain(|handle| !handle.is_finished());
            if vehicles.len() < cfg.max_vehicles {
                if let Some(handle) =
                    spawn_vehicle(next_vehicle_id, &grid, &cfg, &shutdown_rx)
                {
                    vehicles.push(handle);
                    next_vehicle_id += 1;
                }
            }
            last_spawn = tokio::time::Instant::now();
        }

        let now = Instant::now();
        for intersection in &intersections {
            intersection.advance(now);
        }

        if tick_count % cfg.status_every_ticks == 0 {
            vehicles.retain(|handle| !handle.is_finished());
            let snapshots: Vec<_> = intersections.iter().map(|i| i.snapshot()).collect();
            print_status(tick_count, vehicles.len(), &snapshots);
        }

        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            log::info!("configured runtime elapsed, shutting down");
            break;
        }
    }

    // Wake every blocked vehicle with the shutdown signal and drain tasks.
    let _ = shutdown_tx.send(true);
    for handle in vehicles {
        if timeout(Duration::from_secs(2), handle).await.is_err() {
            log::warn!("a vehicle task did not stop within the drain timeout");
        }
    }
    log::info!("simulation stopped after {} ticks", tick_count);
    Ok(())
}

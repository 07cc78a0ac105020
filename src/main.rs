use traffic_sim::config::SimConfig;
use traffic_sim::simulation_engine::simulation::run_simulation;

#[tokio::main]
async fn main() {
    env_logger::init();

    // Optional JSON config path as the first argument; anything missing
    // falls back to the built-in defaults.
    let cfg = match std::env::args().nth(1) {
        Some(path) => match SimConfig::from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::error!("{}; using default configuration", e);
                SimConfig::default()
            }
        },
        None => SimConfig::default(),
    };

    if let Err(e) = run_simulation(cfg).await {
        log::error!("simulation failed during setup: {}", e);
        std::process::exit(1);
    }
}

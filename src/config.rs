use serde::Deserialize;
use std::fmt;
use std::path::Path;

use crate::simulation_engine::signal::Direction;

// Default signal timings.
pub const DEFAULT_GREEN_MS: u64 = 15_000;
pub const DEFAULT_YELLOW_MS: u64 = 3_000;
pub const DEFAULT_GREEN_MAX_MS: u64 = 30_000;

// Congestion-driven green extension.
pub const DEFAULT_CONGESTION_THRESHOLD: u32 = 2;
pub const DEFAULT_CONGESTION_INCREMENT_MS: u64 = 2_000;

// Vehicle-side synchronization.
pub const DEFAULT_YELLOW_PROCEED_PROBABILITY: f64 = 0.5;
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_EMERGENCY_REACTION_MS: u64 = 500;

// Simulation driver.
pub const DEFAULT_TICK_MS: u64 = 100;
pub const DEFAULT_SPAWN_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_MAX_VEHICLES: usize = 10;
pub const DEFAULT_STATUS_EVERY_TICKS: u64 = 50;
pub const DEFAULT_EMERGENCY_SHARE: f64 = 0.10;

/// Optional per-direction overrides for a timing seed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DirectionOverrides {
    pub north: Option<u64>,
    pub south: Option<u64>,
    pub east: Option<u64>,
    pub west: Option<u64>,
}

impl DirectionOverrides {
    pub fn get(&self, direction: Direction) -> Option<u64> {
        match direction {
            Direction::North => self.north,
            Direction::South => self.south,
            Direction::East => self.east,
            Direction::West => self.west,
        }
    }
}

/// All externally tunable parameters of the simulation.
///
/// Every value has a default; a JSON file may override any subset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed green duration for a newly wired signal, in milliseconds.
    pub green_ms: u64,
    /// Seed yellow duration for a newly wired signal, in milliseconds.
    pub yellow_ms: u64,
    /// Hard cap for any green duration, in milliseconds.
    pub green_max_ms: u64,
    /// Per-direction overrides for the green seed.
    pub green_overrides: DirectionOverrides,
    /// Per-direction overrides for the yellow seed.
    pub yellow_overrides: DirectionOverrides,
    /// Yellow-proceed count above which a direction's green is extended.
    pub congestion_threshold: u32,
    /// Green extension applied when the threshold is exceeded, in milliseconds.
    pub congestion_increment_ms: u64,
    /// Probability that a vehicle treats a yellow light as passable.
    pub yellow_proceed_probability: f64,
    /// Upper bound on a single blocked wait at a signal, in milliseconds.
    pub wait_timeout_ms: u64,
    /// How long an emergency vehicle waits for the intersection to clear.
    pub emergency_reaction_ms: u64,
    /// Simulation tick period, in milliseconds.
    pub tick_ms: u64,
    /// How often a new vehicle is spawned, in milliseconds.
    pub spawn_interval_ms: u64,
    /// Maximum number of concurrently active vehicles.
    pub max_vehicles: usize,
    /// Status report period, in ticks.
    pub status_every_ticks: u64,
    /// Share of spawned vehicles that are emergency vans, in [0, 1].
    pub emergency_share: f64,
    /// Whether exit selection may pick the street opposite the arrival
    /// direction even when other exits exist.
    pub allow_u_turns: bool,
    /// Total wall-clock runtime of the simulation; `None` runs until ctrl-c.
    pub run_secs: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            green_ms: DEFAULT_GREEN_MS,
            yellow_ms: DEFAULT_YELLOW_MS,
            green_max_ms: DEFAULT_GREEN_MAX_MS,
            green_overrides: DirectionOverrides::default(),
            yellow_overrides: DirectionOverrides::default(),
            congestion_threshold: DEFAULT_CONGESTION_THRESHOLD,
            congestion_increment_ms: DEFAULT_CONGESTION_INCREMENT_MS,
            yellow_proceed_probability: DEFAULT_YELLOW_PROCEED_PROBABILITY,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            emergency_reaction_ms: DEFAULT_EMERGENCY_REACTION_MS,
            tick_ms: DEFAULT_TICK_MS,
            spawn_interval_ms: DEFAULT_SPAWN_INTERVAL_MS,
            max_vehicles: DEFAULT_MAX_VEHICLES,
            status_every_ticks: DEFAULT_STATUS_EVERY_TICKS,
            emergency_share: DEFAULT_EMERGENCY_SHARE,
            allow_u_turns: false,
            run_secs: Some(120),
        }
    }
}

impl SimConfig {
    /// Green seed for a given approach direction.
    pub fn green_seed_ms(&self, direction: Direction) -> u64 {
        self.green_overrides
            .get(direction)
            .unwrap_or(self.green_ms)
            .min(self.green_max_ms)
    }

    /// Yellow seed for a given approach direction.
    pub fn yellow_seed_ms(&self, direction: Direction) -> u64 {
        self.yellow_overrides
            .get(direction)
            .unwrap_or(self.yellow_ms)
    }

    /// Loads a config from a JSON file, filling omitted fields with defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let cfg: SimConfig = serde_json::from_str(&contents)?;
        Ok(cfg)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "failed to parse config file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

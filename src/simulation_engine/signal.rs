use std::sync::Mutex;

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Compass direction a signal's approach traffic arrives from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    /// Whether two approach directions may hold a non-red light at the same
    /// time. Opposing flows are compatible, perpendicular flows are not.
    pub fn is_compatible(self, other: Direction) -> bool {
        self == other || self.opposite() == other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightPhase {
    Red,
    Yellow,
    Green,
}

struct LightInner {
    phase: LightPhase,
    green_ms: u64,
    yellow_ms: u64,
    proceeded_on_yellow: u32,
    emergency: bool,
}

/// One approach direction's light at an intersection.
///
/// Phase and timings are mutated only by the owning intersection's cycling
/// and preemption paths; vehicles read the phase and bump the yellow counter
/// through [`TrafficLight::record_proceed_on_yellow`]. Every phase change
/// wakes all vehicles blocked on this light.
pub struct TrafficLight {
    pub id: String,
    pub direction: Direction,
    green_max_ms: u64,
    inner: Mutex<LightInner>,
    notify: Notify,
}

/// Read-only view of a light, for the status report and tests.
#[derive(Debug, Clone)]
pub struct LightSnapshot {
    pub direction: Direction,
    pub phase: LightPhase,
    pub green_ms: u64,
    pub yellow_ms: u64,
    pub proceeded_on_yellow: u32,
    pub emergency: bool,
}

impl TrafficLight {
    pub fn new(
        intersection_id: &str,
        direction: Direction,
        green_ms: u64,
        yellow_ms: u64,
        green_max_ms: u64,
    ) -> Self {
        Self {
            id: format!("TL-{}-{:?}", intersection_id, direction),
            direction,
            green_max_ms,
            inner: Mutex::new(LightInner {
                phase: LightPhase::Red,
                green_ms: green_ms.min(green_max_ms),
                yellow_ms,
                proceeded_on_yellow: 0,
                emergency: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn turn_green(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.phase = LightPhase::Green;
        }
        log::info!("{} is GREEN", self.id);
        self.notify.notify_waiters();
    }

    /// Turns the light yellow and resets the yellow-proceed counter.
    pub fn turn_yellow(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.phase = LightPhase::Yellow;
            inner.proceeded_on_yellow = 0;
        }
        log::info!("{} is YELLOW", self.id);
        self.notify.notify_waiters();
    }

    pub fn turn_red(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.phase = LightPhase::Red;
        }
        log::info!("{} is RED", self.id);
        self.notify.notify_waiters();
    }

    /// Counts a vehicle that entered the intersection on yellow. A vehicle
    /// that re-checks state after waking may call this after the phase has
    /// already moved on; anything but yellow is a no-op.
    pub fn record_proceed_on_yellow(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase == LightPhase::Yellow {
            inner.proceeded_on_yellow += 1;
        }
    }

    /// Sets new durations; the green time is clamped to the configured max.
    pub fn set_timings(&self, green_ms: u64, yellow_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.green_ms = green_ms.min(self.green_max_ms);
        inner.yellow_ms = yellow_ms;
    }

    pub fn activate_emergency(&self) {
        self.inner.lock().unwrap().emergency = true;
        log::warn!("{} emergency override ACTIVE", self.id);
    }

    pub fn deactivate_emergency(&self) {
        self.inner.lock().unwrap().emergency = false;
        log::info!("{} emergency override cleared", self.id);
    }

    pub fn phase(&self) -> LightPhase {
        self.inner.lock().unwrap().phase
    }

    pub fn green_ms(&self) -> u64 {
        self.inner.lock().unwrap().green_ms
    }

    pub fn yellow_ms(&self) -> u64 {
        self.inner.lock().unwrap().yellow_ms
    }

    pub fn proceeded_on_yellow(&self) -> u32 {
        self.inner.lock().unwrap().proceeded_on_yellow
    }

    pub fn snapshot(&self) -> LightSnapshot {
        let inner = self.inner.lock().unwrap();
        LightSnapshot {
            direction: self.direction,
            phase: inner.phase,
            green_ms: inner.green_ms,
            yellow_ms: inner.yellow_ms,
            proceeded_on_yellow: inner.proceeded_on_yellow,
            emergency: inner.emergency,
        }
    }

    /// A future completed by the next phase change. Callers must `enable()`
    /// the pinned future before re-checking the phase, so a change landing
    /// between the check and the await is not lost.
    pub fn phase_changed(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

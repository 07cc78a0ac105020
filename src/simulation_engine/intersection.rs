use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::SimConfig;
use crate::simulation_engine::signal::{Direction, LightPhase, LightSnapshot, TrafficLight};

/// Per-intersection mutable state, all of it behind one phase lock so no two
/// transitions (normal cycling or emergency preemption) can interleave.
struct PhaseState {
    lights: HashMap<Direction, Arc<TrafficLight>>,
    green_phases: Vec<Direction>,
    phase_index: usize,
    last_change: Instant,
    /// Direction currently holding emergency priority, if any. At most one
    /// preemption is active at a time; a later request replaces an earlier
    /// one (last caller wins, logged).
    emergency: Option<Direction>,
}

/// An intersection: owns one light per wired approach direction and cycles
/// right-of-way through the configured phase order.
pub struct Intersection {
    pub id: String,
    congestion_threshold: u32,
    congestion_increment_ms: u64,
    state: Mutex<PhaseState>,
}

/// Read-only view of an intersection for the status report.
#[derive(Debug, Clone)]
pub struct IntersectionSnapshot {
    pub id: String,
    pub lights: Vec<LightSnapshot>,
    pub phase_index: usize,
    pub emergency: Option<Direction>,
}

impl Intersection {
    pub fn new(id: impl Into<String>, cfg: &SimConfig) -> Self {
        Self {
            id: id.into(),
            congestion_threshold: cfg.congestion_threshold,
            congestion_increment_ms: cfg.congestion_increment_ms,
            state: Mutex::new(PhaseState {
                lights: HashMap::new(),
                green_phases: Vec::new(),
                phase_index: 0,
                last_change: Instant::now(),
                emergency: None,
            }),
        }
    }

    /// Wires an approach direction, creating its light on first wiring.
    /// Called by the grid while streets are being connected.
    pub fn add_approach(&self, direction: Direction, cfg: &SimConfig) -> Arc<TrafficLight> {
        let mut state = self.state.lock().unwrap();
        let id = &self.id;
        Arc::clone(state.lights.entry(direction).or_insert_with(|| {
            Arc::new(TrafficLight::new(
                id,
                direction,
                cfg.green_seed_ms(direction),
                cfg.yellow_seed_ms(direction),
                cfg.green_max_ms,
            ))
        }))
    }

    /// The light governing a given approach, if one has been wired.
    pub fn light_for(&self, direction: Direction) -> Option<Arc<TrafficLight>> {
        self.state.lock().unwrap().lights.get(&direction).cloned()
    }

    /// Sets the ordered cycle of green phases and initializes every light
    /// for the first phase (active group green, everything else red).
    pub fn configure_phases(&self, phases: Vec<Direction>) {
        let mut state = self.state.lock().unwrap();
        state.green_phases = phases;
        state.phase_index = 0;
        if state.green_phases.is_empty() {
            log::warn!(
                "intersection {}: configured with an empty phase list",
                self.id
            );
            return;
        }
        Self::apply_phase(&mut state, Instant::now());
    }

    /// Forces the lights into the state of the current phase index: every
    /// direction incompatible with the active one goes red first, then the
    /// active group goes green. Caller holds the phase lock.
    fn apply_phase(state: &mut PhaseState, now: Instant) {
        let active = state.green_phases[state.phase_index];
        // Conflicting directions are cleared before any new green shows.
        for (direction, light) in &state.lights {
            if !direction.is_compatible(active) && light.phase() != LightPhase::Red {
                light.turn_red();
            }
        }
        for (direction, light) in &state.lights {
            if direction.is_compatible(active) {
                light.turn_green();
            }
        }
        state.last_change = now;
    }

    /// One tick of the phase state machine. Tick-rate independent: compares
    /// elapsed wall-clock time against the active light's durations.
    ///
    /// A missing phase list or a scheduled direction without a light is
    /// logged and skipped; the tick never blocks or panics.
    pub fn advance(&self, now: Instant) {
        let mut state = self.state.lock().unwrap();

        if state.emergency.is_some() {
            // Cycling is suspended while a preemption holds the
            // intersection; end_emergency re-seeds the cycle.
            return;
        }
        if state.green_phases.is_empty() {
            log::debug!(
                "intersection {}: no phases configured, skipping tick",
                self.id
            );
            return;
        }

        let active = state.green_phases[state.phase_index];
        let active_light = match state.lights.get(&active) {
            Some(light) => Arc::clone(light),
            None => {
                log::error!(
                    "intersection {}: no light for scheduled direction {:?}, skipping phase",
                    self.id,
                    active
                );
                state.phase_index = (state.phase_index + 1) % state.green_phases.len();
                Self::apply_phase(&mut state, now);
                return;
            }
        };

        let elapsed = now.saturating_duration_since(state.last_change).as_millis() as u64;

        match active_light.phase() {
            LightPhase::Green if elapsed >= active_light.green_ms() => {
                for (direction, light) in &state.lights {
                    if direction.is_compatible(active) && light.phase() == LightPhase::Green {
                        light.turn_yellow();
                    }
                }
                state.last_change = now;
            }
            LightPhase::Yellow if elapsed >= active_light.yellow_ms() => {
                for (direction, light) in &state.lights {
                    if direction.is_compatible(active) && light.phase() == LightPhase::Yellow {
                        light.turn_red();
                    }
                }
                self.check_congestion_and_adjust(&active_light);
                state.phase_index = (state.phase_index + 1) % state.green_phases.len();
                Self::apply_phase(&mut state, now);
                log::info!(
                    "intersection {} advanced to phase {:?}",
                    self.id,
                    state.green_phases[state.phase_index]
                );
            }
            _ => {}
        }
    }

    /// Called as a direction's yellow interval closes. If enough vehicles
    /// squeezed through on yellow this cycle, the direction gets more green
    /// the next time it becomes active, up to the light's clamp.
    fn check_congestion_and_adjust(&self, light: &TrafficLight) {
        let passed = light.proceeded_on_yellow();
        if passed > self.congestion_threshold {
            let green = light.green_ms();
            light.set_timings(green + self.congestion_increment_ms, light.yellow_ms());
            log::info!(
                "intersection {}: congestion on {:?} ({} passed on yellow), green {} -> {} ms",
                self.id,
                light.direction,
                passed,
                green,
                light.green_ms()
            );
        }
    }

    /// Emergency preemption: force `direction` green and everything else
    /// red, under the same phase lock normal cycling uses. Cycling stays
    /// suspended until [`Intersection::end_emergency`].
    pub fn handle_emergency(&self, direction: Direction) {
        let mut state = self.state.lock().unwrap();
        if !state.lights.contains_key(&direction) {
            log::error!(
                "intersection {}: emergency request for unwired direction {:?} ignored",
                self.id,
                direction
            );
            return;
        }
        if let Some(prev) = state.emergency {
            if prev != direction {
                log::warn!(
                    "intersection {}: emergency from {:?} replaces active preemption from {:?}",
                    self.id,
                    direction,
                    prev
                );
            }
        }
        // Conflicting directions go red before the forced green shows, in
        // the same order apply_phase uses. Vehicles read phase without the
        // phase lock, so the transition order is visible to them.
        for (d, light) in &state.lights {
            if *d != direction && light.phase() != LightPhase::Red {
                light.turn_red();
            }
        }
        let light = &state.lights[&direction];
        light.activate_emergency();
        light.turn_green();
        state.emergency = Some(direction);
        state.last_change = Instant::now();
        log::warn!(
            "intersection {}: emergency preemption active for {:?}",
            self.id,
            direction
        );
    }

    /// Ends a preemption and re-seeds the normal cycle at the current phase
    /// index so cycling resumes from a consistent state.
    pub fn end_emergency(&self, direction: Direction) {
        let mut state = self.state.lock().unwrap();
        if let Some(light) = state.lights.get(&direction) {
            light.deactivate_emergency();
        }
        match state.emergency {
            Some(active) if active == direction => {
                state.emergency = None;
                if state.green_phases.is_empty() {
                    log::warn!(
                        "intersection {}: emergency ended with no phases configured",
                        self.id
                    );
                    return;
                }
                Self::apply_phase(&mut state, Instant::now());
                log::info!("intersection {}: emergency ended, cycling resumed", self.id);
            }
            Some(active) => {
                // A later preemption took over; leave its forced state alone.
                log::warn!(
                    "intersection {}: end of emergency from {:?} ignored, {:?} holds preemption",
                    self.id,
                    direction,
                    active
                );
            }
            None => {
                log::warn!(
                    "intersection {}: end of emergency from {:?} with none active",
                    self.id,
                    direction
                );
            }
        }
    }

    pub fn snapshot(&self) -> IntersectionSnapshot {
        let state = self.state.lock().unwrap();
        let mut lights: Vec<LightSnapshot> = state.lights.values().map(|l| l.snapshot()).collect();
        lights.sort_by_key(|s| s.direction as u8);
        IntersectionSnapshot {
            id: self.id.clone(),
            lights,
            phase_index: state.phase_index,
            emergency: state.emergency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use Direction::*;

    /// Four-approach intersection with a North/South and an East/West group.
    fn four_way(cfg: &SimConfig) -> Intersection {
        let intersection = Intersection::new("I1", cfg);
        for d in [North, South, East, West] {
            intersection.add_approach(d, cfg);
        }
        intersection.configure_phases(vec![North, East]);
        intersection
    }

    fn fast_cfg() -> SimConfig {
        let mut cfg = SimConfig::default();
        cfg.green_ms = 1_000;
        cfg.yellow_ms = 300;
        cfg
    }

    fn phases_of(i: &Intersection) -> HashMap<Direction, LightPhase> {
        i.snapshot()
            .lights
            .iter()
            .map(|l| (l.direction, l.phase))
            .collect()
    }

    /// Every reachable state keeps non-red lights inside one compatible
    /// group.
    fn assert_mutual_exclusion(i: &Intersection) {
        let non_red: Vec<Direction> = i
            .snapshot()
            .lights
            .iter()
            .filter(|l| l.phase != LightPhase::Red)
            .map(|l| l.direction)
            .collect();
        for a in &non_red {
            for b in &non_red {
                assert!(
                    a.is_compatible(*b),
                    "incompatible directions {:?} and {:?} are both non-red",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn configure_phases_seeds_first_group_green() {
        let cfg = fast_cfg();
        let i = four_way(&cfg);
        let phases = phases_of(&i);
        assert_eq!(phases[&North], LightPhase::Green);
        assert_eq!(phases[&South], LightPhase::Green);
        assert_eq!(phases[&East], LightPhase::Red);
        assert_eq!(phases[&West], LightPhase::Red);
    }

    #[test]
    fn group_flips_exactly_once_in_2600_ms() {
        let cfg = fast_cfg();
        let i = four_way(&cfg);
        let t0 = Instant::now();

        let mut flips = 0;
        let mut north_was_active = true;
        for tick in 0..=26 {
            i.advance(t0 + Duration::from_millis(tick * 100));
            assert_mutual_exclusion(&i);
            let north_active = phases_of(&i)[&North] != LightPhase::Red;
            if north_was_active && !north_active {
                flips += 1;
            }
            north_was_active = north_active;
        }

        assert_eq!(flips, 1, "active group must flip from N/S to E/W exactly once");
        // At exactly 2600ms the E/W yellow interval closes and the cycle
        // returns to N/S, so the flip back has also just happened.
        let phases = phases_of(&i);
        assert_eq!(phases[&North], LightPhase::Green);
        assert_eq!(phases[&South], LightPhase::Green);
        assert_eq!(phases[&East], LightPhase::Red);
        assert_eq!(phases[&West], LightPhase::Red);
    }

    #[test]
    fn green_turns_yellow_then_red_on_schedule() {
        let cfg = fast_cfg();
        let i = four_way(&cfg);
        let t0 = Instant::now();

        i.advance(t0 + Duration::from_millis(500));
        assert_eq!(phases_of(&i)[&North], LightPhase::Green);

        i.advance(t0 + Duration::from_millis(1_000));
        assert_eq!(phases_of(&i)[&North], LightPhase::Yellow);
        assert_eq!(phases_of(&i)[&South], LightPhase::Yellow);

        i.advance(t0 + Duration::from_millis(1_300));
        assert_eq!(phases_of(&i)[&North], LightPhase::Red);
        assert_eq!(phases_of(&i)[&East], LightPhase::Green);
    }

    #[test]
    fn yellow_counter_feeds_congestion_extension() {
        let cfg = fast_cfg();
        let i = four_way(&cfg);
        let north = i.light_for(North).unwrap();
        let before = north.green_ms();
        let t0 = Instant::now();

        // Into yellow, push the counter over the threshold, close the cycle.
        i.advance(t0 + Duration::from_millis(1_000));
        for _ in 0..3 {
            north.record_proceed_on_yellow();
        }
        i.advance(t0 + Duration::from_millis(1_300));

        assert_eq!(north.green_ms(), before + cfg.congestion_increment_ms);
    }

    #[test]
    fn congestion_extension_clamps_at_max() {
        let mut cfg = fast_cfg();
        cfg.green_max_ms = 2_000;
        let i = four_way(&cfg);
        let north = i.light_for(North).unwrap();
        let mut t = Instant::now();

        // Run several full cycles with a congested North approach.
        for _ in 0..6 {
            t += Duration::from_millis(north.green_ms());
            i.advance(t);
            for _ in 0..3 {
                north.record_proceed_on_yellow();
            }
            t += Duration::from_millis(cfg.yellow_ms);
            i.advance(t);
            // Skip past the East group.
            t += Duration::from_millis(1_000);
            i.advance(t);
            t += Duration::from_millis(cfg.yellow_ms);
            i.advance(t);
        }

        assert_eq!(north.green_ms(), cfg.green_max_ms);
    }

    #[test]
    fn adjustment_below_threshold_is_a_noop() {
        let cfg = fast_cfg();
        let i = four_way(&cfg);
        let north = i.light_for(North).unwrap();
        let before = north.green_ms();
        let t0 = Instant::now();

        i.advance(t0 + Duration::from_millis(1_000));
        north.record_proceed_on_yellow();
        north.record_proceed_on_yellow();
        i.advance(t0 + Duration::from_millis(1_300));

        assert_eq!(north.green_ms(), before);
    }

    #[test]
    fn preemption_forces_single_green_from_any_state() {
        let cfg = fast_cfg();
        let i = four_way(&cfg);
        let t0 = Instant::now();
        // Advance into the middle of a yellow interval first.
        i.advance(t0 + Duration::from_millis(1_000));

        i.handle_emergency(West);
        let phases = phases_of(&i);
        assert_eq!(phases[&West], LightPhase::Green);
        for d in [North, South, East] {
            assert_eq!(phases[&d], LightPhase::Red, "{:?} must be red", d);
        }
        assert!(i.light_for(West).unwrap().snapshot().emergency);
        assert_mutual_exclusion(&i);
    }

    /// A vehicle reads its light's phase without the intersection's phase
    /// lock, so the preemption transition itself must never let an
    /// incompatible pair show green together. East starts green; forcing
    /// North must red East before North's green appears.
    #[test]
    fn preemption_clears_conflicting_green_before_showing_its_own() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let cfg = fast_cfg();
        for _ in 0..64 {
            let i = Intersection::new("I-race", &cfg);
            i.add_approach(North, &cfg);
            i.add_approach(East, &cfg);
            i.configure_phases(vec![East]);
            let north = i.light_for(North).unwrap();
            let east = i.light_for(East).unwrap();

            let stop = Arc::new(AtomicBool::new(false));
            let started = Arc::new(AtomicBool::new(false));
            let reader = {
                let north = Arc::clone(&north);
                let east = Arc::clone(&east);
                let stop = Arc::clone(&stop);
                let started = Arc::clone(&started);
                std::thread::spawn(move || {
                    started.store(true, Ordering::Release);
                    let mut overlaps = 0u32;
                    while !stop.load(Ordering::Acquire) {
                        if north.phase() == LightPhase::Green
                            && east.phase() == LightPhase::Green
                        {
                            overlaps += 1;
                        }
                    }
                    overlaps
                })
            };
            while !started.load(Ordering::Acquire) {
                std::thread::yield_now();
            }

            i.handle_emergency(North);
            stop.store(true, Ordering::Release);
            assert_eq!(
                reader.join().unwrap(),
                0,
                "North and East were observably green at the same time"
            );
        }
    }

    #[test]
    fn advance_is_suspended_while_preempted() {
        let cfg = fast_cfg();
        let i = four_way(&cfg);
        i.handle_emergency(West);
        // Far past every duration; the forced state must hold.
        i.advance(Instant::now() + Duration::from_secs(60));
        assert_eq!(phases_of(&i)[&West], LightPhase::Green);
        assert_eq!(phases_of(&i)[&North], LightPhase::Red);
    }

    #[test]
    fn end_emergency_restores_normal_cycling() {
        let cfg = fast_cfg();
        let i = four_way(&cfg);
        i.handle_emergency(West);
        i.end_emergency(West);

        assert!(!i.light_for(West).unwrap().snapshot().emergency);
        assert_mutual_exclusion(&i);
        // Back on the current phase group, and ticking again.
        assert_eq!(phases_of(&i)[&North], LightPhase::Green);
        i.advance(Instant::now() + Duration::from_millis(1_000));
        assert_eq!(phases_of(&i)[&North], LightPhase::Yellow);
    }

    #[test]
    fn later_preemption_wins_and_stale_end_is_ignored() {
        let cfg = fast_cfg();
        let i = four_way(&cfg);
        i.handle_emergency(North);
        i.handle_emergency(East);

        // Stale release from the first caller must not disturb the second.
        i.end_emergency(North);
        let phases = phases_of(&i);
        assert_eq!(phases[&East], LightPhase::Green);
        assert_eq!(phases[&North], LightPhase::Red);

        i.end_emergency(East);
        assert_mutual_exclusion(&i);
        assert_eq!(phases_of(&i)[&North], LightPhase::Green);
    }

    #[test]
    fn empty_phase_list_never_blocks_a_tick() {
        let cfg = fast_cfg();
        let i = Intersection::new("I-empty", &cfg);
        i.add_approach(North, &cfg);
        i.configure_phases(Vec::new());
        i.advance(Instant::now() + Duration::from_secs(5));
        assert_eq!(phases_of(&i)[&North], LightPhase::Red);
    }

    #[test]
    fn missing_light_for_scheduled_direction_skips_the_phase() {
        let cfg = fast_cfg();
        let i = Intersection::new("I-miss", &cfg);
        i.add_approach(East, &cfg);
        // North is scheduled but never wired.
        i.configure_phases(vec![North, East]);
        i.advance(Instant::now());
        // The controller skips to the East phase instead of stalling.
        assert_eq!(i.snapshot().phase_index, 1);
        assert_eq!(phases_of(&i)[&East], LightPhase::Green);
    }

    #[test]
    fn emergency_for_unwired_direction_is_ignored() {
        let cfg = fast_cfg();
        let narrow = Intersection::new("I-n", &cfg);
        narrow.add_approach(North, &cfg);
        narrow.configure_phases(vec![North]);
        narrow.handle_emergency(East);
        assert_eq!(narrow.snapshot().emergency, None);
        assert_eq!(phases_of(&narrow)[&North], LightPhase::Green);
    }
}

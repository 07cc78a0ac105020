use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::SimConfig;
use crate::simulation_engine::signal::{LightPhase, TrafficLight};

/// How a vehicle's wait at a signal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassageOutcome {
    ProceededGreen,
    ProceededYellow,
    Aborted,
}

/// Blocks until the given light permits passage, or until shutdown.
///
/// Monitor-style wait: the phase is re-checked after every wake, never
/// assumed from the wake itself, so spurious wakeups and a concurrent
/// re-reddening (emergency preemption) are handled. Each individual wait is
/// bounded by `wait_timeout_ms` so a missed notification can never stall a
/// vehicle past one timeout period.
///
/// On yellow the vehicle proceeds with `yellow_proceed_probability` and the
/// passage is counted on the light; otherwise it keeps waiting for green.
pub async fn request_passage(
    light: &TrafficLight,
    cfg: &SimConfig,
    shutdown: &mut watch::Receiver<bool>,
) -> PassageOutcome {
    loop {
        if *shutdown.borrow() {
            return PassageOutcome::Aborted;
        }

        // Arm the waiter before reading the phase: a transition that lands
        // between the check and the await still completes the future.
        let notified = light.phase_changed();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match light.phase() {
            LightPhase::Green => return PassageOutcome::ProceededGreen,
            LightPhase::Yellow => {
                let p = cfg.yellow_proceed_probability.clamp(0.0, 1.0);
                let proceed = rand::rng().random_bool(p);
                if proceed {
                    light.record_proceed_on_yellow();
                    return PassageOutcome::ProceededYellow;
                }
            }
            LightPhase::Red => {}
        }

        tokio::select! {
            _ = &mut notified => {}
            _ = sleep(Duration::from_millis(cfg.wait_timeout_ms)) => {
                log::debug!("wait at {} timed out, re-checking phase", light.id);
            }
            changed = shutdown.changed() => {
                // A closed channel means the driver is gone; treat as shutdown.
                if changed.is_err() || *shutdown.borrow() {
                    return PassageOutcome::Aborted;
                }
            }
        }
    }
}

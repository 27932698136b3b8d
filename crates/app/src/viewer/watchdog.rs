use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::{info, warn};

use crate::viewer::telemetry;

pub(crate) const WATCHDOG_POLL_INTERVAL_MS: u64 = 500;
pub(crate) const WATCHDOG_STALE_THRESHOLD_MS: u64 = 1_500;
pub(crate) const WATCHDOG_STARTUP_GRACE_MS: u64 = 5_000;

const NO_REQUEST: u64 = 0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum HealthComponent {
    Capture,
    Render,
    Detection,
}

impl HealthComponent {
    pub(crate) const ALL: [HealthComponent; 3] = [
        HealthComponent::Capture,
        HealthComponent::Render,
        HealthComponent::Detection,
    ];

    pub(crate) fn label(self) -> &'static str {
        match self {
            HealthComponent::Capture => "capture",
            HealthComponent::Render => "render",
            HealthComponent::Detection => "detection",
        }
    }
}

/// Heartbeats of the viewer stages, in wall-clock milliseconds.
///
/// Capture and render are stale when they have not beaten recently; detection
/// is stale only while a request has been outstanding for too long.
pub(crate) struct PipelineHealth {
    capture: AtomicU64,
    render: AtomicU64,
    request_started: AtomicU64,
}

impl PipelineHealth {
    pub(crate) fn new() -> Self {
        Self::starting_at(current_millis())
    }

    fn starting_at(now: u64) -> Self {
        let grace_deadline = now.saturating_add(WATCHDOG_STARTUP_GRACE_MS);
        Self {
            capture: AtomicU64::new(grace_deadline),
            render: AtomicU64::new(grace_deadline),
            request_started: AtomicU64::new(NO_REQUEST),
        }
    }

    pub(crate) fn beat(&self, component: HealthComponent) {
        self.beat_at(component, current_millis());
    }

    fn beat_at(&self, component: HealthComponent, now: u64) {
        match component {
            HealthComponent::Capture => self.capture.store(now, Ordering::Relaxed),
            HealthComponent::Render => self.render.store(now, Ordering::Relaxed),
            HealthComponent::Detection => self.request_finished(),
        }
    }

    pub(crate) fn request_started(&self) {
        self.request_started.store(current_millis(), Ordering::Relaxed);
    }

    pub(crate) fn request_finished(&self) {
        self.request_started.store(NO_REQUEST, Ordering::Relaxed);
    }

    pub(crate) fn is_stale(&self, component: HealthComponent, now: u64) -> bool {
        let last = match component {
            HealthComponent::Capture => self.capture.load(Ordering::Relaxed),
            HealthComponent::Render => self.render.load(Ordering::Relaxed),
            HealthComponent::Detection => match self.request_started.load(Ordering::Relaxed) {
                NO_REQUEST => return false,
                started => started,
            },
        };
        now.saturating_sub(last) > WATCHDOG_STALE_THRESHOLD_MS
    }
}

/// Report stalled stages until `running` drops.
///
/// The watchdog only observes: a stalled detection request stays outstanding
/// and keeps the throttler closed until the transport resolves it.
pub(crate) fn spawn_watchdog(
    health: Arc<PipelineHealth>,
    running: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("viewer-watchdog", move || {
        let mut stalled = [false; HealthComponent::ALL.len()];
        while running.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(WATCHDOG_POLL_INTERVAL_MS));
            let now = current_millis();
            for (index, component) in HealthComponent::ALL.into_iter().enumerate() {
                let stale = health.is_stale(component, now);
                if stale && !stalled[index] {
                    warn!("Watchdog detected stalled {} stage", component.label());
                    metrics::counter!("overlay_watchdog_stalls_total", "component" => component.label())
                        .increment(1);
                } else if !stale && stalled[index] {
                    info!("{} stage recovered", component.label());
                }
                stalled[index] = stale;
                metrics::gauge!("overlay_stage_stalled", "component" => component.label())
                    .set(if stale { 1.0 } else { 0.0 });
            }
        }
    })
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_000_000;

    #[test]
    fn startup_grace_hides_missing_heartbeats() {
        let health = PipelineHealth::starting_at(T0);
        let within_grace = T0 + WATCHDOG_STARTUP_GRACE_MS;
        assert!(!health.is_stale(HealthComponent::Capture, within_grace));
        let after_grace = T0 + WATCHDOG_STARTUP_GRACE_MS + WATCHDOG_STALE_THRESHOLD_MS + 1;
        assert!(health.is_stale(HealthComponent::Capture, after_grace));
        assert!(health.is_stale(HealthComponent::Render, after_grace));
    }

    #[test]
    fn heartbeat_resets_staleness() {
        let health = PipelineHealth::starting_at(T0);
        let later = T0 + 20_000;
        health.beat_at(HealthComponent::Render, later);
        assert!(!health.is_stale(HealthComponent::Render, later + WATCHDOG_STALE_THRESHOLD_MS));
        assert!(health.is_stale(HealthComponent::Capture, later));
    }

    #[test]
    fn detection_is_stale_only_while_a_request_lingers() {
        let health = PipelineHealth::starting_at(T0);
        assert!(!health.is_stale(HealthComponent::Detection, u64::MAX));

        health.request_started.store(T0, Ordering::Relaxed);
        assert!(!health.is_stale(HealthComponent::Detection, T0 + 100));
        assert!(health.is_stale(HealthComponent::Detection, T0 + WATCHDOG_STALE_THRESHOLD_MS + 1));

        health.beat_at(HealthComponent::Detection, T0 + 5_000);
        assert!(!health.is_stale(HealthComponent::Detection, u64::MAX));
    }
}

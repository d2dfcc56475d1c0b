//! Health polling and the live safety gate.
//!
//! [`HealthMonitor`] runs on its own task and cadence: it samples the
//! telemetry source, probes stack liveness, and publishes a
//! [`TelemetrySnapshot`] on a watch channel. It only produces read snapshots
//! and never touches the navigation state.
//!
//! [`LiveSafetyGate`] combines the latest snapshot, the liveness watchdog and
//! the kernel [`SafetyGate`] into the runtime's [`SafetyCheck`]. A battery
//! value older than the liveness window counts as unknown, so a robot that
//! never published telemetry stays blocked.
//!
//! [`SafetyCheck`]: crate::mission::SafetyCheck

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use navcore_kernel::{ComponentHealth, SafetyGate, SafetyInputs, Watchdog};
use navcore_middleware::{NavigationStack, TelemetrySource};
use navcore_types::{NavigationGoal, SafetyVerdict, TelemetrySnapshot};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Watchdog id of the navigation stack.
pub const STACK_COMPONENT: &str = "navigation_stack";
/// Watchdog id of the telemetry feed; reported on every battery reading.
pub const TELEMETRY_COMPONENT: &str = "telemetry";

/// Watchdog clock. Uses tokio's clock so paused-time tests see consistent
/// instants.
fn now() -> std::time::Instant {
    Instant::now().into_std()
}

// ─────────────────────────────────────────────────────────────────────────────
// HealthMonitor
// ─────────────────────────────────────────────────────────────────────────────

pub struct HealthMonitor {
    stack: Arc<dyn NavigationStack>,
    telemetry: Arc<dyn TelemetrySource>,
    watchdog: Arc<Mutex<Watchdog>>,
    snapshot: watch::Sender<TelemetrySnapshot>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        stack: Arc<dyn NavigationStack>,
        telemetry: Arc<dyn TelemetrySource>,
        liveness_window: Duration,
        interval: Duration,
    ) -> Self {
        let mut watchdog = Watchdog::new();
        watchdog.register(STACK_COMPONENT, liveness_window);
        watchdog.register(TELEMETRY_COMPONENT, liveness_window);
        let (snapshot, _) = watch::channel(TelemetrySnapshot::default());
        Self {
            stack,
            telemetry,
            watchdog: Arc::new(Mutex::new(watchdog)),
            snapshot,
            interval,
        }
    }

    pub fn watchdog(&self) -> Arc<Mutex<Watchdog>> {
        Arc::clone(&self.watchdog)
    }

    pub fn subscribe(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.snapshot.subscribe()
    }

    /// Take one sample. Failed readings keep the previous value, which the
    /// gate stops trusting once the liveness window passes.
    pub async fn poll_once(&self) {
        let mut next = self.snapshot.borrow().clone();
        match self.telemetry.battery_percent().await {
            Ok(p) => {
                next.battery_percent = p;
                self.watchdog.lock().report_active_at(TELEMETRY_COMPONENT, now());
            }
            Err(e) => debug!(error = %e, "battery reading unavailable"),
        }
        match self.telemetry.min_obstacle_range().await {
            Ok(r) => next.min_obstacle_range_m = r,
            Err(e) => debug!(error = %e, "obstacle range unavailable"),
        }
        next.robot_pose = self.telemetry.robot_pose().await.or(next.robot_pose);
        next.sampled_at = Utc::now();

        if self.stack.is_active().await {
            self.watchdog.lock().report_active_at(STACK_COMPONENT, now());
        } else {
            warn!("navigation stack did not report active");
        }
        self.snapshot.send_replace(next);
    }

    /// Poll forever on the configured cadence.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.poll_once().await;
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LiveSafetyGate
// ─────────────────────────────────────────────────────────────────────────────

pub struct LiveSafetyGate {
    gate: SafetyGate,
    snapshot: watch::Receiver<TelemetrySnapshot>,
    watchdog: Arc<Mutex<Watchdog>>,
}

impl LiveSafetyGate {
    pub fn new(
        gate: SafetyGate,
        snapshot: watch::Receiver<TelemetrySnapshot>,
        watchdog: Arc<Mutex<Watchdog>>,
    ) -> Self {
        Self {
            gate,
            snapshot,
            watchdog,
        }
    }

    fn inputs(&self, goal: &NavigationGoal) -> SafetyInputs {
        let sample = self.snapshot.borrow();
        let (stack_live, telemetry_fresh) = {
            let watchdog = self.watchdog.lock();
            let at = now();
            (
                watchdog.health_at(STACK_COMPONENT, at) == ComponentHealth::Healthy,
                watchdog.health_at(TELEMETRY_COMPONENT, at) == ComponentHealth::Healthy,
            )
        };
        SafetyInputs {
            battery_percent: telemetry_fresh.then_some(sample.battery_percent),
            min_obstacle_range_m: sample.min_obstacle_range_m,
            robot_pose: sample.robot_pose,
            stack_live,
            goal_target: goal.target,
        }
    }
}

impl crate::mission::SafetyCheck for LiveSafetyGate {
    fn evaluate(&self, goal: &NavigationGoal) -> SafetyVerdict {
        self.gate.evaluate(&self.inputs(goal))
    }
}

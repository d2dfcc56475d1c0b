//! [`Navigator`] – the caller-facing facade.
//!
//! Owns the navigation state, the health monitor task and at most one
//! mission task, and exposes the operations a CLI or API layer needs:
//!
//! | Operation                     | Effect                                               |
//! |-------------------------------|------------------------------------------------------|
//! | [`start_mission`]             | validate, expand and launch an intent                |
//! | [`cancel_mission`]            | stop the active mission (no-op when none)            |
//! | [`pause_mission`] / [`resume_mission`] | hold / release the mission at its next goal |
//! | [`status`] / [`watch_status`] | snapshot / change stream of the navigation state     |
//! | [`subscribe_progress`]        | distance-remaining updates for the in-flight goal    |
//! | [`set_home`]                  | pose used by `ReturnHome`                            |
//! | [`reset`]                     | clear state back to `Idle` (refused while active)    |
//! | mapping control               | [`start_mapping`], [`save_map`], [`load_map`], [`finish_mapping`] |
//!
//! [`start_mission`]: Navigator::start_mission
//! [`cancel_mission`]: Navigator::cancel_mission
//! [`pause_mission`]: Navigator::pause_mission
//! [`resume_mission`]: Navigator::resume_mission
//! [`status`]: Navigator::status
//! [`watch_status`]: Navigator::watch_status
//! [`subscribe_progress`]: Navigator::subscribe_progress
//! [`set_home`]: Navigator::set_home
//! [`reset`]: Navigator::reset
//! [`start_mapping`]: Navigator::start_mapping
//! [`save_map`]: Navigator::save_map
//! [`load_map`]: Navigator::load_map
//! [`finish_mapping`]: Navigator::finish_mapping

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use navcore_kernel::SafetyGate;
use navcore_middleware::{NavigationStack, TelemetrySource};
use navcore_types::{GoalProgress, MissionIntent, NavError, NavMode, Pose, TelemetrySnapshot};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::NavigatorConfig;
use crate::executor::GoalExecutor;
use crate::health::{HealthMonitor, LiveSafetyGate};
use crate::mission::{
    GoalRecorder, LapPlan, MissionEnd, MissionSequencer, SafetyCheck, expand_intent, goals_for,
};
use crate::state::{NavigationState, StateStore};

struct MissionHandle {
    id: Uuid,
    cancel: watch::Sender<bool>,
    task: JoinHandle<MissionEnd>,
}

pub struct Navigator {
    config: NavigatorConfig,
    state: StateStore,
    stack: Arc<dyn NavigationStack>,
    executor: Arc<GoalExecutor>,
    recorder: Option<Arc<dyn GoalRecorder>>,
    gate: Arc<dyn SafetyCheck>,
    telemetry: watch::Receiver<TelemetrySnapshot>,
    home: Mutex<Pose>,
    mission: Mutex<Option<MissionHandle>>,
    monitor: JoinHandle<()>,
}

impl Navigator {
    /// Build a navigator and start health polling. The first telemetry
    /// sample and liveness probe complete before this returns.
    pub async fn new(
        config: NavigatorConfig,
        stack: Arc<dyn NavigationStack>,
        telemetry: Arc<dyn TelemetrySource>,
    ) -> Self {
        Self::build(config, stack, telemetry, None).await
    }

    /// Like [`new`](Self::new), also writing every goal outcome to `recorder`.
    pub async fn with_recorder(
        config: NavigatorConfig,
        stack: Arc<dyn NavigationStack>,
        telemetry: Arc<dyn TelemetrySource>,
        recorder: Arc<dyn GoalRecorder>,
    ) -> Self {
        Self::build(config, stack, telemetry, Some(recorder)).await
    }

    async fn build(
        config: NavigatorConfig,
        stack: Arc<dyn NavigationStack>,
        telemetry: Arc<dyn TelemetrySource>,
        recorder: Option<Arc<dyn GoalRecorder>>,
    ) -> Self {
        let state = StateStore::new();

        let monitor = HealthMonitor::new(
            Arc::clone(&stack),
            telemetry,
            config.stack_liveness_window,
            config.telemetry_poll_interval,
        );
        monitor.poll_once().await;
        let rules = SafetyGate::standard(config.low_battery_percent, config.safety_clearance_m);
        info!(rules = ?rules.rule_names(), "safety gate ready");
        let gate = Arc::new(LiveSafetyGate::new(rules, monitor.subscribe(), monitor.watchdog()));
        let telemetry_rx = monitor.subscribe();
        let monitor = monitor.spawn();

        let executor =
            GoalExecutor::new(Arc::clone(&stack)).with_cancel_ack_timeout(config.cancel_ack_timeout);

        Self {
            home: Mutex::new(config.home),
            config,
            state,
            stack,
            executor: Arc::new(executor),
            recorder,
            gate,
            telemetry: telemetry_rx,
            mission: Mutex::new(None),
            monitor,
        }
    }

    pub fn config(&self) -> &NavigatorConfig {
        &self.config
    }

    // ── Missions ────────────────────────────────────────────────────────────

    /// Validate `intent`, queue its goals and run it on a new task.
    ///
    /// # Errors
    ///
    /// - [`NavError::InvalidIntent`] for empty lists or non-finite poses.
    /// - [`NavError::AlreadyRunning`] while another mission is active.
    /// - [`NavError::MappingInProgress`] while a mapping session is open.
    pub async fn start_mission(&self, intent: MissionIntent) -> Result<Uuid, NavError> {
        intent.validate()?;
        let route = expand_intent(&intent, self.home());
        let laps = LapPlan::for_intent(&intent);
        let kind = intent.kind();
        let mission_id = Uuid::new_v4();

        let mut slot = self.mission.lock();
        self.state.try_begin_mission(
            mission_id,
            intent,
            goals_for(&route, self.config.default_tolerance_m),
        )?;

        let (cancel, cancel_rx) = watch::channel(false);
        let gate = Arc::clone(&self.gate);
        let policy = self.config.sequencer_policy();
        let sequencer = match &self.recorder {
            Some(recorder) => MissionSequencer::with_recorder(
                self.state.clone(),
                gate,
                self.executor.clone(),
                policy,
                Arc::clone(recorder),
            ),
            None => MissionSequencer::new(self.state.clone(), gate, self.executor.clone(), policy),
        };
        let task =
            tokio::spawn(async move { sequencer.run(mission_id, &route, laps, cancel_rx).await });
        *slot = Some(MissionHandle {
            id: mission_id,
            cancel,
            task,
        });
        info!(%mission_id, kind, "mission accepted");
        Ok(mission_id)
    }

    /// Stop the active mission and wait until its task has finished. The
    /// in-flight goal is cancelled at the stack first. Calling this with no
    /// active mission does nothing.
    pub async fn cancel_mission(&self) -> Result<(), NavError> {
        let Some(handle) = self.mission.lock().take() else {
            return Ok(());
        };
        if handle.task.is_finished() {
            return Ok(());
        }
        info!(mission_id = %handle.id, "cancel requested");
        let _ = handle.cancel.send(true);
        match handle.task.await {
            Ok(end) => info!(mission_id = %handle.id, ?end, "mission stopped"),
            Err(e) => warn!(mission_id = %handle.id, error = %e, "mission task failed"),
        }
        Ok(())
    }

    /// Hold the active mission before its next goal. The goal in flight, if
    /// any, runs to its outcome; the mission then sits in `Paused` until
    /// [`resume_mission`](Self::resume_mission) or a cancel.
    ///
    /// # Errors
    ///
    /// [`NavError::NoMission`] when no mission is active.
    pub fn pause_mission(&self) -> Result<(), NavError> {
        self.state.request_hold()?;
        info!("mission hold requested");
        Ok(())
    }

    /// # Errors
    ///
    /// [`NavError::NoMission`] when no mission is active.
    pub fn resume_mission(&self) -> Result<(), NavError> {
        self.state.release_hold()?;
        info!("mission hold released");
        Ok(())
    }

    /// Wait for the current mission to end on its own and return how it
    /// ended. Looping intents without a lap limit only end through
    /// [`cancel_mission`](Self::cancel_mission).
    pub async fn wait_mission(&self) -> Option<MissionEnd> {
        let mut rx = self.state.subscribe();
        if rx.wait_for(|s| !s.mission_active()).await.is_err() {
            return None;
        }
        let handle = self.mission.lock().take()?;
        handle.task.await.ok()
    }

    // ── Status ──────────────────────────────────────────────────────────────

    pub fn status(&self) -> NavigationState {
        self.state.snapshot()
    }

    pub fn watch_status(&self) -> watch::Receiver<NavigationState> {
        self.state.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<GoalProgress> {
        self.executor.subscribe_progress()
    }

    /// Most recent health sample.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.borrow().clone()
    }

    // ── Home / reset ────────────────────────────────────────────────────────

    pub fn home(&self) -> Pose {
        *self.home.lock()
    }

    /// Takes effect for the next `ReturnHome` mission.
    pub fn set_home(&self, pose: Pose) -> Result<(), NavError> {
        if !pose.is_finite() {
            return Err(NavError::InvalidIntent(format!("home pose {pose} is not finite")));
        }
        *self.home.lock() = pose;
        info!(home = %pose, "home pose updated");
        Ok(())
    }

    /// # Errors
    ///
    /// [`NavError::MissionActive`] while a mission runs.
    pub fn reset(&self) -> Result<(), NavError> {
        self.state.reset()?;
        info!("navigation state reset");
        Ok(())
    }

    // ── Mapping control ─────────────────────────────────────────────────────

    pub async fn start_mapping(&self) -> Result<(), NavError> {
        self.state.begin_mapping()?;
        if let Err(e) = self.stack.start_mapping().await {
            self.state.end_mapping();
            return Err(e);
        }
        info!("mapping started");
        Ok(())
    }

    pub async fn save_map(&self, name: &str) -> Result<(), NavError> {
        let name = checked_map_name(name)?;
        if self.state.mode() != NavMode::Mapping {
            return Err(NavError::Stack("no mapping session to save".to_string()));
        }
        self.stack.save_map(name).await?;
        self.state.set_active_map(name);
        info!(map = name, "map saved");
        Ok(())
    }

    pub async fn load_map(&self, name: &str) -> Result<(), NavError> {
        let name = checked_map_name(name)?;
        let s = self.state.snapshot();
        if s.mission_active() {
            return Err(NavError::MissionActive);
        }
        if s.mode == NavMode::Mapping {
            return Err(NavError::MappingInProgress);
        }
        self.stack.load_map(name).await?;
        self.state.set_active_map(name);
        info!(map = name, "map loaded");
        Ok(())
    }

    /// Close the mapping session. Returns `false` if none was open.
    pub fn finish_mapping(&self) -> bool {
        let closed = self.state.end_mapping();
        if closed {
            info!("mapping finished");
        }
        closed
    }

    // ── Reports ─────────────────────────────────────────────────────────────

    /// Plain-text status report.
    pub fn summary(&self) -> String {
        let s = self.state.snapshot();
        let t = self.telemetry();
        let mut out = String::new();

        let _ = writeln!(out, "mode:                 {}", s.mode);
        match (&s.mission_id, &s.current_intent) {
            (Some(id), Some(intent)) => {
                let _ = writeln!(out, "mission:              {id} ({})", intent.kind());
            }
            _ => {
                let _ = writeln!(out, "mission:              none");
            }
        }
        match &s.current_goal {
            Some(goal) => {
                let _ = writeln!(out, "current goal:         {}", goal.target);
            }
            None => {
                let _ = writeln!(out, "current goal:         none");
            }
        }
        let _ = writeln!(out, "queued goals:         {}", s.goal_queue.len());
        let _ = writeln!(out, "consecutive failures: {}", s.consecutive_failures);
        let succeeded = s.history.iter().filter(|r| r.outcome.is_success()).count();
        let _ = writeln!(
            out,
            "goals finished:       {} ({succeeded} succeeded)",
            s.history.len()
        );
        if let Some(last) = s.last_record() {
            let _ = match last.outcome.reason() {
                Some(reason) => writeln!(
                    out,
                    "last outcome:         {} at {}: {reason}",
                    last.outcome.label(),
                    last.goal.target
                ),
                None => writeln!(
                    out,
                    "last outcome:         {} at {}",
                    last.outcome.label(),
                    last.goal.target
                ),
            };
        }
        let _ = writeln!(
            out,
            "active map:           {}",
            s.active_map.as_deref().unwrap_or("none")
        );
        let _ = writeln!(out, "home:                 {}", self.home());
        let _ = write!(
            out,
            "battery:              {:.1}%   nearest obstacle: {:.2} m",
            t.battery_percent, t.min_obstacle_range_m
        );
        out
    }

    /// Write the current state (mode, intent, queue, history) to `path` as
    /// pretty-printed JSON.
    pub fn export_history(&self, path: impl AsRef<Path>) -> Result<(), NavError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.state.snapshot())
            .map_err(|e| NavError::Serialization(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| NavError::Serialization(format!("write {}: {e}", path.display())))?;
        info!(path = %path.display(), "history exported");
        Ok(())
    }
}

impl Drop for Navigator {
    fn drop(&mut self) {
        self.monitor.abort();
        if let Some(handle) = self.mission.get_mut().take() {
            let _ = handle.cancel.send(true);
        }
    }
}

fn checked_map_name(name: &str) -> Result<&str, NavError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(NavError::Config("map name must not be empty".to_string()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcore_middleware::{SimNavStack, SimTelemetry};
    use std::time::Duration;

    async fn navigator(stack: &SimNavStack) -> Navigator {
        Navigator::new(
            NavigatorConfig::default(),
            Arc::new(stack.clone()),
            Arc::new(SimTelemetry::new()),
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_intent_is_rejected_before_anything_runs() {
        let stack = SimNavStack::new();
        let nav = navigator(&stack).await;
        let bad = MissionIntent::WaypointList {
            poses: vec![],
            looping: false,
            laps: None,
        };
        assert!(matches!(nav.start_mission(bad).await, Err(NavError::InvalidIntent(_))));
        assert!(stack.dispatched().is_empty());
        assert_eq!(nav.status().mode, NavMode::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_already_running() {
        let stack = SimNavStack::new();
        let nav = navigator(&stack).await;
        nav.start_mission(MissionIntent::default_patrol()).await.unwrap();
        assert_eq!(
            nav.start_mission(MissionIntent::ReturnHome).await,
            Err(NavError::AlreadyRunning)
        );
        nav.cancel_mission().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn return_home_uses_latest_home() {
        let stack = SimNavStack::new();
        let nav = navigator(&stack).await;
        nav.set_home(Pose::new(2.0, -1.0, 0.5)).unwrap();
        nav.start_mission(MissionIntent::ReturnHome).await.unwrap();
        assert_eq!(nav.wait_mission().await, Some(MissionEnd::Completed));
        assert_eq!(stack.dispatched(), vec![Pose::new(2.0, -1.0, 0.5)]);
        assert!(nav.set_home(Pose::new(f64::INFINITY, 0.0, 0.0)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_refused_while_active_then_clears_history() {
        let stack = SimNavStack::new();
        let nav = navigator(&stack).await;
        nav.start_mission(MissionIntent::default_patrol()).await.unwrap();
        assert_eq!(nav.reset(), Err(NavError::MissionActive));
        nav.cancel_mission().await.unwrap();
        nav.reset().unwrap();
        let s = nav.status();
        assert_eq!(s.mode, NavMode::Idle);
        assert!(s.history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn mapping_session_round_trip() {
        let stack = SimNavStack::new();
        let nav = navigator(&stack).await;
        nav.start_mapping().await.unwrap();
        assert_eq!(nav.status().mode, NavMode::Mapping);
        assert_eq!(
            nav.start_mission(MissionIntent::ReturnHome).await,
            Err(NavError::MappingInProgress)
        );
        assert_eq!(nav.load_map("lab").await, Err(NavError::MappingInProgress));
        assert!(nav.save_map("  ").await.is_err());
        nav.save_map("lab").await.unwrap();
        assert!(nav.finish_mapping());
        nav.load_map("lab").await.unwrap();
        assert_eq!(stack.loaded_map().as_deref(), Some("lab"));
        assert_eq!(nav.status().active_map.as_deref(), Some("lab"));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_needs_an_active_mission() {
        let stack = SimNavStack::new();
        let nav = navigator(&stack).await;
        assert_eq!(nav.pause_mission(), Err(NavError::NoMission));
        assert_eq!(nav.resume_mission(), Err(NavError::NoMission));
    }

    #[tokio::test(start_paused = true)]
    async fn lap_limited_patrol_completes_on_its_own() {
        let stack = SimNavStack::new();
        let nav = navigator(&stack).await;
        let route = vec![Pose::new(1.0, 0.0, 0.0), Pose::new(0.0, 0.0, 0.0)];
        let intent = MissionIntent::patrol(route).unwrap().with_laps(2).unwrap();
        nav.start_mission(intent).await.unwrap();
        assert_eq!(nav.wait_mission().await, Some(MissionEnd::Completed));
        assert_eq!(stack.dispatched().len(), 4);
        assert_eq!(nav.status().mode, NavMode::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn mapping_refused_while_mission_active() {
        let stack = SimNavStack::new();
        let nav = navigator(&stack).await;
        nav.start_mission(MissionIntent::default_patrol()).await.unwrap();
        assert_eq!(nav.start_mapping().await, Err(NavError::AlreadyRunning));
        nav.cancel_mission().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn summary_and_export() {
        let stack = SimNavStack::new();
        let nav = navigator(&stack).await;
        nav.start_mission(MissionIntent::single_goal(Pose::new(1.0, 0.0, 0.0)).unwrap())
            .await
            .unwrap();
        nav.wait_mission().await;

        let summary = nav.summary();
        assert!(summary.contains("mode:                 idle"));
        assert!(summary.contains("goals finished:       1 (1 succeeded)"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        nav.export_history(&path).unwrap();
        let exported: NavigationState =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(exported.history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_stream_reports_distance() {
        let stack = SimNavStack::new().with_default_response(
            navcore_middleware::SimResponse::succeed_after(Duration::from_millis(100)),
        );
        let nav = navigator(&stack).await;
        let mut progress = nav.subscribe_progress();
        nav.start_mission(MissionIntent::single_goal(Pose::new(3.0, 4.0, 0.0)).unwrap())
            .await
            .unwrap();
        let update = progress.recv().await.unwrap();
        assert!((update.distance_remaining_m - 5.0).abs() < 1e-9);
        nav.wait_mission().await;
    }
}

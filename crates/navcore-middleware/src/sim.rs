//! In-process simulation backends for headless runs and tests.
//!
//! [`SimNavStack`] accepts goals, records every dispatched pose and cancel
//! request, and answers on its notification stream according to a script of
//! [`SimResponse`]s. [`SimTelemetry`] serves battery / obstacle / pose values
//! that tests can change at any time.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use navcore_middleware::sim::{SimNavStack, SimResponse};
//!
//! let stack = SimNavStack::new()
//!     .with_default_response(SimResponse::succeed_after(Duration::from_millis(10)))
//!     .with_script([SimResponse::Fail { code: 6, after: Duration::ZERO }]);
//! assert!(stack.dispatched().is_empty());
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use navcore_types::{GoalHandle, GoalStatus, NavError, Pose, StackEvent};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::adapter::{NavigationStack, TelemetrySource};
use crate::status::StatusBook;

const EVENT_CAPACITY: usize = 256;

// ────────────────────────────────────────────────────────────────────────────
// Scripted responses
// ────────────────────────────────────────────────────────────────────────────

/// How the simulated stack answers one dispatched goal.
#[derive(Debug, Clone, PartialEq)]
pub enum SimResponse {
    /// Report `Succeeded` after `after`; the simulated robot ends at the target.
    Succeed { after: Duration },
    /// Report `Failed(code)` after `after`.
    Fail { code: i32, after: Duration },
    /// Accept the goal and never report a terminal status.
    Silent,
    /// Refuse the dispatch call itself.
    Reject(String),
}

impl SimResponse {
    pub fn succeed_after(after: Duration) -> Self {
        SimResponse::Succeed { after }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimNavStack
// ────────────────────────────────────────────────────────────────────────────

struct SimState {
    next_goal: u64,
    default_response: SimResponse,
    script: VecDeque<SimResponse>,
    dispatched: Vec<Pose>,
    cancels: Vec<GoalHandle>,
    in_flight: HashMap<GoalHandle, JoinHandle<()>>,
    statuses: StatusBook,
    active: bool,
    ack_cancels: bool,
    mapping: bool,
    saved_maps: Vec<String>,
    loaded_map: Option<String>,
    robot_pose: Pose,
}

/// Scriptable stand-in for the navigation stack. Cheap to clone; all clones
/// share state.
#[derive(Clone)]
pub struct SimNavStack {
    state: Arc<Mutex<SimState>>,
    events: broadcast::Sender<StackEvent>,
}

impl Default for SimNavStack {
    fn default() -> Self {
        Self::new()
    }
}

impl SimNavStack {
    /// An active stack that succeeds every goal immediately.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(SimState {
                next_goal: 0,
                default_response: SimResponse::succeed_after(Duration::ZERO),
                script: VecDeque::new(),
                dispatched: Vec::new(),
                cancels: Vec::new(),
                in_flight: HashMap::new(),
                statuses: StatusBook::default(),
                active: true,
                ack_cancels: true,
                mapping: false,
                saved_maps: Vec::new(),
                loaded_map: None,
                robot_pose: Pose::origin(),
            })),
            events,
        }
    }

    /// Response used once the script is exhausted.
    pub fn with_default_response(self, response: SimResponse) -> Self {
        self.state.lock().default_response = response;
        self
    }

    /// Responses consumed in order, one per dispatched goal.
    pub fn with_script(self, responses: impl IntoIterator<Item = SimResponse>) -> Self {
        self.state.lock().script.extend(responses);
        self
    }

    /// When `false`, cancel requests are recorded but never acknowledged.
    pub fn with_cancel_acks(self, ack: bool) -> Self {
        self.state.lock().ack_cancels = ack;
        self
    }

    pub fn set_active(&self, active: bool) {
        self.state.lock().active = active;
    }

    /// Every pose passed to `dispatch_goal`, in call order.
    pub fn dispatched(&self) -> Vec<Pose> {
        self.state.lock().dispatched.clone()
    }

    /// Every handle passed to `cancel_goal`, in call order.
    pub fn cancel_requests(&self) -> Vec<GoalHandle> {
        self.state.lock().cancels.clone()
    }

    pub fn loaded_map(&self) -> Option<String> {
        self.state.lock().loaded_map.clone()
    }

    /// Where the simulated robot currently is (the last reached target).
    pub fn robot_pose(&self) -> Pose {
        self.state.lock().robot_pose
    }

    /// Publish an arbitrary notification, e.g. a late or duplicate status.
    /// Status events also update what `goal_status` reports.
    pub fn emit(&self, event: StackEvent) {
        self.state.lock().statuses.observe(&event);
        let _ = self.events.send(event);
    }

    /// Terminal status from a goal's own timer. A goal whose task was
    /// already taken out of `in_flight` was cancelled first and stays quiet.
    fn finish(&self, handle: &GoalHandle, status: GoalStatus, target: Option<Pose>) {
        {
            let mut st = self.state.lock();
            if st.in_flight.remove(handle).is_none() {
                return;
            }
            if let Some(pose) = target {
                st.robot_pose = pose;
            }
            st.statuses.record(handle, status.clone());
        }
        let _ = self.events.send(StackEvent::Status {
            handle: handle.clone(),
            status,
        });
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}

#[async_trait]
impl NavigationStack for SimNavStack {
    async fn dispatch_goal(
        &self,
        target: Pose,
        _tolerance: Option<f64>,
    ) -> Result<GoalHandle, NavError> {
        let (handle, response, start) = {
            let mut st = self.state.lock();
            st.dispatched.push(target);
            let scripted = st.script.pop_front();
            let response = scripted.unwrap_or_else(|| st.default_response.clone());
            if let SimResponse::Reject(reason) = &response {
                return Err(NavError::Stack(reason.clone()));
            }
            st.next_goal += 1;
            (GoalHandle(format!("sim-goal-{}", st.next_goal)), response, st.robot_pose)
        };
        debug!(%handle, %target, "sim stack accepted goal");

        self.emit(StackEvent::Status {
            handle: handle.clone(),
            status: GoalStatus::Accepted,
        });
        self.emit(StackEvent::Feedback {
            handle: handle.clone(),
            distance_remaining_m: start.distance_to(&target),
        });

        let (after, status, reached) = match response {
            SimResponse::Succeed { after } => (after, GoalStatus::Succeeded, Some(target)),
            SimResponse::Fail { code, after } => (after, GoalStatus::Failed(code), None),
            SimResponse::Silent | SimResponse::Reject(_) => return Ok(handle),
        };

        // The task is registered before it can run `finish`, which needs
        // the same lock.
        {
            let mut st = self.state.lock();
            let sim = self.clone();
            let task_handle = handle.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(after).await;
                sim.finish(&task_handle, status, reached);
            });
            st.in_flight.insert(handle.clone(), task);
        }
        Ok(handle)
    }

    async fn cancel_goal(&self, handle: &GoalHandle) -> Result<(), NavError> {
        let ack = {
            let mut st = self.state.lock();
            st.cancels.push(handle.clone());
            if let Some(task) = st.in_flight.remove(handle) {
                task.abort();
            }
            // Finished goals keep their terminal status.
            let ack = st.ack_cancels && st.statuses.is_open(handle);
            if ack {
                st.statuses.record(handle, GoalStatus::Cancelled);
            }
            ack
        };
        if ack {
            let _ = self.events.send(StackEvent::Status {
                handle: handle.clone(),
                status: GoalStatus::Cancelled,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StackEvent> {
        self.events.subscribe()
    }

    async fn goal_status(&self, handle: &GoalHandle) -> Option<GoalStatus> {
        self.state.lock().statuses.get(handle)
    }

    async fn is_active(&self) -> bool {
        self.state.lock().active
    }

    async fn start_mapping(&self) -> Result<(), NavError> {
        self.state.lock().mapping = true;
        Ok(())
    }

    async fn save_map(&self, name: &str) -> Result<(), NavError> {
        let mut st = self.state.lock();
        if !st.mapping {
            return Err(NavError::Stack("no mapping session to save".to_string()));
        }
        st.saved_maps.push(name.to_string());
        Ok(())
    }

    async fn load_map(&self, name: &str) -> Result<(), NavError> {
        let mut st = self.state.lock();
        if !st.saved_maps.iter().any(|m| m == name) {
            return Err(NavError::Stack(format!("map not found: {name}")));
        }
        st.loaded_map = Some(name.to_string());
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimTelemetry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TelemetryValues {
    battery_percent: f64,
    min_obstacle_range_m: f64,
    robot_pose: Option<Pose>,
}

/// Settable telemetry source. Cheap to clone; all clones share values.
#[derive(Clone)]
pub struct SimTelemetry {
    values: Arc<Mutex<TelemetryValues>>,
}

impl Default for SimTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTelemetry {
    /// Full battery, nothing in range, pose unknown.
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(TelemetryValues {
                battery_percent: 100.0,
                min_obstacle_range_m: f64::INFINITY,
                robot_pose: None,
            })),
        }
    }

    pub fn set_battery(&self, percent: f64) {
        self.values.lock().battery_percent = percent.clamp(0.0, 100.0);
    }

    pub fn set_obstacle_range(&self, range_m: f64) {
        self.values.lock().min_obstacle_range_m = range_m;
    }

    pub fn set_pose(&self, pose: Option<Pose>) {
        self.values.lock().robot_pose = pose;
    }
}

#[async_trait]
impl TelemetrySource for SimTelemetry {
    async fn battery_percent(&self) -> Result<f64, NavError> {
        Ok(self.values.lock().battery_percent)
    }

    async fn min_obstacle_range(&self) -> Result<f64, NavError> {
        Ok(self.values.lock().min_obstacle_range_m)
    }

    async fn robot_pose(&self) -> Option<Pose> {
        self.values.lock().robot_pose
    }
}

//! Nav2 backend over a `rosbridge_server` WebSocket.
//!
//! [`RosbridgeNavStack`] speaks the rosbridge v2 JSON protocol:
//!
//! | Concern            | Frame(s)                                                        |
//! |--------------------|-----------------------------------------------------------------|
//! | Goal dispatch      | `send_action_goal` on `/navigate_to_pose`                       |
//! | Goal tolerance     | `call_service` `/controller_server/set_parameters`              |
//! | Goal cancel        | `cancel_action_goal`                                            |
//! | Goal progress      | inbound `action_feedback` / `action_result`                     |
//! | Liveness probe     | `call_service` `/bt_navigator/get_state`                        |
//! | Mapping control    | `call_service` `/slam_toolbox/*`, `/map_server/load_map`        |
//! | Telemetry          | `subscribe` `/battery_state`, `/scan`, `/amcl_pose`             |
//!
//! Frame construction and parsing are plain functions so they can be tested
//! without a socket; [`RosbridgeNavStack::detached`] exposes the outbound
//! frame queue for the same purpose.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use navcore_types::{GoalHandle, GoalStatus, NavError, Pose, StackEvent};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::adapter::{NavigationStack, TelemetrySource};
use crate::status::StatusBook;

pub const NAVIGATE_ACTION: &str = "/navigate_to_pose";
pub const NAVIGATE_ACTION_TYPE: &str = "nav2_msgs/action/NavigateToPose";
const LIFECYCLE_SERVICE: &str = "/bt_navigator/get_state";
const SLAM_RESET_SERVICE: &str = "/slam_toolbox/reset";
const SLAM_SAVE_SERVICE: &str = "/slam_toolbox/save_map";
const MAP_LOAD_SERVICE: &str = "/map_server/load_map";
const CONTROLLER_PARAMS_SERVICE: &str = "/controller_server/set_parameters";
const GOAL_TOLERANCE_PARAM: &str = "general_goal_checker.xy_goal_tolerance";
/// `rcl_interfaces/msg/ParameterType` for doubles.
const PARAMETER_DOUBLE: i64 = 3;

/// `action_msgs/msg/GoalStatus` codes.
const STATUS_SUCCEEDED: i64 = 4;
const STATUS_CANCELED: i64 = 5;

const EVENT_CAPACITY: usize = 256;
const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(5);

// ────────────────────────────────────────────────────────────────────────────
// Outbound frames
// ────────────────────────────────────────────────────────────────────────────

/// `send_action_goal` for `NavigateToPose` in the `map` frame.
pub fn goal_frame(id: &str, target: &Pose) -> Value {
    let half = target.yaw / 2.0;
    json!({
        "op": "send_action_goal",
        "id": id,
        "action": NAVIGATE_ACTION,
        "action_type": NAVIGATE_ACTION_TYPE,
        "args": {
            "pose": {
                "header": { "frame_id": "map" },
                "pose": {
                    "position": { "x": target.x, "y": target.y, "z": 0.0 },
                    "orientation": { "x": 0.0, "y": 0.0, "z": half.sin(), "w": half.cos() }
                }
            }
        },
        "feedback": true
    })
}

/// Sets the controller's goal checker position tolerance ahead of a goal.
pub fn tolerance_frame(id: &str, tolerance_m: f64) -> Value {
    service_frame(
        id,
        CONTROLLER_PARAMS_SERVICE,
        json!({
            "parameters": [{
                "name": GOAL_TOLERANCE_PARAM,
                "value": { "type": PARAMETER_DOUBLE, "double_value": tolerance_m }
            }]
        }),
    )
}

pub fn cancel_frame(id: &str) -> Value {
    json!({ "op": "cancel_action_goal", "id": id, "action": NAVIGATE_ACTION })
}

pub fn service_frame(id: &str, service: &str, args: Value) -> Value {
    json!({ "op": "call_service", "id": id, "service": service, "args": args })
}

pub fn subscribe_frame(topic: &str, msg_type: &str) -> Value {
    json!({ "op": "subscribe", "topic": topic, "type": msg_type })
}

fn telemetry_subscriptions() -> [Value; 3] {
    [
        subscribe_frame("/battery_state", "sensor_msgs/msg/BatteryState"),
        subscribe_frame("/scan", "sensor_msgs/msg/LaserScan"),
        subscribe_frame("/amcl_pose", "geometry_msgs/msg/PoseWithCovarianceStamped"),
    ]
}

// ────────────────────────────────────────────────────────────────────────────
// Inbound frames
// ────────────────────────────────────────────────────────────────────────────

/// A rosbridge frame the backend cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Stack(StackEvent),
    ServiceResponse { id: String, ok: bool, values: Value },
    Battery(f64),
    ObstacleRange(f64),
    Pose(Pose),
}

/// Decode one text frame. Unknown or malformed frames yield `None`.
pub fn parse_frame(text: &str) -> Option<Inbound> {
    let frame: Value = serde_json::from_str(text).ok()?;
    let op = frame.get("op")?.as_str()?;
    match op {
        "action_feedback" => {
            let handle = GoalHandle(frame.get("id")?.as_str()?.to_string());
            let distance = frame.pointer("/values/distance_remaining")?.as_f64()?;
            Some(Inbound::Stack(StackEvent::Feedback {
                handle,
                distance_remaining_m: distance,
            }))
        }
        "action_result" => {
            let handle = GoalHandle(frame.get("id")?.as_str()?.to_string());
            let code = frame.get("status").and_then(Value::as_i64).unwrap_or(-1);
            let status = match code {
                STATUS_SUCCEEDED => GoalStatus::Succeeded,
                STATUS_CANCELED => GoalStatus::Cancelled,
                other => GoalStatus::Failed(other as i32),
            };
            Some(Inbound::Stack(StackEvent::Status { handle, status }))
        }
        "service_response" => Some(Inbound::ServiceResponse {
            id: frame.get("id")?.as_str()?.to_string(),
            ok: frame.get("result").and_then(Value::as_bool).unwrap_or(false),
            values: frame.get("values").cloned().unwrap_or(Value::Null),
        }),
        "publish" => parse_publish(frame.get("topic")?.as_str()?, frame.get("msg")?),
        _ => None,
    }
}

fn parse_publish(topic: &str, msg: &Value) -> Option<Inbound> {
    match topic {
        "/battery_state" => {
            let fraction = msg.get("percentage")?.as_f64()?;
            Some(Inbound::Battery((fraction * 100.0).clamp(0.0, 100.0)))
        }
        "/scan" => {
            let closest = msg
                .get("ranges")?
                .as_array()?
                .iter()
                .filter_map(Value::as_f64)
                .filter(|r| r.is_finite() && *r > 0.0)
                .fold(f64::INFINITY, f64::min);
            Some(Inbound::ObstacleRange(closest))
        }
        "/amcl_pose" => {
            let pose = msg.pointer("/pose/pose")?;
            let x = pose.pointer("/position/x")?.as_f64()?;
            let y = pose.pointer("/position/y")?.as_f64()?;
            let z = pose.pointer("/orientation/z")?.as_f64()?;
            let w = pose.pointer("/orientation/w")?.as_f64()?;
            Some(Inbound::Pose(Pose::new(x, y, 2.0 * z.atan2(w))))
        }
        _ => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RosbridgeNavStack
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RobotTelemetry {
    battery_percent: Option<f64>,
    min_obstacle_range_m: Option<f64>,
    robot_pose: Option<Pose>,
}

struct Inner {
    outbound: mpsc::UnboundedSender<String>,
    events: broadcast::Sender<StackEvent>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, oneshot::Sender<(bool, Value)>>>,
    statuses: Mutex<StatusBook>,
    telemetry: Mutex<RobotTelemetry>,
    service_timeout: Duration,
}

impl Inner {
    fn next_id(&self, prefix: &str) -> String {
        format!("navcore-{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn send(&self, frame: Value) -> Result<(), NavError> {
        self.outbound
            .send(frame.to_string())
            .map_err(|_| NavError::Stack("rosbridge connection closed".to_string()))
    }

    fn handle_text(&self, text: &str) {
        let Some(inbound) = parse_frame(text) else {
            return;
        };
        match inbound {
            Inbound::Stack(event) => {
                self.statuses.lock().observe(&event);
                let _ = self.events.send(event);
            }
            Inbound::ServiceResponse { id, ok, values } => {
                if let Some(reply) = self.pending.lock().remove(&id) {
                    let _ = reply.send((ok, values));
                } else {
                    debug!(%id, "service response with no pending call");
                }
            }
            Inbound::Battery(p) => self.telemetry.lock().battery_percent = Some(p),
            Inbound::ObstacleRange(r) => self.telemetry.lock().min_obstacle_range_m = Some(r),
            Inbound::Pose(p) => self.telemetry.lock().robot_pose = Some(p),
        }
    }
}

/// Navigation stack reached through `rosbridge_server`. Cheap to clone.
#[derive(Clone)]
pub struct RosbridgeNavStack {
    inner: Arc<Inner>,
}

impl RosbridgeNavStack {
    /// Connect to `url` (e.g. `ws://localhost:9090`) and subscribe to the
    /// telemetry topics.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::Stack`] if the WebSocket handshake fails.
    pub async fn connect(url: &str) -> Result<Self, NavError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| NavError::Stack(format!("rosbridge connect to {url}: {e}")))?;
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (stack, mut outbound) = Self::detached();

        tokio::spawn(async move {
            while let Some(text) = outbound.recv().await {
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    warn!(error = %e, "rosbridge write failed");
                    break;
                }
            }
        });

        let inner = Arc::clone(&stack.inner);
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => inner.handle_text(text.as_str()),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            warn!("rosbridge connection closed");
            inner.pending.lock().clear();
        });

        for frame in telemetry_subscriptions() {
            stack.inner.send(frame)?;
        }
        info!(%url, "connected to rosbridge");
        Ok(stack)
    }

    /// A backend with no socket attached. Outbound frames are delivered to
    /// the returned receiver and inbound frames are fed with
    /// [`handle_text`](Self::handle_text).
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let stack = Self {
            inner: Arc::new(Inner {
                outbound,
                events,
                next_id: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                statuses: Mutex::new(StatusBook::default()),
                telemetry: Mutex::new(RobotTelemetry::default()),
                service_timeout: DEFAULT_SERVICE_TIMEOUT,
            }),
        };
        (stack, rx)
    }

    /// Process one inbound text frame.
    pub fn handle_text(&self, text: &str) {
        self.inner.handle_text(text);
    }

    async fn call_service(&self, service: &str, args: Value) -> Result<Value, NavError> {
        let id = self.inner.next_id("call");
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id.clone(), tx);
        if let Err(e) = self.inner.send(service_frame(&id, service, args)) {
            self.inner.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.service_timeout, rx).await {
            Ok(Ok((true, values))) => Ok(values),
            Ok(Ok((false, values))) => Err(NavError::Stack(format!("{service} failed: {values}"))),
            Ok(Err(_)) => Err(NavError::Stack(format!("{service}: connection closed"))),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                Err(NavError::Stack(format!("{service}: no response")))
            }
        }
    }
}

#[async_trait]
impl NavigationStack for RosbridgeNavStack {
    async fn dispatch_goal(
        &self,
        target: Pose,
        tolerance: Option<f64>,
    ) -> Result<GoalHandle, NavError> {
        if let Some(tolerance_m) = tolerance {
            // Not awaited: the reply is logged and dropped by `handle_text`.
            let call = self.inner.next_id("call");
            self.inner.send(tolerance_frame(&call, tolerance_m))?;
            debug!(%call, tolerance_m, "goal tolerance sent to controller");
        }
        let id = self.inner.next_id("goal");
        self.inner.send(goal_frame(&id, &target))?;
        let handle = GoalHandle(id);
        self.inner.statuses.lock().record(&handle, GoalStatus::Accepted);
        debug!(%handle, %target, "goal sent to rosbridge");
        Ok(handle)
    }

    async fn cancel_goal(&self, handle: &GoalHandle) -> Result<(), NavError> {
        self.inner.send(cancel_frame(&handle.0))
    }

    fn subscribe(&self) -> broadcast::Receiver<StackEvent> {
        self.inner.events.subscribe()
    }

    async fn goal_status(&self, handle: &GoalHandle) -> Option<GoalStatus> {
        self.inner.statuses.lock().get(handle)
    }

    async fn is_active(&self) -> bool {
        match self.call_service(LIFECYCLE_SERVICE, json!({})).await {
            Ok(values) => {
                values.pointer("/current_state/label").and_then(Value::as_str) == Some("active")
            }
            Err(e) => {
                debug!(error = %e, "liveness probe failed");
                false
            }
        }
    }

    async fn start_mapping(&self) -> Result<(), NavError> {
        self.call_service(SLAM_RESET_SERVICE, json!({})).await.map(|_| ())
    }

    async fn save_map(&self, name: &str) -> Result<(), NavError> {
        self.call_service(SLAM_SAVE_SERVICE, json!({ "name": { "data": name } }))
            .await
            .map(|_| ())
    }

    async fn load_map(&self, name: &str) -> Result<(), NavError> {
        self.call_service(MAP_LOAD_SERVICE, json!({ "map_url": format!("{name}.yaml") }))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl TelemetrySource for RosbridgeNavStack {
    async fn battery_percent(&self) -> Result<f64, NavError> {
        self.inner
            .telemetry
            .lock()
            .battery_percent
            .ok_or_else(|| NavError::Telemetry("no /battery_state received yet".to_string()))
    }

    async fn min_obstacle_range(&self) -> Result<f64, NavError> {
        self.inner
            .telemetry
            .lock()
            .min_obstacle_range_m
            .ok_or_else(|| NavError::Telemetry("no /scan received yet".to_string()))
    }

    async fn robot_pose(&self) -> Option<Pose> {
        self.inner.telemetry.lock().robot_pose
    }
}

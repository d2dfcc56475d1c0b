//! Backend traits.
//!
//! The navigation stack is asynchronous by nature: a dispatched goal returns
//! a [`GoalHandle`] immediately and its terminal status arrives later on the
//! notification stream returned by [`NavigationStack::subscribe`].
//! Subscribe **before** dispatching so no notification is missed.

use async_trait::async_trait;
use navcore_types::{GoalHandle, GoalStatus, NavError, Pose, StackEvent};
use tokio::sync::broadcast;

/// The external SLAM / localisation / planning subsystem.
#[async_trait]
pub trait NavigationStack: Send + Sync {
    /// Submit a goal. Returns as soon as the stack has taken the request.
    async fn dispatch_goal(
        &self,
        target: Pose,
        tolerance: Option<f64>,
    ) -> Result<GoalHandle, NavError>;

    /// Ask the stack to cancel a dispatched goal. The acknowledgement arrives
    /// as a [`GoalStatus::Cancelled`][navcore_types::GoalStatus::Cancelled]
    /// notification.
    async fn cancel_goal(&self, handle: &GoalHandle) -> Result<(), NavError>;

    /// Stream of `(handle, status)` and feedback notifications.
    fn subscribe(&self) -> broadcast::Receiver<StackEvent>;

    /// Last status the stack reported for `handle`, if it is still known.
    /// Lets a subscriber that fell behind the stream recover a terminal
    /// status it missed.
    async fn goal_status(&self, handle: &GoalHandle) -> Option<GoalStatus>;

    /// Liveness probe: `true` when the stack reports itself active.
    async fn is_active(&self) -> bool;

    async fn start_mapping(&self) -> Result<(), NavError>;

    async fn save_map(&self, name: &str) -> Result<(), NavError>;

    async fn load_map(&self, name: &str) -> Result<(), NavError>;
}

/// Robot health telemetry used by the safety gate.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Battery charge in `0.0..=100.0`.
    async fn battery_percent(&self) -> Result<f64, NavError>;

    /// Closest obstacle return in metres.
    async fn min_obstacle_range(&self) -> Result<f64, NavError>;

    /// Latest localisation estimate, if any.
    async fn robot_pose(&self) -> Option<Pose>;
}

//! `navcore-types` – shared data model for the navigation orchestration core.
//!
//! Every other crate in the workspace speaks in these types: the poses and
//! goals handed to the navigation stack, the mission intents supplied by
//! callers, the outcomes and safety verdicts produced while a mission runs,
//! and the single [`NavError`] enum that spans the error taxonomy.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Pose
// ─────────────────────────────────────────────────────────────────────────────

/// Planar robot pose in the map frame: position in metres, heading in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
}

impl Pose {
    pub const fn new(x: f64, y: f64, yaw: f64) -> Self {
        Self { x, y, yaw }
    }

    /// The map origin facing along +x.
    pub const fn origin() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// `true` when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.yaw.is_finite()
    }

    /// Euclidean distance between the planar positions of two poses.
    pub fn distance_to(&self, other: &Pose) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// `true` when `target` lies behind this pose, i.e. the offset towards it
    /// projects negatively onto the heading vector.
    pub fn is_behind(&self, target: &Pose) -> bool {
        let dx = target.x - self.x;
        let dy = target.y - self.y;
        dx * self.yaw.cos() + dy * self.yaw.sin() < 0.0
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.yaw)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// NavigationGoal
// ─────────────────────────────────────────────────────────────────────────────

/// A single target handed to the navigation stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationGoal {
    pub id: Uuid,
    pub target: Pose,
    /// Acceptance radius in metres; `None` lets the stack use its default.
    pub tolerance: Option<f64>,
}

impl NavigationGoal {
    /// Create a goal with a freshly generated identifier.
    pub fn new(target: Pose, tolerance: Option<f64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            tolerance,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MissionIntent
// ─────────────────────────────────────────────────────────────────────────────

/// High-level request supplied by a caller once per mission.
///
/// Build intents with the checked constructors ([`MissionIntent::waypoints`],
/// [`MissionIntent::patrol`]) or call [`MissionIntent::validate`] on intents
/// that arrive from outside (e.g. deserialised JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "payload")]
pub enum MissionIntent {
    /// Drive to one pose.
    SingleGoal(Pose),
    /// Visit `poses` in order; when `looping` the list repeats until stopped,
    /// or until `laps` passes have completed.
    WaypointList {
        poses: Vec<Pose>,
        #[serde(rename = "loop", default)]
        looping: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        laps: Option<u32>,
    },
    /// Visit `poses` in order, forever unless `laps` is set.
    Patrol {
        poses: Vec<Pose>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        laps: Option<u32>,
    },
    /// Drive back to the recorded home pose.
    ReturnHome,
}

impl MissionIntent {
    /// Checked constructor for a single goal.
    pub fn single_goal(target: Pose) -> Result<Self, NavError> {
        let intent = MissionIntent::SingleGoal(target);
        intent.validate()?;
        Ok(intent)
    }

    /// Checked constructor for an ordered waypoint list.
    pub fn waypoints(poses: Vec<Pose>, looping: bool) -> Result<Self, NavError> {
        let intent = MissionIntent::WaypointList {
            poses,
            looping,
            laps: None,
        };
        intent.validate()?;
        Ok(intent)
    }

    /// Checked constructor for a patrol route.
    pub fn patrol(poses: Vec<Pose>) -> Result<Self, NavError> {
        let intent = MissionIntent::Patrol { poses, laps: None };
        intent.validate()?;
        Ok(intent)
    }

    /// Stop a repeating route after `laps` full passes. A waypoint list
    /// becomes looping.
    ///
    /// # Errors
    ///
    /// [`NavError::InvalidIntent`] for `laps == 0` or an intent that has no
    /// route to repeat.
    pub fn with_laps(self, laps: u32) -> Result<Self, NavError> {
        let intent = match self {
            MissionIntent::WaypointList { poses, .. } => MissionIntent::WaypointList {
                poses,
                looping: true,
                laps: Some(laps),
            },
            MissionIntent::Patrol { poses, .. } => MissionIntent::Patrol {
                poses,
                laps: Some(laps),
            },
            other => {
                return Err(NavError::InvalidIntent(format!(
                    "{} has no route to repeat",
                    other.kind()
                )));
            }
        };
        intent.validate()?;
        Ok(intent)
    }

    /// The standard four-corner patrol around the origin.
    pub fn default_patrol() -> Self {
        MissionIntent::Patrol {
            poses: vec![
                Pose::new(1.0, 0.0, 0.0),
                Pose::new(1.0, 1.0, 1.57),
                Pose::new(0.0, 1.0, 3.14),
                Pose::new(0.0, 0.0, 0.0),
            ],
            laps: None,
        }
    }

    /// Poses named by the intent itself; `ReturnHome` has none.
    pub fn route(&self) -> &[Pose] {
        match self {
            MissionIntent::SingleGoal(p) => std::slice::from_ref(p),
            MissionIntent::WaypointList { poses, .. } | MissionIntent::Patrol { poses, .. } => poses,
            MissionIntent::ReturnHome => &[],
        }
    }

    /// Reject intents that can never produce a meaningful mission.
    ///
    /// # Errors
    ///
    /// [`NavError::InvalidIntent`] for empty route lists, non-finite poses,
    /// a zero lap count, or laps on a list that does not loop.
    pub fn validate(&self) -> Result<(), NavError> {
        let laps = match self {
            MissionIntent::WaypointList {
                looping: false,
                laps: Some(_),
                ..
            } => {
                return Err(NavError::InvalidIntent(
                    "laps requires a looping waypoint list".to_string(),
                ));
            }
            MissionIntent::WaypointList { laps, .. } | MissionIntent::Patrol { laps, .. } => *laps,
            MissionIntent::SingleGoal(_) | MissionIntent::ReturnHome => None,
        };
        if laps == Some(0) {
            return Err(NavError::InvalidIntent("laps must be at least 1".to_string()));
        }
        let poses = self.route();
        if poses.is_empty() && !matches!(self, MissionIntent::ReturnHome) {
            return Err(NavError::InvalidIntent(format!(
                "{} requires at least one pose",
                self.kind()
            )));
        }
        if let Some((i, p)) = poses.iter().enumerate().find(|(_, p)| !p.is_finite()) {
            return Err(NavError::InvalidIntent(format!(
                "pose #{i} {p:?} has a non-finite component"
            )));
        }
        Ok(())
    }

    /// `true` for intents whose route refills after the last pose succeeds.
    pub fn is_looping(&self) -> bool {
        match self {
            MissionIntent::WaypointList { looping, .. } => *looping,
            MissionIntent::Patrol { .. } => true,
            MissionIntent::SingleGoal(_) | MissionIntent::ReturnHome => false,
        }
    }

    /// Lap count after which a looping intent completes; `None` repeats
    /// until cancelled.
    pub fn lap_limit(&self) -> Option<u32> {
        match self {
            MissionIntent::WaypointList { laps, .. } | MissionIntent::Patrol { laps, .. } => *laps,
            MissionIntent::SingleGoal(_) | MissionIntent::ReturnHome => None,
        }
    }

    /// Short label used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            MissionIntent::SingleGoal(_) => "single_goal",
            MissionIntent::WaypointList { .. } => "waypoint_list",
            MissionIntent::Patrol { .. } => "patrol",
            MissionIntent::ReturnHome => "return_home",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes and verdicts
// ─────────────────────────────────────────────────────────────────────────────

/// Terminal result of one goal attempt. Produced exactly once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason")]
pub enum GoalOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
    TimedOut,
}

impl GoalOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GoalOutcome::Succeeded)
    }

    /// `true` for outcomes that count towards the retry limit.
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, GoalOutcome::Failed(_) | GoalOutcome::TimedOut)
    }

    pub fn label(&self) -> &'static str {
        match self {
            GoalOutcome::Succeeded => "succeeded",
            GoalOutcome::Failed(_) => "failed",
            GoalOutcome::Cancelled => "cancelled",
            GoalOutcome::TimedOut => "timed_out",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            GoalOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Why the safety gate refused to let a goal start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockReason {
    LowPower,
    ObstacleDetected,
    StackUnavailable,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::LowPower => write!(f, "low power"),
            BlockReason::ObstacleDetected => write!(f, "obstacle detected"),
            BlockReason::StackUnavailable => write!(f, "navigation stack unavailable"),
        }
    }
}

/// Result of a safety gate evaluation. Computed fresh before every dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyVerdict {
    Clear,
    Blocked(BlockReason),
}

impl SafetyVerdict {
    pub fn is_clear(&self) -> bool {
        matches!(self, SafetyVerdict::Clear)
    }
}

/// Operating mode of the navigation core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavMode {
    #[default]
    Idle,
    Mapping,
    Navigating,
    Paused,
    Aborted,
}

impl fmt::Display for NavMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NavMode::Idle => "idle",
            NavMode::Mapping => "mapping",
            NavMode::Navigating => "navigating",
            NavMode::Paused => "paused",
            NavMode::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// One terminal goal outcome, as kept in history and written to the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalRecord {
    pub mission_id: Uuid,
    pub goal: NavigationGoal,
    pub outcome: GoalOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl GoalRecord {
    pub fn new(mission_id: Uuid, goal: NavigationGoal, outcome: GoalOutcome) -> Self {
        Self {
            mission_id,
            goal,
            outcome,
            recorded_at: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Navigation stack protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque handle the navigation stack assigns to a dispatched goal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoalHandle(pub String);

impl fmt::Display for GoalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status reported by the stack for a dispatched goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalStatus {
    Accepted,
    Succeeded,
    /// Stack-specific failure code (e.g. the action server's status code).
    Failed(i32),
    Cancelled,
}

impl GoalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GoalStatus::Accepted)
    }
}

/// Asynchronous notification emitted by the navigation stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StackEvent {
    Status {
        handle: GoalHandle,
        status: GoalStatus,
    },
    Feedback {
        handle: GoalHandle,
        distance_remaining_m: f64,
    },
}

impl StackEvent {
    pub fn handle(&self) -> &GoalHandle {
        match self {
            StackEvent::Status { handle, .. } | StackEvent::Feedback { handle, .. } => handle,
        }
    }
}

/// Progress of the in-flight goal, surfaced to status readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalProgress {
    pub goal_id: Uuid,
    pub target: Pose,
    pub distance_remaining_m: f64,
    pub at: DateTime<Utc>,
}

/// Read-only health sample used by the safety gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Battery charge in `0.0..=100.0`.
    pub battery_percent: f64,
    /// Closest obstacle return in metres (`f64::INFINITY` when nothing seen).
    pub min_obstacle_range_m: f64,
    /// Latest localisation estimate, if the stack has one.
    pub robot_pose: Option<Pose>,
    pub sampled_at: DateTime<Utc>,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            battery_percent: 100.0,
            min_obstacle_range_m: f64::INFINITY,
            robot_pose: None,
            sampled_at: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error type spanning mission-level rejections, contract violations, and
/// transport failures towards the navigation stack.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NavError {
    #[error("a mission is already running")]
    AlreadyRunning,

    #[error("operation not allowed while a mission is active")]
    MissionActive,

    #[error("operation not allowed while mapping is in progress")]
    MappingInProgress,

    #[error("no mission is active")]
    NoMission,

    #[error("invalid mission intent: {0}")]
    InvalidIntent(String),

    #[error("navigation stack error: {0}")]
    Stack(String),

    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("goal journal error: {0}")]
    Journal(String),
}

//! [`SafetyGate`] – pre-dispatch interlock.
//!
//! Before a navigation goal is handed to the stack, the caller gathers a
//! fresh [`SafetyInputs`] sample and passes it to [`SafetyGate::evaluate`].
//! Every registered [`SafetyRule`] is checked in insertion order; the first
//! rule that objects decides the [`SafetyVerdict::Blocked`] reason.
//!
//! Three built-in rules cover the standard policy:
//! - [`LowPowerRule`] – battery below the configured threshold, or no
//!   current battery reading at all.
//! - [`ObstacleClearanceRule`] – obstacle closer than the clearance, unless
//!   the goal is a retreat (it lies behind the robot).
//! - [`StackLivenessRule`] – the navigation stack has not reported "active"
//!   within its liveness window.
//!
//! Evaluation has no side effects and is deterministic for a given sample.

use navcore_types::{BlockReason, Pose, SafetyVerdict};
use tracing::debug;

// ────────────────────────────────────────────────────────────────────────────
// Inputs
// ────────────────────────────────────────────────────────────────────────────

/// Everything the gate needs to know about the world at evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyInputs {
    /// Battery charge in `0.0..=100.0`; `None` when telemetry is missing or
    /// stale.
    pub battery_percent: Option<f64>,
    /// Closest obstacle return in metres.
    pub min_obstacle_range_m: f64,
    /// Latest robot pose, if localisation has one.
    pub robot_pose: Option<Pose>,
    /// `true` while the stack is inside its liveness window.
    pub stack_live: bool,
    /// Where the pending goal wants to go.
    pub goal_target: Pose,
}

impl SafetyInputs {
    /// A goal is a retreat when the robot pose is known and the target lies
    /// behind it. Without a pose the goal is never treated as a retreat.
    pub fn is_retreat(&self) -> bool {
        self.robot_pose
            .is_some_and(|pose| pose.is_behind(&self.goal_target))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single condition that must hold before a goal may be dispatched.
pub trait SafetyRule: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &str;

    /// `Ok(())` when the rule is satisfied, otherwise the reason to block.
    fn check(&self, inputs: &SafetyInputs) -> Result<(), BlockReason>;
}

// ────────────────────────────────────────────────────────────────────────────
// SafetyGate
// ────────────────────────────────────────────────────────────────────────────

/// Ordered rule engine producing a [`SafetyVerdict`].
///
/// # Example
///
/// ```
/// use navcore_kernel::safety_gate::{SafetyGate, SafetyInputs};
/// use navcore_types::{BlockReason, Pose, SafetyVerdict};
///
/// let gate = SafetyGate::standard(15.0, 0.3);
/// let mut inputs = SafetyInputs {
///     battery_percent: Some(80.0),
///     min_obstacle_range_m: 2.0,
///     robot_pose: None,
///     stack_live: true,
///     goal_target: Pose::new(1.0, 0.0, 0.0),
/// };
/// assert_eq!(gate.evaluate(&inputs), SafetyVerdict::Clear);
///
/// inputs.battery_percent = Some(5.0);
/// assert_eq!(gate.evaluate(&inputs), SafetyVerdict::Blocked(BlockReason::LowPower));
/// ```
#[derive(Default)]
pub struct SafetyGate {
    rules: Vec<Box<dyn SafetyRule>>,
}

impl SafetyGate {
    /// Create a gate with no rules; it always answers [`SafetyVerdict::Clear`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard policy: power, then obstacle clearance, then liveness.
    pub fn standard(low_battery_percent: f64, safety_clearance_m: f64) -> Self {
        let mut gate = Self::new();
        gate.add_rule(Box::new(LowPowerRule {
            min_percent: low_battery_percent,
        }));
        gate.add_rule(Box::new(ObstacleClearanceRule {
            clearance_m: safety_clearance_m,
        }));
        gate.add_rule(Box::new(StackLivenessRule));
        gate
    }

    /// Register a rule. Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn SafetyRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Check `inputs` against every rule and return the first objection.
    pub fn evaluate(&self, inputs: &SafetyInputs) -> SafetyVerdict {
        for rule in &self.rules {
            if let Err(reason) = rule.check(inputs) {
                debug!(rule = rule.name(), %reason, "safety rule blocked dispatch");
                return SafetyVerdict::Blocked(reason);
            }
        }
        SafetyVerdict::Clear
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Blocks when the battery is strictly below `min_percent` or unknown.
pub struct LowPowerRule {
    pub min_percent: f64,
}

impl SafetyRule for LowPowerRule {
    fn name(&self) -> &str {
        "low_power"
    }

    fn check(&self, inputs: &SafetyInputs) -> Result<(), BlockReason> {
        match inputs.battery_percent {
            Some(percent) if percent >= self.min_percent => Ok(()),
            _ => Err(BlockReason::LowPower),
        }
    }
}

/// Blocks when an obstacle is strictly closer than `clearance_m` and the
/// goal is not a retreat.
pub struct ObstacleClearanceRule {
    pub clearance_m: f64,
}

impl SafetyRule for ObstacleClearanceRule {
    fn name(&self) -> &str {
        "obstacle_clearance"
    }

    fn check(&self, inputs: &SafetyInputs) -> Result<(), BlockReason> {
        if inputs.min_obstacle_range_m < self.clearance_m && !inputs.is_retreat() {
            return Err(BlockReason::ObstacleDetected);
        }
        Ok(())
    }
}

/// Blocks while the navigation stack is outside its liveness window.
pub struct StackLivenessRule;

impl SafetyRule for StackLivenessRule {
    fn name(&self) -> &str {
        "stack_liveness"
    }

    fn check(&self, inputs: &SafetyInputs) -> Result<(), BlockReason> {
        if !inputs.stack_live {
            return Err(BlockReason::StackUnavailable);
        }
        Ok(())
    }
}

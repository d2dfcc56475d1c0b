//! `navcore-kernel` – Safety & Liveness
//!
//! The rule-enforcing core of the navigation stack. It does not plan or
//! drive; it decides whether a goal may start.
//!
//! # Modules
//!
//! - [`safety_gate`] – [`SafetyGate`][safety_gate::SafetyGate]: an ordered
//!   rule engine that turns a [`SafetyInputs`][safety_gate::SafetyInputs]
//!   sample into a [`SafetyVerdict`][navcore_types::SafetyVerdict]
//!   (low power, obstacle clearance, stack liveness).
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: tracks "active"
//!   reports from external components and flags the ones that went silent
//!   for longer than their liveness window.

pub mod safety_gate;
pub mod watchdog;

pub use safety_gate::{
    LowPowerRule, ObstacleClearanceRule, SafetyGate, SafetyInputs, SafetyRule, StackLivenessRule,
};
pub use watchdog::{ComponentHealth, Watchdog};

//! [`Watchdog`] – liveness tracking for external components.
//!
//! External collaborators (the navigation stack above all) are probed on a
//! fixed cadence. Every positive probe is recorded with
//! [`Watchdog::report_active`]; the safety gate then asks
//! [`Watchdog::health`] whether the component reported within its window.
//!
//! A registered component that has never reported is [`ComponentHealth::TimedOut`]:
//! the stack must prove it is alive before the first goal is dispatched.
//!
//! All methods have an `_at` variant taking an explicit [`Instant`] so the
//! caller can drive the watchdog from a simulated clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Health state reported for a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// The component reported active within its window.
    Healthy,
    /// The component is unknown, never reported, or went silent.
    TimedOut,
}

struct ComponentEntry {
    last_active: Option<Instant>,
    window: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks "active" reports and detects components that went silent.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use navcore_kernel::watchdog::{Watchdog, ComponentHealth};
///
/// let mut wd = Watchdog::new();
/// wd.register("nav_stack", Duration::from_secs(5));
/// assert_eq!(wd.health("nav_stack"), ComponentHealth::TimedOut);
///
/// wd.report_active("nav_stack");
/// assert_eq!(wd.health("nav_stack"), ComponentHealth::Healthy);
/// ```
#[derive(Default)]
pub struct Watchdog {
    components: HashMap<String, ComponentEntry>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `component_id` with a liveness `window`.
    ///
    /// Re-registering keeps the last report but replaces the window.
    pub fn register(&mut self, component_id: &str, window: Duration) {
        self.components
            .entry(component_id.to_string())
            .and_modify(|e| e.window = window)
            .or_insert(ComponentEntry {
                last_active: None,
                window,
            });
    }

    /// Record that `component_id` reported active now.
    pub fn report_active(&mut self, component_id: &str) {
        self.report_active_at(component_id, Instant::now());
    }

    /// Record that `component_id` reported active at `now`.
    ///
    /// No-ops for components that have not been registered.
    pub fn report_active_at(&mut self, component_id: &str, now: Instant) {
        if let Some(entry) = self.components.get_mut(component_id) {
            entry.last_active = Some(now);
        }
    }

    pub fn health(&self, component_id: &str) -> ComponentHealth {
        self.health_at(component_id, Instant::now())
    }

    /// Health of `component_id` as seen at `now`.
    pub fn health_at(&self, component_id: &str, now: Instant) -> ComponentHealth {
        match self.components.get(component_id) {
            Some(ComponentEntry {
                last_active: Some(last),
                window,
            }) if now.saturating_duration_since(*last) <= *window => ComponentHealth::Healthy,
            _ => ComponentHealth::TimedOut,
        }
    }
}

//! Runtime policy constants.

use std::time::Duration;

use navcore_types::Pose;

use crate::mission::SequencerPolicy;

/// Every tunable the navigator consults. Defaults match the standard robot
/// profile; the CLI maps its `[navigation]` TOML table onto this struct.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigatorConfig {
    /// Goals are blocked below this battery charge.
    pub low_battery_percent: f64,
    /// Minimum obstacle distance for a forward goal, metres.
    pub safety_clearance_m: f64,
    /// How long a positive liveness probe stays valid.
    pub stack_liveness_window: Duration,
    /// Attempts per goal before the mission aborts.
    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub safety_backoff: Duration,
    pub goal_timeout: Duration,
    /// Upper bound on waiting for the stack to acknowledge a cancel.
    pub cancel_ack_timeout: Duration,
    /// Finished goals kept in [`NavigationState::history`](crate::state::NavigationState).
    pub history_limit: usize,
    pub telemetry_poll_interval: Duration,
    pub default_tolerance_m: Option<f64>,
    /// Initial home pose for `ReturnHome`.
    pub home: Pose,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            low_battery_percent: 15.0,
            safety_clearance_m: 0.3,
            stack_liveness_window: Duration::from_secs(5),
            retry_limit: 3,
            retry_delay: Duration::from_secs(2),
            safety_backoff: Duration::from_secs(1),
            goal_timeout: Duration::from_secs(120),
            cancel_ack_timeout: Duration::from_secs(5),
            history_limit: 100,
            telemetry_poll_interval: Duration::from_secs(1),
            default_tolerance_m: None,
            home: Pose::origin(),
        }
    }
}

impl NavigatorConfig {
    pub fn sequencer_policy(&self) -> SequencerPolicy {
        SequencerPolicy {
            retry_limit: self.retry_limit,
            retry_delay: self.retry_delay,
            safety_backoff: self.safety_backoff,
            goal_timeout: self.goal_timeout,
            default_tolerance_m: self.default_tolerance_m,
            history_limit: self.history_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_carries_retry_settings() {
        let config = NavigatorConfig {
            retry_limit: 5,
            retry_delay: Duration::from_millis(250),
            ..NavigatorConfig::default()
        };
        let policy = config.sequencer_policy();
        assert_eq!(policy.retry_limit, 5);
        assert_eq!(policy.retry_delay, Duration::from_millis(250));
        assert_eq!(policy.goal_timeout, Duration::from_secs(120));
        assert_eq!(policy.history_limit, 100);
    }
}

//! Navigation State.
//!
//! [`NavigationState`] is the shared record of what the navigator is doing.
//! It lives inside a [`StateStore`], a thin wrapper over a
//! `tokio::sync::watch` channel: writers replace fields with
//! `send_modify` / `send_if_modified`, readers take cheap snapshots or await
//! changes, and neither side ever waits on the other.
//!
//! # Writers
//!
//! | Field                                   | Written by        |
//! |-----------------------------------------|-------------------|
//! | `mode`, `current_intent`, `goal_queue`  | mission sequencer |
//! | `mission_id`, `consecutive_failures`    | mission sequencer |
//! | `current_goal`, `history`               | mission sequencer (`navigate` leaf) |
//! | `operator_hold`                         | navigator (pause / resume) |
//! | `active_map`                            | navigator (mapping control) |
//!
//! `mode == Navigating` holds exactly when `current_goal` is set;
//! [`begin_goal`](StateStore::begin_goal) and
//! [`end_goal`](StateStore::end_goal) change both in one update.

use std::collections::VecDeque;
use std::sync::Arc;

use navcore_types::{GoalRecord, MissionIntent, NavError, NavMode, NavigationGoal};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// NavigationState
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationState {
    pub mode: NavMode,
    /// Set for the whole lifetime of a mission; `None` when no mission is active.
    pub current_intent: Option<MissionIntent>,
    pub mission_id: Option<Uuid>,
    /// Goals still to run; front is next.
    pub goal_queue: VecDeque<NavigationGoal>,
    pub current_goal: Option<NavigationGoal>,
    /// Finished goals, oldest first, bounded by the history limit.
    pub history: VecDeque<GoalRecord>,
    pub consecutive_failures: u32,
    /// Name of the last map saved or loaded through mapping control.
    pub active_map: Option<String>,
    /// Operator asked the mission to hold before its next goal.
    #[serde(default)]
    pub operator_hold: bool,
}

impl NavigationState {
    pub fn mission_active(&self) -> bool {
        self.current_intent.is_some()
    }

    pub fn last_record(&self) -> Option<&GoalRecord> {
        self.history.back()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StateStore
// ─────────────────────────────────────────────────────────────────────────────

/// Shared handle to the navigation state. Cheap to clone.
#[derive(Clone)]
pub struct StateStore {
    tx: Arc<watch::Sender<NavigationState>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(NavigationState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> NavigationState {
        self.tx.borrow().clone()
    }

    pub fn mode(&self) -> NavMode {
        self.tx.borrow().mode
    }

    pub fn hold_requested(&self) -> bool {
        self.tx.borrow().operator_hold
    }

    pub fn subscribe(&self) -> watch::Receiver<NavigationState> {
        self.tx.subscribe()
    }

    // ── Mission lifecycle (sequencer) ───────────────────────────────────────

    /// Atomically claim the navigator for a new mission.
    ///
    /// # Errors
    ///
    /// - [`NavError::MappingInProgress`] while a mapping session is open.
    /// - [`NavError::AlreadyRunning`] while another mission is active.
    pub fn try_begin_mission(
        &self,
        mission_id: Uuid,
        intent: MissionIntent,
        goals: Vec<NavigationGoal>,
    ) -> Result<(), NavError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|s| {
            if s.mode == NavMode::Mapping {
                result = Err(NavError::MappingInProgress);
                return false;
            }
            if s.mission_active() {
                result = Err(NavError::AlreadyRunning);
                return false;
            }
            s.mode = NavMode::Idle;
            s.current_intent = Some(intent);
            s.mission_id = Some(mission_id);
            s.goal_queue = goals.into();
            s.consecutive_failures = 0;
            s.operator_hold = false;
            true
        });
        result
    }

    /// Pop the next goal off the queue head.
    pub fn pop_next_goal(&self) -> Option<NavigationGoal> {
        let mut next = None;
        self.tx.send_if_modified(|s| {
            next = s.goal_queue.pop_front();
            next.is_some()
        });
        next
    }

    /// Append a fresh lap of goals (looping intents).
    pub fn refill_queue(&self, goals: Vec<NavigationGoal>) {
        self.tx.send_modify(|s| s.goal_queue.extend(goals));
    }

    /// Enter `Paused` while a safety condition blocks the next goal.
    pub fn pause(&self) {
        self.tx.send_if_modified(|s| {
            if s.current_goal.is_none() && s.mode != NavMode::Paused {
                s.mode = NavMode::Paused;
                true
            } else {
                false
            }
        });
    }

    /// Leave `Paused` once the safety gate clears or the hold is released.
    pub fn resume(&self) {
        self.tx.send_if_modified(|s| {
            if s.mode == NavMode::Paused {
                s.mode = NavMode::Idle;
                true
            } else {
                false
            }
        });
    }

    pub fn record_success(&self) {
        self.tx.send_if_modified(|s| {
            let changed = s.consecutive_failures != 0;
            s.consecutive_failures = 0;
            changed
        });
    }

    /// Returns the new consecutive failure count.
    pub fn record_failure(&self) -> u32 {
        let mut count = 0;
        self.tx.send_modify(|s| {
            s.consecutive_failures += 1;
            count = s.consecutive_failures;
        });
        count
    }

    /// End the mission in `mode` (`Idle` or `Aborted`): the queue and intent
    /// are cleared so a new mission may start.
    pub fn finish_mission(&self, mode: NavMode) {
        self.tx.send_modify(|s| {
            s.mode = mode;
            s.current_intent = None;
            s.goal_queue.clear();
            s.current_goal = None;
            s.operator_hold = false;
        });
    }

    // ── Operator hold (navigator) ───────────────────────────────────────────

    /// Ask the running mission to hold before its next goal. A goal already
    /// in flight runs to its outcome first.
    ///
    /// # Errors
    ///
    /// [`NavError::NoMission`] when no mission is active.
    pub fn request_hold(&self) -> Result<(), NavError> {
        self.set_hold(true)
    }

    /// # Errors
    ///
    /// [`NavError::NoMission`] when no mission is active.
    pub fn release_hold(&self) -> Result<(), NavError> {
        self.set_hold(false)
    }

    fn set_hold(&self, hold: bool) -> Result<(), NavError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|s| {
            if !s.mission_active() {
                result = Err(NavError::NoMission);
                return false;
            }
            let changed = s.operator_hold != hold;
            s.operator_hold = hold;
            changed
        });
        result
    }

    // ── Goal lifecycle (navigate leaf) ──────────────────────────────────────

    pub fn begin_goal(&self, goal: NavigationGoal) {
        self.tx.send_modify(|s| {
            s.current_goal = Some(goal);
            s.mode = NavMode::Navigating;
        });
    }

    /// Clear the current goal and append `record`, keeping at most
    /// `history_limit` entries.
    pub fn end_goal(&self, record: GoalRecord, history_limit: usize) {
        self.tx.send_modify(|s| {
            s.current_goal = None;
            s.mode = NavMode::Idle;
            s.history.push_back(record);
            while s.history.len() > history_limit.max(1) {
                s.history.pop_front();
            }
        });
    }

    // ── Mapping control ─────────────────────────────────────────────────────

    pub fn begin_mapping(&self) -> Result<(), NavError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|s| {
            if s.mission_active() || s.mode == NavMode::Mapping {
                result = Err(NavError::AlreadyRunning);
                return false;
            }
            s.mode = NavMode::Mapping;
            true
        });
        result
    }

    /// Returns `false` when no mapping session was open.
    pub fn end_mapping(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if s.mode == NavMode::Mapping {
                s.mode = NavMode::Idle;
                true
            } else {
                false
            }
        })
    }

    pub fn set_active_map(&self, name: &str) {
        self.tx.send_modify(|s| s.active_map = Some(name.to_string()));
    }

    // ── Reset ───────────────────────────────────────────────────────────────

    /// Clear everything back to `Idle` (history included). The active map is
    /// kept since it describes the stack, not the mission.
    ///
    /// # Errors
    ///
    /// [`NavError::MissionActive`] while a mission runs,
    /// [`NavError::MappingInProgress`] while mapping.
    pub fn reset(&self) -> Result<(), NavError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|s| {
            if s.mission_active() || s.current_goal.is_some() {
                result = Err(NavError::MissionActive);
                return false;
            }
            if s.mode == NavMode::Mapping {
                result = Err(NavError::MappingInProgress);
                return false;
            }
            let active_map = s.active_map.take();
            *s = NavigationState {
                active_map,
                ..NavigationState::default()
            };
            true
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcore_types::{GoalOutcome, Pose};

    fn goal(x: f64) -> NavigationGoal {
        NavigationGoal::new(Pose::new(x, 0.0, 0.0), None)
    }

    fn begin(store: &StateStore, goals: Vec<NavigationGoal>) -> Result<(), NavError> {
        store.try_begin_mission(Uuid::new_v4(), MissionIntent::ReturnHome, goals)
    }

    #[test]
    fn second_mission_is_rejected_while_first_is_active() {
        let store = StateStore::new();
        begin(&store, vec![goal(1.0)]).unwrap();
        assert_eq!(begin(&store, vec![goal(2.0)]), Err(NavError::AlreadyRunning));
        assert_eq!(store.snapshot().goal_queue.len(), 1);
    }

    #[test]
    fn mission_can_start_after_abort() {
        let store = StateStore::new();
        begin(&store, vec![goal(1.0)]).unwrap();
        store.finish_mission(NavMode::Aborted);
        assert_eq!(store.mode(), NavMode::Aborted);
        assert!(store.snapshot().goal_queue.is_empty());
        begin(&store, vec![goal(1.0)]).unwrap();
        assert_eq!(store.mode(), NavMode::Idle);
    }

    #[test]
    fn begin_and_end_goal_keep_mode_and_current_goal_in_step() {
        let store = StateStore::new();
        begin(&store, vec![goal(1.0)]).unwrap();
        let g = store.pop_next_goal().unwrap();
        store.begin_goal(g.clone());
        let s = store.snapshot();
        assert_eq!(s.mode, NavMode::Navigating);
        assert_eq!(s.current_goal.as_ref(), Some(&g));

        store.end_goal(GoalRecord::new(Uuid::new_v4(), g, GoalOutcome::Succeeded), 10);
        let s = store.snapshot();
        assert_eq!(s.mode, NavMode::Idle);
        assert!(s.current_goal.is_none());
        assert_eq!(s.history.len(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let store = StateStore::new();
        for i in 0..5 {
            let record = GoalRecord::new(Uuid::new_v4(), goal(i as f64), GoalOutcome::Succeeded);
            store.end_goal(record, 3);
        }
        let history = store.snapshot().history;
        assert_eq!(history.len(), 3);
        assert_eq!(history.front().unwrap().goal.target.x, 2.0);
    }

    #[test]
    fn pause_never_overrides_navigating() {
        let store = StateStore::new();
        store.begin_goal(goal(1.0));
        store.pause();
        assert_eq!(store.mode(), NavMode::Navigating);
    }

    #[test]
    fn pause_and_resume() {
        let store = StateStore::new();
        store.pause();
        assert_eq!(store.mode(), NavMode::Paused);
        store.resume();
        assert_eq!(store.mode(), NavMode::Idle);
    }

    #[test]
    fn hold_needs_a_mission_and_ends_with_it() {
        let store = StateStore::new();
        assert_eq!(store.request_hold(), Err(NavError::NoMission));
        begin(&store, vec![goal(1.0)]).unwrap();
        store.request_hold().unwrap();
        assert!(store.snapshot().operator_hold);
        store.release_hold().unwrap();
        assert!(!store.snapshot().operator_hold);

        store.request_hold().unwrap();
        store.finish_mission(NavMode::Idle);
        assert!(!store.snapshot().operator_hold);
        assert_eq!(store.release_hold(), Err(NavError::NoMission));
    }

    #[test]
    fn failure_counter_resets_on_success() {
        let store = StateStore::new();
        assert_eq!(store.record_failure(), 1);
        assert_eq!(store.record_failure(), 2);
        store.record_success();
        assert_eq!(store.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn reset_is_refused_while_mission_active() {
        let store = StateStore::new();
        begin(&store, vec![goal(1.0)]).unwrap();
        assert_eq!(store.reset(), Err(NavError::MissionActive));
    }

    #[test]
    fn reset_clears_history_but_keeps_map() {
        let store = StateStore::new();
        store.set_active_map("lab");
        store.end_goal(GoalRecord::new(Uuid::new_v4(), goal(1.0), GoalOutcome::TimedOut), 10);
        store.reset().unwrap();
        let s = store.snapshot();
        assert!(s.history.is_empty());
        assert_eq!(s.active_map.as_deref(), Some("lab"));
    }

    #[test]
    fn mapping_excludes_missions() {
        let store = StateStore::new();
        store.begin_mapping().unwrap();
        assert_eq!(begin(&store, vec![goal(1.0)]), Err(NavError::MappingInProgress));
        assert_eq!(store.reset(), Err(NavError::MappingInProgress));
        assert!(store.end_mapping());
        assert!(!store.end_mapping());
        begin(&store, vec![goal(1.0)]).unwrap();
        assert_eq!(store.begin_mapping(), Err(NavError::AlreadyRunning));
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let store = StateStore::new();
        let mut rx = store.subscribe();
        store.begin_goal(goal(1.0));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().mode, NavMode::Navigating);
    }
}

//! Last known status per goal handle, for [`NavigationStack::goal_status`].
//!
//! [`NavigationStack::goal_status`]: crate::adapter::NavigationStack::goal_status

use std::collections::{HashMap, VecDeque};

use navcore_types::{GoalHandle, GoalStatus, StackEvent};

/// Handles remembered before the oldest is forgotten.
const REMEMBERED_GOALS: usize = 1024;

#[derive(Debug, Default)]
pub(crate) struct StatusBook {
    latest: HashMap<GoalHandle, GoalStatus>,
    order: VecDeque<GoalHandle>,
}

impl StatusBook {
    pub(crate) fn record(&mut self, handle: &GoalHandle, status: GoalStatus) {
        if self.latest.insert(handle.clone(), status).is_none() {
            self.order.push_back(handle.clone());
            while self.order.len() > REMEMBERED_GOALS {
                if let Some(old) = self.order.pop_front() {
                    self.latest.remove(&old);
                }
            }
        }
    }

    /// Track status notifications; feedback is ignored.
    pub(crate) fn observe(&mut self, event: &StackEvent) {
        if let StackEvent::Status { handle, status } = event {
            self.record(handle, status.clone());
        }
    }

    pub(crate) fn get(&self, handle: &GoalHandle) -> Option<GoalStatus> {
        self.latest.get(handle).cloned()
    }

    /// `true` while the goal is known and has no terminal status.
    pub(crate) fn is_open(&self, handle: &GoalHandle) -> bool {
        self.latest
            .get(handle)
            .is_some_and(|status| !status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_status_wins() {
        let mut book = StatusBook::default();
        let h = GoalHandle("g1".into());
        book.record(&h, GoalStatus::Accepted);
        assert!(book.is_open(&h));
        book.observe(&StackEvent::Status {
            handle: h.clone(),
            status: GoalStatus::Succeeded,
        });
        assert_eq!(book.get(&h), Some(GoalStatus::Succeeded));
        assert!(!book.is_open(&h));
    }

    #[test]
    fn oldest_handles_are_forgotten() {
        let mut book = StatusBook::default();
        for i in 0..=REMEMBERED_GOALS {
            book.record(&GoalHandle(format!("g{i}")), GoalStatus::Accepted);
        }
        assert_eq!(book.get(&GoalHandle("g0".into())), None);
        assert!(book.get(&GoalHandle(format!("g{REMEMBERED_GOALS}"))).is_some());
        assert_eq!(book.latest.len(), REMEMBERED_GOALS);
    }
}

//! Goal Executor.
//!
//! Runs exactly one [`NavigationGoal`] against the navigation stack and turns
//! the stack's asynchronous notifications into a single [`GoalOutcome`].
//!
//! ```text
//!  dispatch ─► wait ──┬─ Succeeded / Failed(code) / Cancelled ─┐
//!                     ├─ notifications lagged ─► goal_status ───┤
//!                     ├─ timeout ─► cancel ─────────────────────┤─► outcome
//!                     └─ caller cancel ─► cancel ───────────────┘
//!                          └─► await ack (bounded)
//! ```
//!
//! The executor never retries and never touches the navigation state; both
//! belong to the mission sequencer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use navcore_middleware::NavigationStack;
use navcore_types::{GoalHandle, GoalOutcome, GoalProgress, GoalStatus, NavigationGoal, StackEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const PROGRESS_CAPACITY: usize = 64;

/// Runs one goal to a terminal outcome.
#[async_trait]
pub trait GoalExecution: Send + Sync {
    /// Execute `goal`, giving up after `timeout`. Setting `cancel` to `true`
    /// cancels the goal and yields [`GoalOutcome::Cancelled`].
    async fn execute(
        &self,
        goal: &NavigationGoal,
        timeout: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> GoalOutcome;
}

/// Outcome for a terminal stack status; `None` while the goal is still open.
fn terminal_outcome(status: &GoalStatus) -> Option<GoalOutcome> {
    match status {
        GoalStatus::Accepted => None,
        GoalStatus::Succeeded => Some(GoalOutcome::Succeeded),
        GoalStatus::Failed(code) => Some(GoalOutcome::Failed(format!("stack failure code {code}"))),
        GoalStatus::Cancelled => Some(GoalOutcome::Cancelled),
    }
}

pub struct GoalExecutor {
    stack: Arc<dyn NavigationStack>,
    progress: broadcast::Sender<GoalProgress>,
    cancel_ack_timeout: Duration,
}

impl GoalExecutor {
    pub fn new(stack: Arc<dyn NavigationStack>) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        Self {
            stack,
            progress,
            cancel_ack_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_cancel_ack_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_ack_timeout = timeout;
        self
    }

    /// Distance-remaining updates for the in-flight goal.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<GoalProgress> {
        self.progress.subscribe()
    }

    /// Ask the stack for a status the notification stream dropped.
    async fn recover_outcome(&self, handle: &GoalHandle) -> Option<GoalOutcome> {
        let status = self.stack.goal_status(handle).await?;
        let outcome = terminal_outcome(&status);
        if let Some(outcome) = &outcome {
            info!(%handle, outcome = outcome.label(), "recovered goal outcome after lag");
        }
        outcome
    }

    /// Ask the stack to cancel `handle` and wait (bounded) for its
    /// acknowledgement. Always yields `Cancelled`.
    async fn cancel_and_confirm(
        &self,
        handle: &GoalHandle,
        events: &mut broadcast::Receiver<StackEvent>,
    ) -> GoalOutcome {
        info!(%handle, "cancelling goal");
        if let Err(e) = self.stack.cancel_goal(handle).await {
            warn!(%handle, error = %e, "cancel request failed");
            return GoalOutcome::Cancelled;
        }
        let ack = async {
            loop {
                match events.recv().await {
                    Ok(StackEvent::Status { handle: h, status }) if &h == handle && status.is_terminal() => {
                        return;
                    }
                    Err(RecvError::Lagged(_)) => {
                        if self.stack.goal_status(handle).await.is_some_and(|s| s.is_terminal()) {
                            return;
                        }
                    }
                    Err(RecvError::Closed) => return,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(self.cancel_ack_timeout, ack).await.is_err() {
            warn!(%handle, timeout = ?self.cancel_ack_timeout, "no cancel acknowledgement from stack");
        }
        GoalOutcome::Cancelled
    }
}

#[async_trait]
impl GoalExecution for GoalExecutor {
    async fn execute(
        &self,
        goal: &NavigationGoal,
        timeout: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> GoalOutcome {
        // Subscribe before dispatch so a fast terminal status is not missed.
        let mut events = self.stack.subscribe();
        let handle = match self.stack.dispatch_goal(goal.target, goal.tolerance).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(goal_id = %goal.id, error = %e, "goal dispatch rejected");
                return GoalOutcome::Failed(format!("dispatch rejected: {e}"));
            }
        };
        info!(goal_id = %goal.id, %handle, target = %goal.target, "goal dispatched");

        let deadline = Instant::now() + timeout;
        loop {
            if *cancel.borrow_and_update() {
                return self.cancel_and_confirm(&handle, &mut events).await;
            }
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() {
                        // The mission owner went away; treat as a stop request.
                        return self.cancel_and_confirm(&handle, &mut events).await;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(goal_id = %goal.id, %handle, ?timeout, "goal timed out; cancelling");
                    if let Err(e) = self.stack.cancel_goal(&handle).await {
                        warn!(%handle, error = %e, "cancel after timeout failed");
                    }
                    return GoalOutcome::TimedOut;
                }
                event = events.recv() => match event {
                    Ok(StackEvent::Status { handle: h, status }) if h == handle => {
                        match terminal_outcome(&status) {
                            Some(outcome) => return outcome,
                            None => debug!(%handle, "goal accepted"),
                        }
                    }
                    Ok(StackEvent::Feedback { handle: h, distance_remaining_m }) if h == handle => {
                        let _ = self.progress.send(GoalProgress {
                            goal_id: goal.id,
                            target: goal.target,
                            distance_remaining_m,
                            at: Utc::now(),
                        });
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!(%handle, skipped = n, "stack notifications lagged; querying goal status");
                        if let Some(outcome) = self.recover_outcome(&handle).await {
                            return outcome;
                        }
                    }
                    Err(RecvError::Closed) => {
                        return GoalOutcome::Failed("stack notification stream closed".to_string());
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcore_middleware::{SimNavStack, SimResponse};
    use navcore_types::Pose;

    fn executor(stack: &SimNavStack) -> GoalExecutor {
        GoalExecutor::new(Arc::new(stack.clone())).with_cancel_ack_timeout(Duration::from_secs(1))
    }

    fn goal() -> NavigationGoal {
        NavigationGoal::new(Pose::new(1.0, 1.0, 0.0), None)
    }

    #[tokio::test]
    async fn success_needs_no_cancel() {
        let stack = SimNavStack::new();
        let exec = executor(&stack);
        let (_tx, mut cancel) = watch::channel(false);

        let outcome = exec.execute(&goal(), Duration::from_secs(5), &mut cancel).await;
        assert_eq!(outcome, GoalOutcome::Succeeded);
        assert!(stack.cancel_requests().is_empty());
        assert_eq!(stack.robot_pose(), Pose::new(1.0, 1.0, 0.0));
    }

    #[tokio::test]
    async fn stack_failure_code_becomes_reason() {
        let stack = SimNavStack::new().with_default_response(SimResponse::Fail {
            code: 6,
            after: Duration::ZERO,
        });
        let exec = executor(&stack);
        let (_tx, mut cancel) = watch::channel(false);
        let outcome = exec.execute(&goal(), Duration::from_secs(5), &mut cancel).await;
        assert_eq!(outcome, GoalOutcome::Failed("stack failure code 6".into()));
    }

    #[tokio::test]
    async fn dispatch_rejection_is_a_failure() {
        let stack = SimNavStack::new().with_default_response(SimResponse::Reject("busy".into()));
        let exec = executor(&stack);
        let (_tx, mut cancel) = watch::channel(false);
        let outcome = exec.execute(&goal(), Duration::from_secs(5), &mut cancel).await;
        assert!(matches!(outcome, GoalOutcome::Failed(r) if r.contains("dispatch rejected")));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stack_times_out_and_cancels_once() {
        let stack = SimNavStack::new().with_default_response(SimResponse::Silent);
        let exec = executor(&stack);
        let (_tx, mut cancel) = watch::channel(false);

        let outcome = exec.execute(&goal(), Duration::from_secs_f64(2.0), &mut cancel).await;
        assert_eq!(outcome, GoalOutcome::TimedOut);
        assert_eq!(stack.cancel_requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_status_lost_in_a_feedback_burst_is_recovered() {
        let stack = SimNavStack::new().with_default_response(SimResponse::Silent);
        let exec = executor(&stack);
        let (_tx, mut cancel) = watch::channel(false);

        let burst = tokio::spawn({
            let stack = stack.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let handle = GoalHandle("sim-goal-1".into());
                let feedback = |n: usize| {
                    for i in 0..n {
                        stack.emit(StackEvent::Feedback {
                            handle: handle.clone(),
                            distance_remaining_m: i as f64,
                        });
                    }
                };
                feedback(300);
                stack.emit(StackEvent::Status {
                    handle: handle.clone(),
                    status: GoalStatus::Succeeded,
                });
                feedback(300);
            }
        });

        let outcome = exec.execute(&goal(), Duration::from_secs(5), &mut cancel).await;
        burst.await.unwrap();
        assert_eq!(outcome, GoalOutcome::Succeeded);
        assert!(stack.cancel_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stack_side_cancel_ends_the_goal() {
        let stack = SimNavStack::new().with_default_response(SimResponse::Silent);
        let exec = executor(&stack);
        let (_tx, mut cancel) = watch::channel(false);

        let preempt = tokio::spawn({
            let stack = stack.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                stack.emit(StackEvent::Status {
                    handle: GoalHandle("sim-goal-1".into()),
                    status: GoalStatus::Cancelled,
                });
            }
        });
        let outcome = exec.execute(&goal(), Duration::from_secs(60), &mut cancel).await;
        preempt.await.unwrap();
        assert_eq!(outcome, GoalOutcome::Cancelled);
        assert!(stack.cancel_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn caller_cancel_waits_for_acknowledgement() {
        let stack = SimNavStack::new().with_default_response(SimResponse::Silent);
        let exec = executor(&stack);
        let (tx, mut cancel) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(true).unwrap();
            tx
        });
        let outcome = exec.execute(&goal(), Duration::from_secs(60), &mut cancel).await;
        assert_eq!(outcome, GoalOutcome::Cancelled);
        assert_eq!(stack.cancel_requests().len(), 1);
        drop(stopper.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_cancel_ack_is_bounded() {
        let stack = SimNavStack::new()
            .with_default_response(SimResponse::Silent)
            .with_cancel_acks(false);
        let exec = executor(&stack);
        let (tx, mut cancel) = watch::channel(true);

        let started = Instant::now();
        let outcome = exec.execute(&goal(), Duration::from_secs(60), &mut cancel).await;
        assert_eq!(outcome, GoalOutcome::Cancelled);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(60));
        drop(tx);
    }

    #[tokio::test]
    async fn feedback_is_forwarded_as_progress() {
        let stack = SimNavStack::new().with_default_response(SimResponse::succeed_after(
            Duration::from_millis(20),
        ));
        let exec = executor(&stack);
        let mut progress = exec.subscribe_progress();
        let (_tx, mut cancel) = watch::channel(false);
        let g = goal();

        exec.execute(&g, Duration::from_secs(5), &mut cancel).await;
        let update = progress.try_recv().unwrap();
        assert_eq!(update.goal_id, g.id);
        assert!((update.distance_remaining_m - 2f64.sqrt()).abs() < 1e-9);
    }
}

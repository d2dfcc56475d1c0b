//! Mission Sequencer.
//!
//! Expands a [`MissionIntent`] into goals and drives them one at a time
//! through the per-goal policy tree:
//!
//! ```text
//! Fallback
//! ├── Sequence [ not_cancelled, await_clearance, navigate ]                 attempt 1
//! ├── Sequence [ not_cancelled, retry_delay, not_cancelled,
//! │              await_clearance, navigate ]                                attempt 2
//! └── …                                                         up to retry_limit
//! ```
//!
//! `await_clearance` consults the safety gate before **every** dispatch and
//! holds the mission in `Paused` while it reports `Blocked` or while an
//! operator hold is set. Transient blocks never consume retries; only
//! `Failed` and `TimedOut` outcomes do.
//!
//! `navigate` owns the goal's footprint in the navigation state: it marks
//! the goal current, hands it to the executor, and books the outcome into
//! the history, the report log, and the optional [`GoalRecorder`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use navcore_memory::GoalJournal;
use navcore_types::{
    GoalOutcome, GoalRecord, MissionIntent, NavError, NavMode, NavigationGoal, Pose,
    SafetyVerdict,
};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::behavior_tree::{Action, BehaviorNode, Condition, NodeStatus};
use crate::executor::GoalExecution;
use crate::state::StateStore;

// ─────────────────────────────────────────────────────────────────────────────
// Seams and policy
// ─────────────────────────────────────────────────────────────────────────────

/// Pre-dispatch safety check for one goal.
pub trait SafetyCheck: Send + Sync {
    fn evaluate(&self, goal: &NavigationGoal) -> SafetyVerdict;
}

/// Sink for one record per terminal goal outcome.
pub trait GoalRecorder: Send + Sync {
    fn record(&self, record: &GoalRecord) -> Result<(), NavError>;
}

impl GoalRecorder for GoalJournal {
    fn record(&self, record: &GoalRecord) -> Result<(), NavError> {
        GoalJournal::record(self, record).map_err(|e| NavError::Journal(e.to_string()))
    }
}

/// Retry / backoff / timeout knobs for one mission.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerPolicy {
    /// Attempts per goal before the mission aborts (minimum 1).
    pub retry_limit: u32,
    pub retry_delay: Duration,
    /// Poll interval while the safety gate reports `Blocked`.
    pub safety_backoff: Duration,
    pub goal_timeout: Duration,
    pub default_tolerance_m: Option<f64>,
    /// Finished goals kept in the navigation state.
    pub history_limit: usize,
}

impl Default for SequencerPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            retry_delay: Duration::from_secs(2),
            safety_backoff: Duration::from_secs(1),
            goal_timeout: Duration::from_secs(120),
            default_tolerance_m: None,
            history_limit: 100,
        }
    }
}

/// How many passes over the route a mission makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapPlan {
    Once,
    Limited(u32),
    Forever,
}

impl LapPlan {
    pub fn for_intent(intent: &MissionIntent) -> Self {
        match (intent.is_looping(), intent.lap_limit()) {
            (false, _) => LapPlan::Once,
            (true, Some(laps)) => LapPlan::Limited(laps),
            (true, None) => LapPlan::Forever,
        }
    }

    /// Whether another pass follows lap number `finished` (1-based).
    fn continues_after(self, finished: u32) -> bool {
        match self {
            LapPlan::Once => false,
            LapPlan::Limited(laps) => finished < laps,
            LapPlan::Forever => true,
        }
    }
}

/// How a mission ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionEnd {
    /// Queue exhausted: the route ran once, or its lap limit was reached.
    Completed,
    Cancelled,
    /// A goal failed `retry_limit` times in a row.
    Aborted {
        goal: NavigationGoal,
        outcome: GoalOutcome,
    },
}

/// Poses an intent expands to, in execution order. `home` is used for
/// `ReturnHome`.
pub fn expand_intent(intent: &MissionIntent, home: Pose) -> Vec<Pose> {
    match intent {
        MissionIntent::SingleGoal(pose) => vec![*pose],
        MissionIntent::WaypointList { poses, .. } | MissionIntent::Patrol { poses, .. } => {
            poses.clone()
        }
        MissionIntent::ReturnHome => vec![home],
    }
}

pub fn goals_for(route: &[Pose], tolerance: Option<f64>) -> Vec<NavigationGoal> {
    route
        .iter()
        .map(|pose| NavigationGoal::new(*pose, tolerance))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-goal context and leaves
// ─────────────────────────────────────────────────────────────────────────────

/// Context the policy tree is ticked against, one per goal.
pub struct GoalContext {
    pub mission_id: Uuid,
    pub goal: NavigationGoal,
    pub cancel: watch::Receiver<bool>,
    pub attempts: u32,
    pub last_outcome: Option<GoalOutcome>,
    pub cancelled: bool,
}

impl GoalContext {
    pub fn new(mission_id: Uuid, goal: NavigationGoal, cancel: watch::Receiver<bool>) -> Self {
        Self {
            mission_id,
            goal,
            cancel,
            attempts: 0,
            last_outcome: None,
            cancelled: false,
        }
    }

    fn stop_requested(&self) -> bool {
        self.cancelled || *self.cancel.borrow()
    }
}

/// Sleep for `duration` unless the cancel flag is raised first.
/// Returns `false` when cancelled.
async fn sleep_unless_cancelled(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow_and_update() {
        return false;
    }
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow_and_update() {
                    return false;
                }
            }
        }
    }
}

fn not_cancelled(ctx: &GoalContext) -> bool {
    !ctx.stop_requested()
}

/// Polls the safety gate until it clears, pausing the mission meanwhile.
/// An operator hold is waited out first.
struct AwaitClearance {
    gate: Arc<dyn SafetyCheck>,
    state: StateStore,
    backoff: Duration,
}

impl AwaitClearance {
    /// Wait until the operator hold is released. Returns `false` when the
    /// mission is cancelled first.
    async fn hold_released(&self, cancel: &mut watch::Receiver<bool>) -> bool {
        let mut state = self.state.subscribe();
        tokio::select! {
            released = state.wait_for(|s| !s.operator_hold) => released.is_ok(),
            _ = cancel.wait_for(|stop| *stop) => false,
        }
    }
}

#[async_trait]
impl Condition<GoalContext> for AwaitClearance {
    async fn check(&self, ctx: &mut GoalContext) -> bool {
        let mut blocked_since_poll = 0u32;
        loop {
            if self.state.hold_requested() {
                info!(goal_id = %ctx.goal.id, "mission held by operator");
                self.state.pause();
                if !self.hold_released(&mut ctx.cancel).await {
                    ctx.cancelled = true;
                    return false;
                }
                info!(goal_id = %ctx.goal.id, "operator hold released");
                self.state.resume();
                blocked_since_poll = 0;
                continue;
            }
            match self.gate.evaluate(&ctx.goal) {
                SafetyVerdict::Clear => {
                    if blocked_since_poll > 0 {
                        info!(goal_id = %ctx.goal.id, polls = blocked_since_poll, "safety gate cleared");
                        self.state.resume();
                    }
                    return true;
                }
                SafetyVerdict::Blocked(reason) => {
                    if blocked_since_poll == 0 {
                        warn!(goal_id = %ctx.goal.id, %reason, "goal blocked by safety gate; pausing");
                        self.state.pause();
                    }
                    blocked_since_poll += 1;
                    if !sleep_unless_cancelled(self.backoff, &mut ctx.cancel).await {
                        ctx.cancelled = true;
                        return false;
                    }
                }
            }
        }
    }
}

struct RetryDelay {
    delay: Duration,
}

#[async_trait]
impl Action<GoalContext> for RetryDelay {
    async fn run(&self, ctx: &mut GoalContext) -> NodeStatus {
        info!(
            goal_id = %ctx.goal.id,
            attempt = ctx.attempts + 1,
            delay = ?self.delay,
            "retrying goal"
        );
        if sleep_unless_cancelled(self.delay, &mut ctx.cancel).await {
            NodeStatus::Success
        } else {
            ctx.cancelled = true;
            NodeStatus::Failure
        }
    }
}

/// Hands the goal to the executor and books the outcome.
struct Navigate {
    executor: Arc<dyn GoalExecution>,
    state: StateStore,
    recorder: Option<Arc<dyn GoalRecorder>>,
    timeout: Duration,
    history_limit: usize,
}

impl Navigate {
    fn report(&self, record: &GoalRecord) {
        let goal = &record.goal;
        info!(
            target: "navcore::report",
            mission_id = %record.mission_id,
            goal_id = %goal.id,
            x = goal.target.x,
            y = goal.target.y,
            yaw = goal.target.yaw,
            outcome = record.outcome.label(),
            reason = record.outcome.reason().unwrap_or(""),
            recorded_at = %record.recorded_at.to_rfc3339(),
            "goal finished"
        );
        if let Some(recorder) = &self.recorder
            && let Err(e) = recorder.record(record)
        {
            warn!(goal_id = %goal.id, error = %e, "failed to journal goal outcome");
        }
    }
}

#[async_trait]
impl Action<GoalContext> for Navigate {
    async fn run(&self, ctx: &mut GoalContext) -> NodeStatus {
        ctx.attempts += 1;
        self.state.begin_goal(ctx.goal.clone());
        let outcome = self
            .executor
            .execute(&ctx.goal, self.timeout, &mut ctx.cancel)
            .await;
        let record = GoalRecord::new(ctx.mission_id, ctx.goal.clone(), outcome.clone());
        self.state.end_goal(record.clone(), self.history_limit);
        self.report(&record);

        let status = match &outcome {
            GoalOutcome::Succeeded => {
                self.state.record_success();
                NodeStatus::Success
            }
            GoalOutcome::Cancelled => {
                ctx.cancelled = true;
                NodeStatus::Failure
            }
            GoalOutcome::Failed(_) | GoalOutcome::TimedOut => {
                let failures = self.state.record_failure();
                warn!(
                    goal_id = %ctx.goal.id,
                    attempt = ctx.attempts,
                    consecutive_failures = failures,
                    outcome = outcome.label(),
                    reason = outcome.reason().unwrap_or(""),
                    "goal attempt failed"
                );
                NodeStatus::Failure
            }
        };
        ctx.last_outcome = Some(outcome);
        status
    }
}

/// Build the per-goal policy tree described in the module docs.
pub fn goal_policy(
    gate: Arc<dyn SafetyCheck>,
    executor: Arc<dyn GoalExecution>,
    recorder: Option<Arc<dyn GoalRecorder>>,
    state: StateStore,
    policy: &SequencerPolicy,
) -> BehaviorNode<GoalContext> {
    let clearance: Arc<dyn Condition<GoalContext>> = Arc::new(AwaitClearance {
        gate,
        state: state.clone(),
        backoff: policy.safety_backoff,
    });
    let navigate: Arc<dyn Action<GoalContext>> = Arc::new(Navigate {
        executor,
        state,
        recorder,
        timeout: policy.goal_timeout,
        history_limit: policy.history_limit,
    });
    let delay: Arc<dyn Action<GoalContext>> = Arc::new(RetryDelay {
        delay: policy.retry_delay,
    });

    let attempts = (0..policy.retry_limit.max(1))
        .map(|i| {
            let mut steps = vec![BehaviorNode::condition("not_cancelled", not_cancelled)];
            if i > 0 {
                steps.push(BehaviorNode::shared_action("retry_delay", delay.clone()));
                steps.push(BehaviorNode::condition("not_cancelled", not_cancelled));
            }
            steps.push(BehaviorNode::shared_condition("await_clearance", clearance.clone()));
            steps.push(BehaviorNode::shared_action("navigate", navigate.clone()));
            BehaviorNode::sequence(steps)
        })
        .collect();
    BehaviorNode::fallback(attempts)
}

// ─────────────────────────────────────────────────────────────────────────────
// MissionSequencer
// ─────────────────────────────────────────────────────────────────────────────

/// Drives one mission to completion. The caller claims the state with
/// [`StateStore::try_begin_mission`] before calling [`run`](Self::run).
pub struct MissionSequencer {
    state: StateStore,
    tree: BehaviorNode<GoalContext>,
    policy: SequencerPolicy,
}

impl MissionSequencer {
    pub fn new(
        state: StateStore,
        gate: Arc<dyn SafetyCheck>,
        executor: Arc<dyn GoalExecution>,
        policy: SequencerPolicy,
    ) -> Self {
        Self::build(state, gate, executor, None, policy)
    }

    /// Like [`new`](Self::new), also handing every goal record to `recorder`.
    pub fn with_recorder(
        state: StateStore,
        gate: Arc<dyn SafetyCheck>,
        executor: Arc<dyn GoalExecution>,
        policy: SequencerPolicy,
        recorder: Arc<dyn GoalRecorder>,
    ) -> Self {
        Self::build(state, gate, executor, Some(recorder), policy)
    }

    fn build(
        state: StateStore,
        gate: Arc<dyn SafetyCheck>,
        executor: Arc<dyn GoalExecution>,
        recorder: Option<Arc<dyn GoalRecorder>>,
        policy: SequencerPolicy,
    ) -> Self {
        let tree = goal_policy(gate, executor, recorder, state.clone(), &policy);
        Self { state, tree, policy }
    }

    /// Run the queued goals until the queue is exhausted, the mission is
    /// cancelled, or a goal exhausts its retries. `route` refills the queue
    /// while `laps` asks for another pass.
    pub async fn run(
        &self,
        mission_id: Uuid,
        route: &[Pose],
        laps: LapPlan,
        cancel: watch::Receiver<bool>,
    ) -> MissionEnd {
        info!(
            %mission_id,
            goals = route.len(),
            ?laps,
            attempt_branches = self.tree.len(),
            "mission started"
        );
        let mut lap = 1u32;
        let end = loop {
            if *cancel.borrow() {
                break MissionEnd::Cancelled;
            }
            let Some(goal) = self.state.pop_next_goal() else {
                if laps.continues_after(lap) && !route.is_empty() {
                    lap += 1;
                    info!(%mission_id, lap, "starting next lap");
                    self.state
                        .refill_queue(goals_for(route, self.policy.default_tolerance_m));
                    continue;
                }
                if let LapPlan::Limited(limit) = laps {
                    info!(%mission_id, laps = limit, "lap limit reached");
                }
                break MissionEnd::Completed;
            };

            let mut ctx = GoalContext::new(mission_id, goal, cancel.clone());
            if self.tree.tick(&mut ctx).await == NodeStatus::Success {
                continue;
            }
            if ctx.stop_requested() {
                break MissionEnd::Cancelled;
            }
            let outcome = ctx
                .last_outcome
                .unwrap_or_else(|| GoalOutcome::Failed("no attempt made".to_string()));
            break MissionEnd::Aborted {
                goal: ctx.goal,
                outcome,
            };
        };

        match &end {
            MissionEnd::Completed => {
                info!(%mission_id, "mission completed");
                self.state.finish_mission(NavMode::Idle);
            }
            MissionEnd::Cancelled => {
                info!(%mission_id, "mission cancelled");
                self.state.finish_mission(NavMode::Idle);
            }
            MissionEnd::Aborted { goal, outcome } => {
                warn!(
                    %mission_id,
                    goal_id = %goal.id,
                    target = %goal.target,
                    outcome = outcome.label(),
                    reason = outcome.reason().unwrap_or(""),
                    retry_limit = self.policy.retry_limit,
                    "mission aborted"
                );
                self.state.finish_mission(NavMode::Aborted);
            }
        }
        end
    }
}

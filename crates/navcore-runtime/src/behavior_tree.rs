//! Behavior Tree Engine.
//!
//! A small, closed set of node kinds that compose into the per-goal control
//! policy. Nodes are ticked against a caller-owned context `C`, so leaves can
//! share per-goal data (the goal itself, cancellation, the last outcome)
//! without any global state.
//!
//! # Nodes
//!
//! | Node type     | Description                                                     |
//! |---------------|-----------------------------------------------------------------|
//! | [`Condition`] | Asks a yes/no question; `true` → Success, `false` → Failure.    |
//! | [`Action`]    | Does work (possibly long-running) and reports its status.       |
//! | `Sequence`    | Ticks children left-to-right; fails on first child failure.     |
//! | `Fallback`    | Ticks children left-to-right; succeeds on first child success.  |
//!
//! Ticks are `async`: an action that waits on the navigation stack suspends
//! the mission task instead of blocking a thread.
//!
//! # Example
//!
//! ```rust
//! use navcore_runtime::behavior_tree::{BehaviorNode, NodeStatus};
//!
//! let tree: BehaviorNode<u32> = BehaviorNode::fallback(vec![
//!     BehaviorNode::condition("is_zero", |n: &u32| *n == 0),
//!     BehaviorNode::condition("is_small", |n: &u32| *n < 10),
//! ]);
//!
//! let mut n = 3;
//! let status = futures_util::FutureExt::now_or_never(tree.tick(&mut n));
//! assert_eq!(status, Some(NodeStatus::Success));
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tracing::trace;

// ─────────────────────────────────────────────────────────────────────────────
// NodeStatus
// ─────────────────────────────────────────────────────────────────────────────

/// Result of ticking a node once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Success,
    Failure,
}

impl From<bool> for NodeStatus {
    fn from(ok: bool) -> Self {
        if ok { NodeStatus::Success } else { NodeStatus::Failure }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Leaf traits
// ─────────────────────────────────────────────────────────────────────────────

/// A yes/no check. May wait (e.g. until a blocking condition clears).
#[async_trait]
pub trait Condition<C: Send>: Send + Sync {
    async fn check(&self, ctx: &mut C) -> bool;
}

/// Plain predicates are conditions.
#[async_trait]
impl<C, F> Condition<C> for F
where
    C: Send,
    F: Fn(&C) -> bool + Send + Sync,
{
    async fn check(&self, ctx: &mut C) -> bool {
        self(&*ctx)
    }
}

/// A unit of work that reports success or failure.
#[async_trait]
pub trait Action<C: Send>: Send + Sync {
    async fn run(&self, ctx: &mut C) -> NodeStatus;
}

// ─────────────────────────────────────────────────────────────────────────────
// BehaviorNode
// ─────────────────────────────────────────────────────────────────────────────

/// A node in a behavior tree over context `C`.
///
/// Build trees with [`condition`](Self::condition), [`action`](Self::action),
/// [`sequence`](Self::sequence) and [`fallback`](Self::fallback), then call
/// [`tick`](Self::tick).
pub enum BehaviorNode<C: Send> {
    Condition {
        name: String,
        check: Arc<dyn Condition<C>>,
    },
    Action {
        name: String,
        action: Arc<dyn Action<C>>,
    },
    Sequence(Vec<BehaviorNode<C>>),
    Fallback(Vec<BehaviorNode<C>>),
}

impl<C: Send> BehaviorNode<C> {
    pub fn condition(name: impl Into<String>, check: impl Condition<C> + 'static) -> Self {
        BehaviorNode::Condition {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Like [`condition`](Self::condition) but shares an existing leaf.
    pub fn shared_condition(name: impl Into<String>, check: Arc<dyn Condition<C>>) -> Self {
        BehaviorNode::Condition {
            name: name.into(),
            check,
        }
    }

    pub fn action(name: impl Into<String>, action: impl Action<C> + 'static) -> Self {
        BehaviorNode::Action {
            name: name.into(),
            action: Arc::new(action),
        }
    }

    /// Like [`action`](Self::action) but shares an existing leaf.
    pub fn shared_action(name: impl Into<String>, action: Arc<dyn Action<C>>) -> Self {
        BehaviorNode::Action {
            name: name.into(),
            action,
        }
    }

    pub fn sequence(children: Vec<BehaviorNode<C>>) -> Self {
        BehaviorNode::Sequence(children)
    }

    pub fn fallback(children: Vec<BehaviorNode<C>>) -> Self {
        BehaviorNode::Fallback(children)
    }

    /// Tick this node against `ctx` and return its status.
    ///
    /// An empty `Sequence` succeeds; an empty `Fallback` fails.
    pub fn tick<'a>(&'a self, ctx: &'a mut C) -> BoxFuture<'a, NodeStatus> {
        Box::pin(async move {
            let status = match self {
                BehaviorNode::Condition { check, .. } => check.check(ctx).await.into(),
                BehaviorNode::Action { action, .. } => action.run(ctx).await,
                BehaviorNode::Sequence(children) => {
                    for child in children {
                        if child.tick(ctx).await == NodeStatus::Failure {
                            return NodeStatus::Failure;
                        }
                    }
                    NodeStatus::Success
                }
                BehaviorNode::Fallback(children) => {
                    for child in children {
                        if child.tick(ctx).await == NodeStatus::Success {
                            return NodeStatus::Success;
                        }
                    }
                    NodeStatus::Failure
                }
            };
            if let Some(name) = self.name() {
                trace!(node = name, ?status, "leaf ticked");
            }
            status
        })
    }

    /// Leaf name; composites return `None`.
    fn name(&self) -> Option<&str> {
        match self {
            BehaviorNode::Condition { name, .. } | BehaviorNode::Action { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Number of children of a composite; leaves return 0.
    pub(crate) fn len(&self) -> usize {
        match self {
            BehaviorNode::Sequence(c) | BehaviorNode::Fallback(c) => c.len(),
            _ => 0,
        }
    }
}

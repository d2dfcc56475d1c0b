//! `navcore-runtime` – Navigation Orchestration
//!
//! Sequences navigation goals, gates each one on robot health, and tracks
//! mission state for status readers.
//!
//! # Modules
//!
//! - [`behavior_tree`] – [`BehaviorNode`][behavior_tree::BehaviorNode]: async
//!   Condition / Action / Sequence / Fallback nodes over a caller-owned
//!   context.
//! - [`state`] – [`NavigationState`][state::NavigationState] and the
//!   watch-backed [`StateStore`][state::StateStore].
//! - [`executor`] – [`GoalExecutor`][executor::GoalExecutor]: one goal,
//!   dispatch to terminal outcome, with timeout and cancel handling.
//! - [`mission`] – [`MissionSequencer`][mission::MissionSequencer]: intent
//!   expansion, lap limits, operator hold, and the per-goal retry / safety
//!   policy tree.
//! - [`health`] – [`HealthMonitor`][health::HealthMonitor] telemetry polling
//!   and the [`LiveSafetyGate`][health::LiveSafetyGate].
//! - [`navigator`] – [`Navigator`][navigator::Navigator]: the caller-facing
//!   facade (missions, status, home, reset, mapping control, reports).
//! - [`config`] – [`NavigatorConfig`][config::NavigatorConfig] policy constants.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing] with an
//!   optional OTLP exporter.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use navcore_middleware::{SimNavStack, SimTelemetry};
//! use navcore_runtime::{MissionEnd, Navigator, NavigatorConfig};
//! use navcore_types::{MissionIntent, NavMode, Pose};
//!
//! # tokio_test_block_on(async {
//! let nav = Navigator::new(
//!     NavigatorConfig::default(),
//!     Arc::new(SimNavStack::new()),
//!     Arc::new(SimTelemetry::new()),
//! )
//! .await;
//! nav.start_mission(MissionIntent::single_goal(Pose::new(1.0, 1.0, 0.0)).unwrap())
//!     .await
//!     .unwrap();
//! assert_eq!(nav.wait_mission().await, Some(MissionEnd::Completed));
//! assert_eq!(nav.status().mode, NavMode::Idle);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

pub mod behavior_tree;
pub mod config;
pub mod executor;
pub mod health;
pub mod mission;
pub mod navigator;
pub mod state;
pub mod telemetry;

pub use behavior_tree::{BehaviorNode, NodeStatus};
pub use config::NavigatorConfig;
pub use executor::{GoalExecution, GoalExecutor};
pub use health::{HealthMonitor, LiveSafetyGate};
pub use mission::{GoalRecorder, LapPlan, MissionEnd, MissionSequencer, SafetyCheck, SequencerPolicy};
pub use navigator::Navigator;
pub use state::{NavigationState, StateStore};
pub use telemetry::{TracerProviderGuard, init_tracing};

//! `navcore-middleware` – The Stack Boundary
//!
//! Everything the orchestration core consumes from the outside world passes
//! through the traits defined here. The core never speaks a transport
//! protocol directly.
//!
//! # Modules
//!
//! - [`adapter`] – the [`NavigationStack`] and [`TelemetrySource`] traits
//!   every backend implements.
//! - [`sim`] – [`SimNavStack`] / [`SimTelemetry`]: in-process, scriptable
//!   stand-ins used by tests and the CLI `sim` backend.
//! - [`rosbridge`] – [`RosbridgeNavStack`]: drives Nav2's
//!   `navigate_to_pose` action and reads robot telemetry over a
//!   `rosbridge_server` WebSocket.

pub mod adapter;
pub mod rosbridge;
pub mod sim;
mod status;

pub use adapter::{NavigationStack, TelemetrySource};
pub use rosbridge::RosbridgeNavStack;
pub use sim::{SimNavStack, SimResponse, SimTelemetry};

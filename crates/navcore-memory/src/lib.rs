//! `navcore-memory` – Goal Journal.
//!
//! Durable record of every goal the navigator has finished, kept in a local
//! SQLite file so mission history survives restarts of the operator console.
//!
//! # Modules
//!
//! - [`journal`] – [`GoalJournal`][journal::GoalJournal]: append-only store of
//!   [`GoalRecord`][navcore_types::GoalRecord]s with per-mission queries and
//!   outcome tallies.

pub mod journal;

pub use journal::{GoalJournal, JournalError, OutcomeTally};

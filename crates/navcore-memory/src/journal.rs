//! Goal Journal.
//!
//! Appends one row per finished goal to a SQLite database. The in-memory
//! history held by the navigator is bounded; the journal is not.
//!
//! # Storage layout
//!
//! | column      | type    | description                                    |
//! |-------------|---------|------------------------------------------------|
//! | id          | INTEGER | Row id (insertion order)                       |
//! | mission_id  | TEXT    | UUID of the mission the goal belonged to       |
//! | goal_id     | TEXT    | UUID of the goal                               |
//! | x, y, yaw   | REAL    | Goal target pose                               |
//! | tolerance   | REAL    | Positional tolerance in metres, or NULL        |
//! | outcome     | TEXT    | `succeeded` / `failed` / `cancelled` / `timed_out` |
//! | reason      | TEXT    | Failure reason, or NULL                        |
//! | recorded_at | TEXT    | RFC-3339 completion time (UTC)                 |
//!
//! # Example
//!
//! ```rust
//! use navcore_memory::GoalJournal;
//! use navcore_types::{GoalOutcome, GoalRecord, NavigationGoal, Pose};
//! use uuid::Uuid;
//!
//! let journal = GoalJournal::open_in_memory().unwrap();
//! let goal = NavigationGoal::new(Pose::new(1.0, 0.0, 0.0), None);
//! journal.record(&GoalRecord::new(Uuid::new_v4(), goal, GoalOutcome::Succeeded)).unwrap();
//! assert_eq!(journal.tally().unwrap().succeeded, 1);
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use navcore_types::{GoalOutcome, GoalRecord, NavigationGoal, Pose};
use parking_lot::Mutex;
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt journal row: {0}")]
    Corrupt(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// OutcomeTally
// ─────────────────────────────────────────────────────────────────────────────

/// Count of journal rows per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
}

impl OutcomeTally {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled + self.timed_out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GoalJournal
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed, append-only goal history.
pub struct GoalJournal {
    conn: Mutex<Connection>,
}

impl GoalJournal {
    /// Open (or create) a journal database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let journal = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        journal.init_schema()?;
        Ok(journal)
    }

    /// Open a temporary in-memory journal (useful for testing).
    pub fn open_in_memory() -> Result<Self, JournalError> {
        let journal = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        journal.init_schema()?;
        Ok(journal)
    }

    fn init_schema(&self) -> Result<(), JournalError> {
        self.conn.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS goal_records (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                mission_id  TEXT NOT NULL,
                goal_id     TEXT NOT NULL,
                x           REAL NOT NULL,
                y           REAL NOT NULL,
                yaw         REAL NOT NULL,
                tolerance   REAL,
                outcome     TEXT NOT NULL,
                reason      TEXT,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS goal_records_mission
                ON goal_records (mission_id);",
        )?;
        Ok(())
    }

    /// Append one finished goal.
    pub fn record(&self, record: &GoalRecord) -> Result<(), JournalError> {
        let goal = &record.goal;
        self.conn.lock().execute(
            "INSERT INTO goal_records
                 (mission_id, goal_id, x, y, yaw, tolerance, outcome, reason, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.mission_id.to_string(),
                goal.id.to_string(),
                goal.target.x,
                goal.target.y,
                goal.target.yaw,
                goal.tolerance,
                record.outcome.label(),
                record.outcome.reason(),
                record.recorded_at.to_rfc3339(),
            ],
        )?;
        debug!(goal_id = %goal.id, outcome = record.outcome.label(), "goal journaled");
        Ok(())
    }

    /// Every record, oldest first.
    pub fn all_records(&self) -> Result<Vec<GoalRecord>, JournalError> {
        self.query("SELECT * FROM goal_records ORDER BY id ASC", [])
    }

    /// Records belonging to one mission, oldest first.
    pub fn mission_records(&self, mission_id: Uuid) -> Result<Vec<GoalRecord>, JournalError> {
        self.query(
            "SELECT * FROM goal_records WHERE mission_id = ?1 ORDER BY id ASC",
            [mission_id.to_string()],
        )
    }

    /// The `limit` most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<GoalRecord>, JournalError> {
        self.query(
            "SELECT * FROM goal_records ORDER BY id DESC LIMIT ?1",
            [limit as i64],
        )
    }

    pub fn tally(&self) -> Result<OutcomeTally, JournalError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT outcome, COUNT(*) FROM goal_records GROUP BY outcome")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        let mut tally = OutcomeTally::default();
        for row in rows {
            let (label, n) = row?;
            match label.as_str() {
                "succeeded" => tally.succeeded = n,
                "failed" => tally.failed = n,
                "cancelled" => tally.cancelled = n,
                "timed_out" => tally.timed_out = n,
                other => return Err(JournalError::Corrupt(format!("unknown outcome {other}"))),
            }
        }
        Ok(tally)
    }

    fn query<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<GoalRecord>, JournalError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawRow::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

struct RawRow {
    mission_id: String,
    goal_id: String,
    target: Pose,
    tolerance: Option<f64>,
    outcome: String,
    reason: Option<String>,
    recorded_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            mission_id: row.get("mission_id")?,
            goal_id: row.get("goal_id")?,
            target: Pose::new(row.get("x")?, row.get("y")?, row.get("yaw")?),
            tolerance: row.get("tolerance")?,
            outcome: row.get("outcome")?,
            reason: row.get("reason")?,
            recorded_at: row.get("recorded_at")?,
        })
    }

    fn into_record(self) -> Result<GoalRecord, JournalError> {
        let parse_uuid = |s: &str| {
            Uuid::parse_str(s).map_err(|e| JournalError::Corrupt(format!("uuid {s}: {e}")))
        };
        let outcome = match self.outcome.as_str() {
            "succeeded" => GoalOutcome::Succeeded,
            "failed" => GoalOutcome::Failed(self.reason.unwrap_or_default()),
            "cancelled" => GoalOutcome::Cancelled,
            "timed_out" => GoalOutcome::TimedOut,
            other => return Err(JournalError::Corrupt(format!("unknown outcome {other}"))),
        };
        let recorded_at = self
            .recorded_at
            .parse::<DateTime<Utc>>()
            .map_err(|e| JournalError::Corrupt(format!("timestamp: {e}")))?;
        Ok(GoalRecord {
            mission_id: parse_uuid(&self.mission_id)?,
            goal: NavigationGoal {
                id: parse_uuid(&self.goal_id)?,
                target: self.target,
                tolerance: self.tolerance,
            },
            outcome,
            recorded_at,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mission: Uuid, x: f64, outcome: GoalOutcome) -> GoalRecord {
        GoalRecord::new(mission, NavigationGoal::new(Pose::new(x, 0.0, 0.0), Some(0.2)), outcome)
    }

    #[test]
    fn records_come_back_in_insertion_order() {
        let journal = GoalJournal::open_in_memory().unwrap();
        let mission = Uuid::new_v4();
        let first = record(mission, 1.0, GoalOutcome::Succeeded);
        let second = record(mission, 2.0, GoalOutcome::Failed("stack failure code 6".into()));
        journal.record(&first).unwrap();
        journal.record(&second).unwrap();

        let all = journal.all_records().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].goal.id, first.goal.id);
        assert_eq!(all[1].outcome, GoalOutcome::Failed("stack failure code 6".into()));
        assert_eq!(all[1].goal.tolerance, Some(0.2));
    }

    #[test]
    fn mission_filter_and_recent() {
        let journal = GoalJournal::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        journal.record(&record(a, 1.0, GoalOutcome::Succeeded)).unwrap();
        journal.record(&record(b, 2.0, GoalOutcome::Cancelled)).unwrap();
        journal.record(&record(a, 3.0, GoalOutcome::TimedOut)).unwrap();

        let only_a = journal.mission_records(a).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|r| r.mission_id == a));

        let recent = journal.recent(1).unwrap();
        assert_eq!(recent[0].goal.target.x, 3.0);
    }

    #[test]
    fn tally_counts_each_outcome() {
        let journal = GoalJournal::open_in_memory().unwrap();
        let m = Uuid::new_v4();
        journal.record(&record(m, 0.0, GoalOutcome::Succeeded)).unwrap();
        journal.record(&record(m, 0.0, GoalOutcome::Succeeded)).unwrap();
        journal.record(&record(m, 0.0, GoalOutcome::TimedOut)).unwrap();
        let tally = journal.tally().unwrap();
        assert_eq!(tally.succeeded, 2);
        assert_eq!(tally.timed_out, 1);
        assert_eq!(tally.total(), 3);
    }

    #[test]
    fn journal_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("goals.db");
        {
            let journal = GoalJournal::open(&path).unwrap();
            journal
                .record(&record(Uuid::new_v4(), 1.0, GoalOutcome::Succeeded))
                .unwrap();
        }
        let reopened = GoalJournal::open(&path).unwrap();
        assert_eq!(reopened.all_records().unwrap().len(), 1);
    }
}

//! Core data model.
//!
//! A worker is a polling process bound to one queue. Its record in the store
//! carries a lifecycle status plus the tunables an operator may edit live.

use crate::error::{Error, Result};
use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeDelta, TimeZone};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Timestamp layout used for every date field in a worker record.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Token in an action template replaced by the task payload.
pub const DATA_TOKEN: &str = "##data##";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Record just created, nothing polled yet.
    Started,
    /// Blocked on the queue.
    Waiting,
    /// Running the action for an acquired task.
    Working,
    /// Pausing between two polls.
    Sleeping,
    /// Past its end date. Terminal.
    Killed,
}

impl Status {
    /// Can the daemon move from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Started, Waiting)
                | (Waiting, Working)
                | (Waiting, Sleeping)
                | (Waiting, Waiting)    // empty poll, sleep disabled
                | (Working, Sleeping)
                | (Working, Waiting)    // sleep disabled
                | (Working, Killed)     // deadline passed right after dispatch
                | (Sleeping, Waiting)
                | (Waiting, Killed)
                | (Sleeping, Killed)
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        self == Status::Killed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Started => "STARTED",
            Status::Waiting => "WAITING",
            Status::Working => "WORKING",
            Status::Sleeping => "SLEEPING",
            Status::Killed => "KILLED",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "STARTED" => Ok(Status::Started),
            "WAITING" => Ok(Status::Waiting),
            "WORKING" => Ok(Status::Working),
            "SLEEPING" => Ok(Status::Sleeping),
            "KILLED" => Ok(Status::Killed),
            _ => Err(Error::Parse {
                what: "status",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Pop mode
// ---------------------------------------------------------------------------

/// Which end of the queue a worker takes tasks from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PopMode {
    /// Oldest task first.
    #[default]
    Fifo,
    /// Most recently pushed task first.
    Lifo,
}

impl PopMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PopMode::Fifo => "FIFO",
            PopMode::Lifo => "LIFO",
        }
    }
}

impl std::fmt::Display for PopMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PopMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIFO" => Ok(PopMode::Fifo),
            "LIFO" => Ok(PopMode::Lifo),
            _ => Err(Error::Parse {
                what: "pop mode",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Record fields
// ---------------------------------------------------------------------------

/// The fixed set of fields stored in a worker record hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Status,
    StatusChangeDate,
    StartDate,
    EndDate,
    WaitingTimeout,
    LoopSleep,
    Action,
    ActionCount,
    Type,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::Status,
        Field::StatusChangeDate,
        Field::StartDate,
        Field::EndDate,
        Field::WaitingTimeout,
        Field::LoopSleep,
        Field::Action,
        Field::ActionCount,
        Field::Type,
    ];

    /// Hash field name in the store.
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Status => "status",
            Field::StatusChangeDate => "status_changedate",
            Field::StartDate => "start_date",
            Field::EndDate => "end_date",
            Field::WaitingTimeout => "waiting_timeout",
            Field::LoopSleep => "loop_sleep",
            Field::Action => "action",
            Field::ActionCount => "action_cpt",
            Field::Type => "type",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Field::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| Error::Parse {
                what: "record field",
                value: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Normalize a queue or instance name: lowercase, spaces removed.
pub fn clean_name(raw: &str) -> Result<String> {
    let cleaned: String = raw.replace(' ', "").to_lowercase();
    if cleaned.is_empty() {
        return Err(Error::InvalidName(format!("{raw:?} is empty once cleaned")));
    }
    Ok(cleaned)
}

/// Format a timestamp the way record date fields store it.
pub fn format_date(at: DateTime<Local>) -> String {
    at.format(DATE_FORMAT).to_string()
}

/// Parse a record date field. Accepts the record layout or RFC 3339.
/// Blank or unrecognized input yields `None`.
///
/// A local time repeated by a DST fall-back resolves to its first
/// occurrence. A local time skipped by a spring-forward gap is read with
/// the offset in force before the jump, so it lands just after the gap
/// instead of reading as expired.
pub fn parse_date(raw: &str) -> Option<DateTime<Local>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, DATE_FORMAT) {
        return resolve_local(&Local, naive);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Local))
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(at) => Some(at),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        // Gaps are at most an hour; shifting past it reuses the old offset.
        LocalResult::None => tz.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest(),
    }
}

/// Replace every occurrence of the data token in `template` with `payload`.
pub fn render_action(template: &str, payload: &str) -> String {
    template.replace(DATA_TOKEN, payload)
}

//! Stage status machine.

use crate::ids::StageId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub const ALL: [StageStatus; 5] = [
        StageStatus::Pending,
        StageStatus::Running,
        StageStatus::Completed,
        StageStatus::Failed,
        StageStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Skipped
        )
    }

    /// Counts towards pipeline completion.
    pub fn is_done(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped)
    }

    pub fn can_transition_to(self, next: StageStatus) -> bool {
        use StageStatus::*;
        matches!(
            (self, next),
            (Pending, Running | Completed | Failed | Skipped)
                | (Running, Completed | Failed | Skipped)
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StageStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "invalid stage status '{}', expected one of: pending, running, completed, failed, skipped",
                    s
                ))
            })
    }
}

/// One ordered step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: StageId,
    pub name: String,
    pub order: u32,
    pub status: StageStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Stage {
    pub fn new(name: impl Into<String>, order: u32) -> Self {
        let name = name.into();
        Self {
            id: StageId::from_name(&name),
            name,
            order,
            status: StageStatus::Pending,
            start_time: None,
            end_time: None,
            duration_ms: None,
            data: Map::new(),
        }
    }

    /// Apply a status transition, stamping times. Returns the previous status.
    pub fn apply(&mut self, next: StageStatus, now: DateTime<Utc>) -> Result<StageStatus> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                entity: "stage",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let previous = self.status;
        self.status = next;

        if next == StageStatus::Running {
            self.start_time = Some(now);
        } else if next.is_terminal() {
            self.start_time.get_or_insert(now);
            self.end_time = Some(now);
            self.duration_ms = stage_duration(self.start_time, self.end_time);
        }

        Ok(previous)
    }

    /// Shallow-merge caller-supplied data; later keys win.
    pub fn merge_data(&mut self, data: Map<String, Value>) {
        self.data.extend(data);
    }
}

fn stage_duration(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<u64> {
    match (start, end) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
        _ => None,
    }
}

//! Pipeline log entries.

use crate::ids::{PipelineId, StageId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(Error::Validation(format!("invalid log level '{}'", other))),
        }
    }
}

/// A log line as sent by an agent: either bare text or a structured record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum LogInput {
    Line(String),
    Record {
        message: String,
        #[serde(default)]
        level: Option<LogLevel>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl LogInput {
    /// Convert into an entry. The sequence is assigned by the store.
    pub fn into_entry(
        self,
        pipeline_id: PipelineId,
        stage_id: StageId,
        received_at: DateTime<Utc>,
    ) -> LogEntry {
        let (message, level, timestamp) = match self {
            LogInput::Line(message) => (message, LogLevel::default(), received_at),
            LogInput::Record {
                message,
                level,
                timestamp,
            } => (
                message,
                level.unwrap_or_default(),
                timestamp.unwrap_or(received_at),
            ),
        };

        LogEntry {
            pipeline_id,
            stage_id,
            sequence: 0,
            timestamp,
            level,
            message,
        }
    }
}

/// Append-only log line attached to one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub pipeline_id: PipelineId,
    pub stage_id: StageId,
    /// Position in the pipeline's log, in arrival order.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

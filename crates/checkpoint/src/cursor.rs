//! The time cursor: start of the last successful sync run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Checkpoint;

/// Watermark of already-processed upstream changes.
///
/// Holds the start time (epoch milliseconds) of the last run that completed.
/// Upstream records modified after this instant are picked up by the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeCursor {
    pub last_run_started_ms: i64,
}

impl TimeCursor {
    /// Cursor used when none has been stored: everything is newer than it.
    pub const EPOCH: TimeCursor = TimeCursor {
        last_run_started_ms: 0,
    };

    pub fn from_millis(ms: i64) -> Self {
        Self {
            last_run_started_ms: ms,
        }
    }

    pub fn now() -> Self {
        Self::from_millis(Utc::now().timestamp_millis())
    }

    /// The cursor as a UTC datetime, if representable.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.last_run_started_ms)
    }
}

impl Checkpoint for TimeCursor {
    const SOURCE_TYPE: &'static str = "lms-time-cursor";

    fn to_cli_string(&self) -> String {
        self.last_run_started_ms.to_string()
    }

    /// Accepts epoch milliseconds or an RFC 3339 timestamp.
    fn from_cli_string(s: &str) -> anyhow::Result<Self> {
        let value = s.trim();
        if let Ok(ms) = value.parse::<i64>() {
            return Ok(Self::from_millis(ms));
        }
        let dt = DateTime::parse_from_rfc3339(value).map_err(|e| {
            anyhow::anyhow!(
                "Invalid time cursor '{value}': expected epoch milliseconds or RFC 3339 ({e})"
            )
        })?;
        Ok(Self::from_millis(dt.with_timezone(&Utc).timestamp_millis()))
    }
}

impl std::fmt::Display for TimeCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{} ({})", self.last_run_started_ms, dt.to_rfc3339()),
            None => write!(f, "{}", self.last_run_started_ms),
        }
    }
}

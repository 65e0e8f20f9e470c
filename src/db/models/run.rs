//! One reasoning run: an offline replay or an online session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunMode {
    Reason,
    Interval,
    Ultimate,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Reason => "Reason",
            RunMode::Interval => "Interval",
            RunMode::Ultimate => "Ultimate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub mode: RunMode,
    /// Input file or device the run read from
    pub source: String,
    pub model_names: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_sample: u64,
    pub stop_reason: Option<String>,
}

impl Run {
    pub fn start(mode: RunMode, source: impl Into<String>, model_names: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mode,
            source: source.into(),
            model_names,
            started_at: Utc::now(),
            finished_at: None,
            last_sample: 0,
            stop_reason: None,
        }
    }

    pub fn finish(&mut self, last_sample: u64, stop_reason: impl Into<String>) {
        self.finished_at = Some(Utc::now());
        self.last_sample = last_sample;
        self.stop_reason = Some(stop_reason.into());
    }
}

use serde::Serialize;

use crate::config::TrackerConfig;
use crate::error::{HmpError, Result};

use super::interval::{Interval, IntervalSnapshot};

/// Outcome of feeding one sample to a tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// Idle and below the opening threshold.
    Ignored,
    Opened,
    Extended,
    /// Active -> Idle. `significant` is false when the reporting filter drops it.
    Closed {
        snapshot: IntervalSnapshot,
        significant: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerState {
    Idle,
    Active,
}

/// Diagnostic view of one tracker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStatus {
    pub model: String,
    pub state: TrackerState,
    pub open: Option<IntervalSnapshot>,
    pub closed_count: usize,
    pub last_sample: Option<u64>,
    pub current_possibility: f32,
    pub previous_possibility: f32,
}

/// Open/close decision logic for one model's possibility stream.
///
/// Idle opens on `possibility >= opening_threshold`; Active stays open while
/// `possibility >= closing_threshold` and otherwise closes at the last sample
/// that stayed above it.
#[derive(Debug, Clone)]
pub struct IntervalTracker {
    model_name: String,
    policy: TrackerConfig,
    current_possibility: f32,
    previous_possibility: f32,
    open: Option<Interval>,
    last_sample: Option<u64>,
    history: Vec<Interval>,
}

impl IntervalTracker {
    pub fn new(model_name: impl Into<String>, policy: TrackerConfig) -> Self {
        Self {
            model_name: model_name.into(),
            policy,
            current_possibility: 0.0,
            previous_possibility: 0.0,
            open: None,
            last_sample: None,
            history: Vec::new(),
        }
    }

    pub fn update(&mut self, sample: u64, possibility: f32) -> Result<TrackerEvent> {
        if !possibility.is_finite() {
            return Err(HmpError::InvalidPossibility {
                model: self.model_name.clone(),
                sample,
                value: possibility,
            });
        }
        if let Some(last) = self.last_sample {
            if sample <= last {
                return Err(HmpError::NonMonotonicSample {
                    model: self.model_name.clone(),
                    sample,
                    last,
                });
            }
        }

        self.last_sample = Some(sample);
        self.previous_possibility = self.current_possibility;
        self.current_possibility = possibility;

        if let Some(interval) = self.open.as_mut() {
            if possibility >= self.policy.closing_threshold {
                interval.extend(sample, possibility)?;
                return Ok(TrackerEvent::Extended);
            }
            let end = interval.end_sample();
            return self.close_open(end);
        }

        if possibility >= self.policy.opening_threshold {
            self.open = Some(Interval::open(self.model_name.clone(), sample, possibility));
            Ok(TrackerEvent::Opened)
        } else {
            Ok(TrackerEvent::Ignored)
        }
    }

    /// Close the open interval at the last sample seen. `None` when idle.
    pub fn force_close(&mut self) -> Result<Option<TrackerEvent>> {
        match (self.open.is_some(), self.last_sample) {
            (true, Some(last)) => self.close_open(last).map(Some),
            _ => Ok(None),
        }
    }

    fn close_open(&mut self, end: u64) -> Result<TrackerEvent> {
        let Some(mut interval) = self.open.take() else {
            return Ok(TrackerEvent::Ignored);
        };
        interval.close(end)?;
        let snapshot = interval.describe();
        let significant = interval.is_significant(&self.policy);
        self.history.push(interval);
        Ok(TrackerEvent::Closed {
            snapshot,
            significant,
        })
    }

    pub fn state(&self) -> TrackerState {
        if self.open.is_some() {
            TrackerState::Active
        } else {
            TrackerState::Idle
        }
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            model: self.model_name.clone(),
            state: self.state(),
            open: self.open.as_ref().map(Interval::describe),
            closed_count: self.history.len(),
            last_sample: self.last_sample,
            current_possibility: self.current_possibility,
            previous_possibility: self.previous_possibility,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn policy(&self) -> &TrackerConfig {
        &self.policy
    }

    pub fn open_interval(&self) -> Option<&Interval> {
        self.open.as_ref()
    }

    pub fn history(&self) -> &[Interval] {
        &self.history
    }

    pub fn last_sample(&self) -> Option<u64> {
        self.last_sample
    }
}

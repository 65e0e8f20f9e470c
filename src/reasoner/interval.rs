use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::error::{HmpError, Result};

/// One contiguous activation of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    model_name: String,
    is_open: bool,
    start_sample: u64,
    /// Last sample confirmed to belong to the interval. Provisional while open.
    end_sample: u64,
    peak_possibility: f32,
    opening_possibility: f32,
    rise_time: u64,
}

/// Read-only description of an interval handed to sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalSnapshot {
    pub model: String,
    pub is_open: bool,
    pub start_sample: u64,
    pub end_sample: u64,
    /// `None` while the interval is still open
    pub upper_bound: Option<u64>,
    pub peak_possibility: f32,
    pub opening_possibility: f32,
    pub rise_time: u64,
}

impl IntervalSnapshot {
    pub fn peak_sample(&self) -> u64 {
        self.start_sample + self.rise_time
    }

    pub fn span(&self) -> u64 {
        self.end_sample - self.start_sample
    }

    /// `<model> <start> <end> <peak> <rise>`, the flat report format.
    pub fn report_line(&self) -> String {
        format!(
            "{} {} {} {:.4} {}",
            self.model, self.start_sample, self.end_sample, self.peak_possibility, self.rise_time
        )
    }
}

impl Interval {
    pub fn open(model_name: impl Into<String>, sample: u64, possibility: f32) -> Self {
        Self {
            model_name: model_name.into(),
            is_open: true,
            start_sample: sample,
            end_sample: sample,
            peak_possibility: possibility,
            opening_possibility: possibility,
            rise_time: 0,
        }
    }

    pub fn extend(&mut self, sample: u64, possibility: f32) -> Result<()> {
        self.ensure_open()?;
        self.end_sample = sample;
        if possibility > self.peak_possibility {
            self.peak_possibility = possibility;
            self.rise_time = sample - self.start_sample;
        }
        Ok(())
    }

    pub fn close(&mut self, sample: u64) -> Result<()> {
        self.ensure_open()?;
        self.end_sample = sample;
        self.is_open = false;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(HmpError::ClosedInterval(self.model_name.clone()))
        }
    }

    pub fn describe(&self) -> IntervalSnapshot {
        IntervalSnapshot {
            model: self.model_name.clone(),
            is_open: self.is_open,
            start_sample: self.start_sample,
            end_sample: self.end_sample,
            upper_bound: self.upper_bound(),
            peak_possibility: self.peak_possibility,
            opening_possibility: self.opening_possibility,
            rise_time: self.rise_time,
        }
    }

    /// Reportable under `policy`: long enough and with a high enough peak.
    pub fn is_significant(&self, policy: &TrackerConfig) -> bool {
        self.span() >= policy.min_duration_samples
            && self.peak_possibility > policy.min_peak_possibility
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn start_sample(&self) -> u64 {
        self.start_sample
    }

    pub fn end_sample(&self) -> u64 {
        self.end_sample
    }

    pub fn upper_bound(&self) -> Option<u64> {
        (!self.is_open).then_some(self.end_sample)
    }

    pub fn peak_possibility(&self) -> f32 {
        self.peak_possibility
    }

    pub fn opening_possibility(&self) -> f32 {
        self.opening_possibility
    }

    pub fn rise_time(&self) -> u64 {
        self.rise_time
    }

    pub fn peak_sample(&self) -> u64 {
        self.start_sample + self.rise_time
    }

    pub fn span(&self) -> u64 {
        self.end_sample - self.start_sample
    }
}

use serde::{Deserialize, Serialize};

use crate::reasoner::ClosedInterval;

/// A closed interval as persisted, keyed by run and close position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredInterval {
    pub run_id: String,
    pub closed_seq: u64,
    pub model_index: u64,
    pub model_name: String,
    pub start_sample: u64,
    pub end_sample: u64,
    pub peak_possibility: f64,
    pub opening_possibility: f64,
    pub rise_time: u64,
    pub significant: bool,
}

impl StoredInterval {
    pub fn from_closed(run_id: &str, closed_seq: u64, closed: &ClosedInterval) -> Self {
        let snapshot = &closed.snapshot;
        Self {
            run_id: run_id.to_string(),
            closed_seq,
            model_index: closed.model_index as u64,
            model_name: snapshot.model.clone(),
            start_sample: snapshot.start_sample,
            end_sample: snapshot.end_sample,
            peak_possibility: f64::from(snapshot.peak_possibility),
            opening_possibility: f64::from(snapshot.opening_possibility),
            rise_time: snapshot.rise_time,
            significant: closed.significant,
        }
    }

    /// Same layout as the flat interval report.
    pub fn report_line(&self) -> String {
        format!(
            "{} {} {} {:.4} {}",
            self.model_name, self.start_sample, self.end_sample, self.peak_possibility, self.rise_time
        )
    }
}

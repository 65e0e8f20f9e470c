use std::io::{BufRead, Lines};

use serde::Serialize;

use crate::error::{HmpError, Result};
use crate::sinks::ReportSink;

use super::engine::Reasoner;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// One line of a recorded possibility log: `<sample> <p0> <p1> ... <pN-1>`.
#[derive(Debug, Clone, PartialEq)]
pub struct PossibilityRecord {
    pub sample: u64,
    pub possibilities: Vec<f32>,
}

impl PossibilityRecord {
    /// `Ok(None)` for blank lines and `#` comments.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }

        let mut tokens = trimmed.split_whitespace();
        let sample = tokens
            .next()
            .and_then(|token| token.parse::<u64>().ok())
            .ok_or_else(|| HmpError::malformed(line, "missing or invalid sample index"))?;

        let possibilities = tokens
            .map(|token| {
                token
                    .parse::<f32>()
                    .map_err(|_| HmpError::malformed(line, format!("invalid possibility {token:?}")))
            })
            .collect::<Result<Vec<f32>>>()?;

        if possibilities.is_empty() {
            return Err(HmpError::malformed(line, "no possibilities"));
        }

        Ok(Some(Self {
            sample,
            possibilities,
        }))
    }
}

/// Iterates the records of a possibility log, skipping blanks and comments.
pub struct RecordReader<R: BufRead> {
    lines: Lines<R>,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<PossibilityRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            match PossibilityRecord::parse(&line) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSummary {
    pub records: u64,
    pub skipped: u64,
    pub intervals_closed: usize,
    pub intervals_reported: usize,
    pub forced_closes: usize,
    pub last_sample: u64,
}

impl Reasoner {
    /// Replay a recorded possibility log and report every closed interval.
    ///
    /// Malformed or rejected records are logged and skipped. Intervals still
    /// open after the last record are closed at the final sample.
    pub fn offline_reason<R, S>(&mut self, reader: R, report: &mut S) -> Result<OfflineSummary>
    where
        R: BufRead,
        S: ReportSink + ?Sized,
    {
        let mut summary = OfflineSummary::default();

        for record in RecordReader::new(reader) {
            let record = match record {
                Ok(record) => record,
                Err(HmpError::Io(err)) => return Err(HmpError::Io(err)),
                Err(err) => {
                    log_warn!("skipping record: {err}");
                    summary.skipped += 1;
                    continue;
                }
            };

            match self.update_tick(record.sample, &record.possibilities) {
                Ok(outcome) => {
                    summary.records += 1;
                    if !outcome.rejected.is_empty() {
                        summary.skipped += 1;
                    }
                    for (model_index, err) in &outcome.rejected {
                        log_warn!("record {} rejected for model {model_index}: {err}", record.sample);
                    }
                }
                Err(err) if err.is_input_contract() => {
                    log_warn!("skipping record {}: {err}", record.sample);
                    summary.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        summary.forced_closes = self.force_close_all()?.len();
        summary.last_sample = self.last_sample();

        let closed = self.closed_intervals();
        summary.intervals_closed = closed.len();
        for interval in self.significant_intervals() {
            report.report(&interval)?;
            summary.intervals_reported += 1;
        }
        report.finish()?;

        log_info!(
            "offline reasoning done: {} records ({} skipped), {} intervals closed, {} reported",
            summary.records,
            summary.skipped,
            summary.intervals_closed,
            summary.intervals_reported
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, ModelSetConfig, TrackerConfig};
    use crate::reasoner::IntervalSnapshot;
    use crate::sinks::ChannelBus;
    use std::io::Cursor;
    use std::sync::Arc;

    fn single_model() -> Reasoner {
        let (bus, _rx) = ChannelBus::new();
        let models = ModelSetConfig {
            models: vec![ModelConfig::new("Climb", TrackerConfig::with_thresholds(0.5, 0.3))],
        };
        Reasoner::new(&models, Arc::new(bus)).unwrap()
    }

    #[test]
    fn parses_records_and_skips_comments() {
        assert_eq!(PossibilityRecord::parse("# header").unwrap(), None);
        assert_eq!(PossibilityRecord::parse("   ").unwrap(), None);
        assert_eq!(
            PossibilityRecord::parse("12 0.5 0.25").unwrap(),
            Some(PossibilityRecord {
                sample: 12,
                possibilities: vec![0.5, 0.25],
            })
        );
        assert!(PossibilityRecord::parse("x 0.5").is_err());
        assert!(PossibilityRecord::parse("3 0.5 abc").is_err());
        assert!(PossibilityRecord::parse("3").is_err());
    }

    #[test]
    fn replay_closes_where_possibility_drops() {
        let mut reasoner = single_model();
        let mut report: Vec<IntervalSnapshot> = Vec::new();
        let log = "1 0.9\n2 0.95\n3 0.1\n";

        let summary = reasoner.offline_reason(Cursor::new(log), &mut report).unwrap();

        assert_eq!(summary.records, 3);
        assert_eq!(summary.forced_closes, 0);
        assert_eq!(report.len(), 1);
        let interval = &report[0];
        assert_eq!(interval.start_sample, 1);
        assert_eq!(interval.end_sample, 2);
        assert_eq!(interval.peak_possibility, 0.95);
        assert_eq!(interval.rise_time, 1);
    }

    #[test]
    fn replay_force_closes_at_final_sample() {
        let mut reasoner = single_model();
        let mut report: Vec<IntervalSnapshot> = Vec::new();
        let log = "1 0.1\n2 0.6\n3 0.7\n4 0.4\n";

        let summary = reasoner.offline_reason(Cursor::new(log), &mut report).unwrap();

        assert_eq!(summary.forced_closes, 1);
        assert_eq!(summary.last_sample, 4);
        assert_eq!((report[0].start_sample, report[0].end_sample), (2, 4));
        assert_eq!(reasoner.open_count(), 0);
    }

    #[test]
    fn malformed_and_out_of_order_records_are_skipped() {
        let mut reasoner = single_model();
        let mut report: Vec<IntervalSnapshot> = Vec::new();
        let log = "1 0.9\ngarbage\n5 0.8\n4 0.0\n6 0.1\n7 0.2 0.3\n";

        let summary = reasoner.offline_reason(Cursor::new(log), &mut report).unwrap();

        assert_eq!(summary.skipped, 3);
        assert_eq!(report.len(), 1);
        assert_eq!((report[0].start_sample, report[0].end_sample), (1, 5));
    }
}

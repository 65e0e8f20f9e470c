use std::{collections::HashSet, fmt::Write as _, sync::Arc};

use serde::Serialize;

use crate::config::{ModelConfig, ModelSetConfig};
use crate::error::{HmpError, Result};
use crate::sinks::{Notification, TupleBus};

use super::interval::IntervalSnapshot;
use super::tracker::{IntervalTracker, TrackerEvent, TrackerState, TrackerStatus};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// An interval that just closed, tagged with its model slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedInterval {
    pub model_index: usize,
    pub snapshot: IntervalSnapshot,
    pub significant: bool,
}

/// Result of one possibility vector.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub closed: Vec<ClosedInterval>,
    /// Models whose tracker refused the sample; the others were still updated.
    pub rejected: Vec<(usize, HmpError)>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonerSnapshot {
    pub last_sample: u64,
    pub models: Vec<TrackerStatus>,
}

/// One interval tracker per model, in classifier order.
pub struct Reasoner {
    trackers: Vec<IntervalTracker>,
    last_sample: u64,
    /// (model index, history index) in the order intervals closed
    close_order: Vec<(usize, usize)>,
    bus: Arc<dyn TupleBus>,
}

impl Reasoner {
    pub fn new(models: &ModelSetConfig, bus: Arc<dyn TupleBus>) -> Result<Self> {
        if models.is_empty() {
            return Err(HmpError::Configuration("model set is empty".into()));
        }

        let mut seen = HashSet::new();
        for ModelConfig { name, policy } in &models.models {
            if name.trim().is_empty() {
                return Err(HmpError::Configuration("model name is blank".into()));
            }
            if !seen.insert(name.as_str()) {
                return Err(HmpError::Configuration(format!(
                    "duplicate model name {name}"
                )));
            }
            policy.validate(name)?;
        }

        let trackers = models
            .models
            .iter()
            .map(|model| IntervalTracker::new(model.name.clone(), model.policy))
            .collect();

        log_info!("Reasoner built with {} models", models.len());

        Ok(Self {
            trackers,
            last_sample: 0,
            close_order: Vec::new(),
            bus,
        })
    }

    /// Model set with the default policy for every name.
    pub fn from_names<I, S>(names: I, bus: Arc<dyn TupleBus>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(&ModelSetConfig::from_names(names), bus)
    }

    /// Route one sample to one model's tracker.
    pub fn update_interval(
        &mut self,
        model_index: usize,
        sample: u64,
        possibility: f32,
    ) -> Result<TrackerEvent> {
        let count = self.trackers.len();
        let tracker = self
            .trackers
            .get_mut(model_index)
            .ok_or(HmpError::ModelOutOfRange {
                index: model_index,
                count,
            })?;

        let event = tracker.update(sample, possibility)?;
        match &event {
            TrackerEvent::Opened => {
                log_debug!("{} opened at sample {sample} ({possibility:.3})", tracker.model_name());
            }
            TrackerEvent::Closed { snapshot, .. } => {
                log_debug!(
                    "{} closed [{}, {}] peak {:.3}",
                    snapshot.model,
                    snapshot.start_sample,
                    snapshot.end_sample,
                    snapshot.peak_possibility
                );
                self.close_order
                    .push((model_index, tracker.history().len() - 1));
            }
            TrackerEvent::Ignored | TrackerEvent::Extended => {}
        }
        self.last_sample = self.last_sample.max(sample);
        Ok(event)
    }

    /// Feed one possibility vector; every model is updated even if some reject it.
    pub fn update_tick(&mut self, sample: u64, possibilities: &[f32]) -> Result<TickOutcome> {
        if possibilities.len() != self.trackers.len() {
            return Err(HmpError::DimensionMismatch {
                expected: self.trackers.len(),
                actual: possibilities.len(),
            });
        }

        let mut outcome = TickOutcome::default();
        for (model_index, possibility) in possibilities.iter().copied().enumerate() {
            match self.update_interval(model_index, sample, possibility) {
                Ok(TrackerEvent::Closed {
                    snapshot,
                    significant,
                }) => outcome.closed.push(ClosedInterval {
                    model_index,
                    snapshot,
                    significant,
                }),
                Ok(_) => {}
                Err(err) if err.is_input_contract() => outcome.rejected.push((model_index, err)),
                Err(err) => return Err(err),
            }
        }
        Ok(outcome)
    }

    /// Close every open interval at its tracker's last sample.
    pub fn force_close_all(&mut self) -> Result<Vec<ClosedInterval>> {
        let mut closed = Vec::new();
        for (model_index, tracker) in self.trackers.iter_mut().enumerate() {
            if let Some(TrackerEvent::Closed {
                snapshot,
                significant,
            }) = tracker.force_close()?
            {
                log_debug!("{} force-closed at sample {}", snapshot.model, snapshot.end_sample);
                self.close_order
                    .push((model_index, tracker.history().len() - 1));
                closed.push(ClosedInterval {
                    model_index,
                    snapshot,
                    significant,
                });
            }
        }
        Ok(closed)
    }

    /// Put a closed interval on the bus if it passes its model's filter.
    pub fn publish(&self, closed: &ClosedInterval) -> bool {
        if !closed.significant {
            return false;
        }
        self.bus.publish(Notification::interval(&closed.snapshot));
        true
    }

    /// Every closed interval with its slot and filter verdict, in close order.
    pub fn closed_records(&self) -> Vec<ClosedInterval> {
        self.close_order
            .iter()
            .map(|&(model_index, index)| {
                let tracker = &self.trackers[model_index];
                let interval = &tracker.history()[index];
                ClosedInterval {
                    model_index,
                    snapshot: interval.describe(),
                    significant: interval.is_significant(tracker.policy()),
                }
            })
            .collect()
    }

    /// Every closed interval, in close order.
    pub fn closed_intervals(&self) -> Vec<IntervalSnapshot> {
        self.closed_records()
            .into_iter()
            .map(|closed| closed.snapshot)
            .collect()
    }

    /// Closed intervals that pass their model's significance filter, in close order.
    pub fn significant_intervals(&self) -> Vec<IntervalSnapshot> {
        self.closed_records()
            .into_iter()
            .filter(|closed| closed.significant)
            .map(|closed| closed.snapshot)
            .collect()
    }

    pub fn history(&self, model_index: usize) -> Result<Vec<IntervalSnapshot>> {
        let tracker = self
            .trackers
            .get(model_index)
            .ok_or(HmpError::ModelOutOfRange {
                index: model_index,
                count: self.trackers.len(),
            })?;
        Ok(tracker.history().iter().map(|i| i.describe()).collect())
    }

    pub fn tracker(&self, model_index: usize) -> Option<&IntervalTracker> {
        self.trackers.get(model_index)
    }

    pub fn model_names(&self) -> Vec<String> {
        self.trackers
            .iter()
            .map(|t| t.model_name().to_string())
            .collect()
    }

    pub fn model_count(&self) -> usize {
        self.trackers.len()
    }

    /// Highest sample index processed so far; 0 before the first sample.
    pub fn last_sample(&self) -> u64 {
        self.last_sample
    }

    pub fn open_count(&self) -> usize {
        self.trackers
            .iter()
            .filter(|t| t.state() == TrackerState::Active)
            .count()
    }

    pub fn snapshot(&self) -> ReasonerSnapshot {
        ReasonerSnapshot {
            last_sample: self.last_sample,
            models: self.trackers.iter().map(IntervalTracker::status).collect(),
        }
    }

    pub fn status_report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} models, last sample {}",
            self.trackers.len(),
            self.last_sample
        );
        for status in self.snapshot().models {
            match status.open {
                Some(open) => {
                    let _ = writeln!(
                        out,
                        "  {:<16} active since {} (through {}), peak {:.3}, {} closed",
                        status.model,
                        open.start_sample,
                        open.end_sample,
                        open.peak_possibility,
                        status.closed_count
                    );
                }
                None => {
                    let _ = writeln!(
                        out,
                        "  {:<16} idle, {} closed",
                        status.model, status.closed_count
                    );
                }
            }
        }
        out
    }

    pub fn print_status(&self) {
        for line in self.status_report().lines() {
            log_info!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::sinks::ChannelBus;

    fn reasoner(names: &[&str]) -> Reasoner {
        let (bus, _rx) = ChannelBus::new();
        Reasoner::from_names(names.iter().copied(), Arc::new(bus)).unwrap()
    }

    #[test]
    fn empty_model_set_is_a_configuration_error() {
        let (bus, _rx) = ChannelBus::new();
        let err = Reasoner::from_names(Vec::<String>::new(), Arc::new(bus))
            .err()
            .unwrap();
        assert!(matches!(err, HmpError::Configuration(_)));
    }

    #[test]
    fn duplicate_names_are_a_configuration_error() {
        let (bus, _rx) = ChannelBus::new();
        let err = Reasoner::from_names(["Sit", "Walk", "Sit"], Arc::new(bus))
            .err()
            .unwrap();
        assert!(matches!(err, HmpError::Configuration(msg) if msg.contains("Sit")));
    }

    #[test]
    fn invalid_policy_is_a_configuration_error() {
        let (bus, _rx) = ChannelBus::new();
        let models = ModelSetConfig {
            models: vec![ModelConfig::new("Sit", TrackerConfig::with_thresholds(0.2, 0.4))],
        };
        assert!(matches!(
            Reasoner::new(&models, Arc::new(bus)),
            Err(HmpError::Configuration(_))
        ));
    }

    #[test]
    fn out_of_range_index() {
        let mut r = reasoner(&["Sit", "Walk"]);
        let err = r.update_interval(2, 1, 0.9).unwrap_err();
        assert!(matches!(err, HmpError::ModelOutOfRange { index: 2, count: 2 }));
        assert_eq!(r.last_sample(), 0);
    }

    #[test]
    fn bad_input_for_one_model_leaves_others_alone() {
        let mut r = reasoner(&["Sit", "Walk"]);
        r.update_interval(0, 5, 0.9).unwrap();
        r.update_interval(1, 5, 0.9).unwrap();

        assert!(r.update_interval(0, 4, 0.1).is_err());
        assert!(matches!(
            r.update_interval(1, 6, 0.1).unwrap(),
            TrackerEvent::Closed { .. }
        ));

        let sit = r.tracker(0).unwrap().status();
        assert_eq!(sit.state, TrackerState::Active);
        assert_eq!(sit.last_sample, Some(5));
        assert_eq!(r.history(1).unwrap().len(), 1);
    }

    #[test]
    fn interleaved_models_are_isolated() {
        let mut r = reasoner(&["Sit", "Walk"]);
        r.update_interval(0, 1, 0.9).unwrap();
        r.update_interval(1, 1, 0.1).unwrap();
        r.update_interval(1, 2, 0.95).unwrap();
        r.update_interval(0, 2, 0.6).unwrap();
        r.update_interval(0, 3, 0.0).unwrap();
        r.update_interval(1, 3, 0.7).unwrap();

        let sit = r.history(0).unwrap();
        assert_eq!(sit.len(), 1);
        assert_eq!((sit[0].start_sample, sit[0].end_sample), (1, 2));
        assert_eq!(sit[0].peak_possibility, 0.9);

        assert!(r.history(1).unwrap().is_empty());
        let walk = r.tracker(1).unwrap().status();
        assert_eq!(walk.open.unwrap().start_sample, 2);
        assert_eq!(walk.previous_possibility, 0.95);
    }

    #[test]
    fn tick_dimension_mismatch() {
        let mut r = reasoner(&["Sit", "Walk"]);
        let err = r.update_tick(1, &[0.1]).unwrap_err();
        assert!(matches!(err, HmpError::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn close_order_spans_models() {
        let mut r = reasoner(&["Sit", "Walk"]);
        r.update_tick(1, &[0.9, 0.9]).unwrap();
        r.update_tick(2, &[0.9, 0.1]).unwrap();
        let outcome = r.update_tick(3, &[0.1, 0.1]).unwrap();
        assert_eq!(outcome.closed.len(), 1);
        assert_eq!(outcome.closed[0].model_index, 0);

        let order: Vec<String> = r.closed_intervals().into_iter().map(|i| i.model).collect();
        assert_eq!(order, vec!["Walk".to_string(), "Sit".to_string()]);
    }

    #[test]
    fn force_close_all_leaves_nothing_open() {
        let mut r = reasoner(&["Sit", "Walk", "Drink"]);
        r.update_tick(1, &[0.9, 0.2, 0.7]).unwrap();
        r.update_tick(2, &[0.8, 0.2, 0.6]).unwrap();
        assert_eq!(r.open_count(), 2);

        let closed = r.force_close_all().unwrap();
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|c| c.snapshot.end_sample == 2));
        assert_eq!(r.open_count(), 0);
        assert_eq!(r.closed_intervals().len(), 2);
    }

    #[test]
    fn publish_respects_significance() {
        let (bus, mut rx) = ChannelBus::new();
        let models = ModelSetConfig {
            models: vec![
                ModelConfig::new("Sit", TrackerConfig::default()),
                ModelConfig::new(
                    "Walk",
                    TrackerConfig {
                        min_duration_samples: 5,
                        ..TrackerConfig::default()
                    },
                ),
            ],
        };
        let mut r = Reasoner::new(&models, Arc::new(bus)).unwrap();
        r.update_tick(1, &[0.9, 0.9]).unwrap();
        let outcome = r.update_tick(2, &[0.0, 0.0]).unwrap();

        let published: Vec<bool> = outcome.closed.iter().map(|c| r.publish(c)).collect();
        assert_eq!(published, vec![true, false]);
        assert_eq!(rx.try_recv().unwrap().key, "HMP.Sit");
        assert!(rx.try_recv().is_err());
        assert_eq!(r.significant_intervals().len(), 1);
        assert_eq!(r.closed_intervals().len(), 2);
    }

    #[test]
    fn status_report_lists_every_model() {
        let mut r = reasoner(&["Sit", "Walk"]);
        r.update_tick(1, &[0.9, 0.1]).unwrap();

        let report = r.status_report();
        assert!(report.contains("Sit"));
        assert!(report.contains("active since 1"));
        assert!(report.contains("Walk"));
        assert!(report.contains("idle"));
    }
}

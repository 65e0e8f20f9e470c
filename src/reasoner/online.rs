use std::fmt;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{HmpError, Result};

use super::engine::{ClosedInterval, Reasoner};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Pull-based feed of possibility vectors, one per sample tick.
///
/// `Ok(None)` ends the stream. A source is not restartable; build a fresh one.
pub trait PossibilitySource {
    fn next_vector(&mut self) -> Result<Option<Vec<f32>>>;
}

impl<S: PossibilitySource + ?Sized> PossibilitySource for &mut S {
    fn next_vector(&mut self) -> Result<Option<Vec<f32>>> {
        (**self).next_vector()
    }
}

/// Adapts any iterator of vectors into a source.
pub struct IterSource<I>(pub I);

impl<I> PossibilitySource for IterSource<I>
where
    I: Iterator<Item = Vec<f32>>,
{
    fn next_vector(&mut self) -> Result<Option<Vec<f32>>> {
        Ok(self.0.next())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "reason", content = "detail")]
pub enum StopReason {
    Cancelled,
    EndOfStream,
    TransportFailed(String),
    SourceFailed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::EndOfStream => write!(f, "end of stream"),
            StopReason::TransportFailed(reason) => write!(f, "transport failed: {reason}"),
            StopReason::SourceFailed(reason) => write!(f, "source failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineSummary {
    pub ticks: u64,
    pub rejected_ticks: u64,
    pub recovered_errors: u64,
    pub intervals_closed: usize,
    pub intervals_published: usize,
    pub forced_closes: usize,
    pub stop_reason: StopReason,
}

impl OnlineSummary {
    fn new() -> Self {
        Self {
            ticks: 0,
            rejected_ticks: 0,
            recovered_errors: 0,
            intervals_closed: 0,
            intervals_published: 0,
            forced_closes: 0,
            stop_reason: StopReason::EndOfStream,
        }
    }
}

impl Reasoner {
    /// Consume a live feed until `cancel` fires or the feed ends, publishing
    /// each interval on the bus as soon as it closes.
    ///
    /// Samples are numbered from 1. Timeouts and bad lines are logged and
    /// retried; a broken transport ends the run. Open intervals are always
    /// force-closed and published before returning.
    pub fn online_reason<S>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
    ) -> Result<OnlineSummary>
    where
        S: PossibilitySource + ?Sized,
    {
        let mut summary = OnlineSummary::new();

        summary.stop_reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let possibilities = match source.next_vector() {
                Ok(Some(possibilities)) => possibilities,
                // Sources may bail out early on the same token.
                Ok(None) if cancel.is_cancelled() => break StopReason::Cancelled,
                Ok(None) => break StopReason::EndOfStream,
                Err(HmpError::Transport(err)) if err.is_recoverable() => {
                    log_warn!("{err}; retrying");
                    summary.recovered_errors += 1;
                    continue;
                }
                Err(HmpError::Transport(err)) => {
                    log_error!("stopping online reasoning: {err}");
                    break StopReason::TransportFailed(err.to_string());
                }
                Err(err) if err.is_input_contract() => {
                    log_warn!("skipping input: {err}");
                    summary.recovered_errors += 1;
                    continue;
                }
                Err(err) => {
                    log_error!("stopping online reasoning: {err}");
                    break StopReason::SourceFailed(err.to_string());
                }
            };

            let sample = self.last_sample() + 1;
            summary.ticks += 1;
            match self.update_tick(sample, &possibilities) {
                Ok(outcome) => {
                    for (model_index, err) in &outcome.rejected {
                        log_warn!("sample {sample} rejected for model {model_index}: {err}");
                    }
                    self.publish_all(&outcome.closed, &mut summary);
                }
                Err(err) if err.is_input_contract() => {
                    log_warn!("sample {sample} rejected: {err}");
                    summary.rejected_ticks += 1;
                }
                Err(err) => return Err(err),
            }
        };

        let forced = self.force_close_all()?;
        summary.forced_closes = forced.len();
        self.publish_all(&forced, &mut summary);

        log_info!(
            "online reasoning stopped ({:?}) after {} ticks: {} intervals closed, {} published",
            summary.stop_reason,
            summary.ticks,
            summary.intervals_closed,
            summary.intervals_published
        );

        Ok(summary)
    }

    fn publish_all(&self, closed: &[ClosedInterval], summary: &mut OnlineSummary) {
        for interval in closed {
            summary.intervals_closed += 1;
            if self.publish(interval) {
                summary.intervals_published += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::reasoner::IntervalSnapshot;
    use crate::sinks::ChannelBus;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct ScriptedSource {
        steps: VecDeque<Result<Option<Vec<f32>>>>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Result<Option<Vec<f32>>>>) -> Self {
            Self {
                steps: steps.into(),
            }
        }
    }

    impl PossibilitySource for ScriptedSource {
        fn next_vector(&mut self) -> Result<Option<Vec<f32>>> {
            self.steps.pop_front().unwrap_or(Ok(None))
        }
    }

    #[test]
    fn publishes_on_close_and_numbers_from_one() {
        let (bus, mut rx) = ChannelBus::new();
        let mut reasoner = Reasoner::from_names(["Climb"], Arc::new(bus)).unwrap();
        let mut source = IterSource(vec![vec![0.9], vec![0.95], vec![0.1]].into_iter());

        let summary = reasoner
            .online_reason(&mut source, &CancellationToken::new())
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
        assert_eq!(summary.ticks, 3);
        assert_eq!(summary.intervals_published, 1);
        assert_eq!(summary.forced_closes, 0);

        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.key, "HMP.Climb");
        let interval: IntervalSnapshot = serde_json::from_str(&notification.value).unwrap();
        assert_eq!((interval.start_sample, interval.end_sample), (1, 2));
        assert_eq!(interval.peak_possibility, 0.95);
        assert_eq!(interval.rise_time, 1);
    }

    #[test]
    fn timeouts_are_swallowed() {
        let (bus, _rx) = ChannelBus::new();
        let mut reasoner = Reasoner::from_names(["Sit"], Arc::new(bus)).unwrap();
        let mut source = ScriptedSource::new(vec![
            Ok(Some(vec![0.8])),
            Err(TransportError::Timeout.into()),
            Err(TransportError::Garbled("\u{fffd}".into()).into()),
            Ok(Some(vec![0.9])),
        ]);

        let summary = reasoner
            .online_reason(&mut source, &CancellationToken::new())
            .unwrap();

        assert_eq!(summary.recovered_errors, 2);
        assert_eq!(summary.ticks, 2);
        let history = reasoner.history(0).unwrap();
        assert_eq!((history[0].start_sample, history[0].end_sample), (1, 2));
    }

    #[test]
    fn transport_failure_force_closes() {
        let (bus, mut rx) = ChannelBus::new();
        let mut reasoner = Reasoner::from_names(["Sit", "Walk"], Arc::new(bus)).unwrap();
        let mut source = ScriptedSource::new(vec![
            Ok(Some(vec![0.8, 0.1])),
            Ok(Some(vec![0.7, 0.6])),
            Err(TransportError::Failed("device unplugged".into()).into()),
            Ok(Some(vec![0.9, 0.9])),
        ]);

        let summary = reasoner
            .online_reason(&mut source, &CancellationToken::new())
            .unwrap();

        assert!(matches!(summary.stop_reason, StopReason::TransportFailed(_)));
        assert_eq!(summary.forced_closes, 2);
        assert_eq!(reasoner.open_count(), 0);
        assert_eq!(rx.try_recv().unwrap().key, "HMP.Sit");
        assert_eq!(rx.try_recv().unwrap().key, "HMP.Walk");
    }

    #[test]
    fn cancelled_before_first_tick() {
        let (bus, _rx) = ChannelBus::new();
        let mut reasoner = Reasoner::from_names(["Sit"], Arc::new(bus)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut source = IterSource(std::iter::repeat(vec![0.9]));

        let summary = reasoner.online_reason(&mut source, &cancel).unwrap();

        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert_eq!(summary.ticks, 0);
    }

    #[test]
    fn wrong_width_vector_is_skipped() {
        let (bus, _rx) = ChannelBus::new();
        let mut reasoner = Reasoner::from_names(["Sit", "Walk"], Arc::new(bus)).unwrap();
        let mut source = IterSource(vec![vec![0.9, 0.1], vec![0.9], vec![0.0, 0.0]].into_iter());

        let summary = reasoner
            .online_reason(&mut source, &CancellationToken::new())
            .unwrap();

        assert_eq!(summary.rejected_ticks, 1);
        let sit = reasoner.history(0).unwrap();
        assert_eq!((sit[0].start_sample, sit[0].end_sample), (1, 1));
    }
}

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::fall::{standalone_fall, FallSummary};
use crate::reasoner::{ClosedInterval, OnlineSummary, PossibilitySource, Reasoner, ReasonerSnapshot};
use crate::sinks::TupleBus;

use super::transport::LineTransport;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

/// What an online reasoning run leaves behind.
#[derive(Debug, Clone)]
pub struct ReasoningOutcome {
    pub summary: OnlineSummary,
    /// Every closed interval, in close order
    pub intervals: Vec<ClosedInterval>,
    pub model_names: Vec<String>,
    pub final_state: ReasonerSnapshot,
}

/// Blocking driver for online reasoning; meant for `PipelineController::start`.
pub fn reasoning_loop<S>(
    mut reasoner: Reasoner,
    mut source: S,
    cancel: CancellationToken,
) -> Result<ReasoningOutcome>
where
    S: PossibilitySource,
{
    log_info!("reasoning loop started for {:?}", reasoner.model_names());

    let summary = reasoner.online_reason(&mut source, &cancel)?;
    reasoner.print_status();

    Ok(ReasoningOutcome {
        summary,
        intervals: reasoner.closed_records(),
        model_names: reasoner.model_names(),
        final_state: reasoner.snapshot(),
    })
}

/// Blocking driver for the standalone fall relay.
pub fn fall_loop<T>(mut transport: T, bus: Arc<dyn TupleBus>, cancel: CancellationToken) -> FallSummary
where
    T: LineTransport,
{
    log_info!("fall relay loop started");
    standalone_fall(&mut transport, bus.as_ref(), &cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoner::{IterSource, StopReason};
    use crate::sensing::controller::PipelineController;
    use crate::sensing::transport::ReaderTransport;
    use crate::sinks::ChannelBus;
    use std::io::Cursor;

    #[tokio::test]
    async fn reasoning_loop_under_controller() {
        let (bus, mut rx) = ChannelBus::new();
        let reasoner = Reasoner::from_names(["Sit", "Walk"], Arc::new(bus)).unwrap();
        let feed = vec![vec![0.9, 0.0], vec![0.8, 0.7], vec![0.0, 0.6]];

        let mut controller = PipelineController::new("reasoner");
        controller
            .start(move |cancel| reasoning_loop(reasoner, IterSource(feed.into_iter()), cancel))
            .unwrap();
        let outcome = controller.join().await.unwrap().unwrap().unwrap();

        assert_eq!(outcome.summary.stop_reason, StopReason::EndOfStream);
        assert_eq!(outcome.intervals.len(), 2);
        assert_eq!(outcome.intervals[0].snapshot.model, "Sit");
        let walk = &outcome.intervals[1];
        assert_eq!(walk.model_index, 1);
        assert_eq!((walk.snapshot.start_sample, walk.snapshot.end_sample), (2, 3));
        assert!(walk.significant);
        assert!(outcome.final_state.models.iter().all(|m| m.open.is_none()));
        assert_eq!(rx.try_recv().unwrap().key, "HMP.Sit");
        assert_eq!(rx.try_recv().unwrap().key, "HMP.Walk");
    }

    #[tokio::test]
    async fn fall_loop_under_controller() {
        let (bus, mut rx) = ChannelBus::new();
        let bus: Arc<dyn TupleBus> = Arc::new(bus);
        let transport = ReaderTransport::new(Cursor::new("F Fall\nF Lying Still\n"));

        let mut controller = PipelineController::new("fall relay");
        controller
            .start(move |cancel| fall_loop(transport, bus, cancel))
            .unwrap();
        let summary = controller.join().await.unwrap().unwrap();

        assert_eq!(summary.reports, 2);
        assert_eq!(rx.try_recv().unwrap().value, "Fall");
    }
}

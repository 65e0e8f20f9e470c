use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::fall::{publish_fall, FALL_TAG};
use crate::reasoner::PossibilitySource;
use crate::sinks::TupleBus;

use super::classifier::{parse_possibilities, WindowClassifier};
use super::sample::{ImuSample, MOTION_TAG};
use super::transport::LineTransport;
use super::window::SlidingWindow;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStats {
    pub lines: u64,
    pub fall_reports: u64,
    pub motion_samples: u64,
    pub windows_classified: u64,
    pub malformed: u64,
    pub ignored: u64,
}

/// Demultiplexes a tagged device feed: `F` lines go to the fall relay,
/// `H` lines fill the sample window and, once it is full, the classifier.
///
/// Exposed to the reasoner as a possibility source, so a tick is produced
/// for every classified window.
pub struct StreamOrchestrator<T, C> {
    transport: T,
    classifier: C,
    window: SlidingWindow,
    bus: Arc<dyn TupleBus>,
    route_falls: bool,
    cancel: CancellationToken,
    stats: OrchestratorStats,
}

impl<T, C> StreamOrchestrator<T, C>
where
    T: LineTransport,
    C: WindowClassifier,
{
    pub fn new(transport: T, classifier: C, bus: Arc<dyn TupleBus>, cancel: CancellationToken) -> Self {
        let window = SlidingWindow::new(classifier.window_size());
        Self {
            transport,
            classifier,
            window,
            bus,
            route_falls: true,
            cancel,
            stats: OrchestratorStats::default(),
        }
    }

    /// Drop `F` lines instead of relaying them.
    pub fn without_falls(mut self) -> Self {
        self.route_falls = false;
        self
    }

    pub fn stats(&self) -> &OrchestratorStats {
        &self.stats
    }

    fn handle_fall(&mut self, line: &str) {
        if !self.route_falls {
            self.stats.ignored += 1;
            return;
        }
        match publish_fall(line, self.bus.as_ref()) {
            Ok(_) => self.stats.fall_reports += 1,
            Err(err) => {
                log_warn!("skipping fall line: {err}");
                self.stats.malformed += 1;
            }
        }
    }

    fn handle_motion(&mut self, line: &str) -> Result<Option<Vec<f32>>> {
        let sample = match ImuSample::parse(line) {
            Ok(sample) => sample,
            Err(err) => {
                log_warn!("skipping motion line: {err}");
                self.stats.malformed += 1;
                return Ok(None);
            }
        };
        self.stats.motion_samples += 1;

        if !self.window.push(sample) {
            return Ok(None);
        }
        let possibilities = self.classifier.classify(self.window.samples())?;
        self.stats.windows_classified += 1;
        Ok(Some(possibilities))
    }
}

impl<T, C> PossibilitySource for StreamOrchestrator<T, C>
where
    T: LineTransport,
    C: WindowClassifier,
{
    fn next_vector(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            let Some(line) = self.transport.read_line()? else {
                return Ok(None);
            };
            self.stats.lines += 1;

            match line.trim_start().chars().next() {
                Some(FALL_TAG) => self.handle_fall(line.trim_start()),
                Some(MOTION_TAG) => {
                    if let Some(possibilities) = self.handle_motion(&line)? {
                        return Ok(Some(possibilities));
                    }
                }
                Some(other) => {
                    log_debug!("ignoring line with tag {other:?}");
                    self.stats.ignored += 1;
                }
                None => {}
            }
        }
    }
}

/// Possibility vectors already computed upstream, one line per tick.
pub struct LinePossibilitySource<T> {
    transport: T,
}

impl<T: LineTransport> LinePossibilitySource<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl<T: LineTransport> PossibilitySource for LinePossibilitySource<T> {
    fn next_vector(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let Some(line) = self.transport.read_line()? else {
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return parse_possibilities(trimmed).map(Some);
        }
    }
}

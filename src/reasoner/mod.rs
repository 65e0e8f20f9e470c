pub mod engine;
pub mod interval;
pub mod offline;
pub mod online;
pub mod tracker;

pub use engine::{ClosedInterval, Reasoner, ReasonerSnapshot, TickOutcome};
pub use interval::{Interval, IntervalSnapshot};
pub use offline::{OfflineSummary, PossibilityRecord, RecordReader};
pub use online::{IterSource, OnlineSummary, PossibilitySource, StopReason};
pub use tracker::{IntervalTracker, TrackerEvent, TrackerState, TrackerStatus};

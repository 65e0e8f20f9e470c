pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod fall;
pub mod reasoner;
pub mod sensing;
pub mod sinks;
pub mod utils;

use clap::Parser;

pub use config::{ModelConfig, ModelSetConfig, TrackerConfig};
pub use error::{HmpError, Result, TransportError};
pub use reasoner::{
    ClosedInterval, Interval, IntervalSnapshot, IntervalTracker, PossibilitySource, Reasoner,
    TrackerEvent, TrackerState,
};
pub use sinks::{ChannelBus, LogBus, Notification, ReportSink, TupleBus};

/// Parse the command line and run the selected mode to completion.
pub fn run() -> anyhow::Result<()> {
    utils::init_logging();

    let cli = cli::Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(cli::dispatch(cli))
}

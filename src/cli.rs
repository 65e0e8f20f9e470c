use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

use crate::config::ModelSetConfig;
use crate::db::{Database, Run, RunMode, StoredInterval};
use crate::reasoner::{ClosedInterval, Reasoner};
use crate::sensing::{
    fall_loop, open_device, reasoning_loop, LinePossibilitySource, PipelineController,
    ProcessClassifier, ReasoningOutcome, StreamOrchestrator,
};
use crate::sinks::{ChannelBus, FileReporter, LogBus, Notification, TupleBus};

pub const DEFAULT_WINDOW_SIZE: usize = 50;

#[derive(Parser, Debug)]
#[command(name = "hmp-detector", version, about = "Motion primitive interval reasoner and fall alarm relay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ModelArgs {
    /// JSON model-set file (names and thresholds, in classifier order)
    #[arg(long, conflicts_with = "model")]
    pub models: Option<PathBuf>,

    /// Model name with default thresholds; repeat in classifier order
    #[arg(long)]
    pub model: Vec<String>,
}

impl ModelArgs {
    pub fn load(&self) -> Result<ModelSetConfig> {
        if let Some(path) = &self.models {
            return ModelSetConfig::load(path);
        }
        if self.model.is_empty() {
            bail!("no models given: pass --models <file> or at least one --model <name>");
        }
        Ok(ModelSetConfig::from_names(self.model.iter().cloned()))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClassifierArgs {
    /// Command line of the window classifier process
    #[arg(long)]
    pub classifier: Option<String>,

    #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
    pub window_size: usize,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a possibility log and append significant intervals to a report file
    Reason {
        possibilities: PathBuf,
        result_file: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Reason online over a motion device; without --classifier each line is a possibility vector
    Interval {
        device: String,
        #[command(flatten)]
        classifier: ClassifierArgs,
        #[command(flatten)]
        models: ModelArgs,
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Relay fall reports from a fall device
    Fall { device: String },
    /// Fall relay and online reasoning over one combined device
    Ultimate {
        device: String,
        #[command(flatten)]
        classifier: ClassifierArgs,
        #[command(flatten)]
        models: ModelArgs,
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// List stored runs, or the intervals of one run
    History {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        run: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Include intervals filtered out as insignificant
        #[arg(long)]
        all: bool,
        /// Remove the run given by --run and its intervals
        #[arg(long, requires = "run")]
        delete: bool,
    },
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Reason {
            possibilities,
            result_file,
            models,
            store,
        } => reason(&possibilities, &result_file, &models, store.as_deref()).await,
        Command::Interval {
            device,
            classifier,
            models,
            store,
        } => online(RunMode::Interval, &device, &classifier, &models, store.as_deref()).await,
        Command::Fall { device } => fall(&device).await,
        Command::Ultimate {
            device,
            classifier,
            models,
            store,
        } => {
            if classifier.classifier.is_none() {
                bail!("ultimate mode needs --classifier");
            }
            online(RunMode::Ultimate, &device, &classifier, &models, store.as_deref()).await
        }
        Command::History {
            store,
            run,
            limit,
            all,
            delete,
        } => history(&store, run.as_deref(), limit, all, delete).await,
    }
}

async fn reason(
    possibilities: &Path,
    result_file: &Path,
    models: &ModelArgs,
    store: Option<&Path>,
) -> Result<()> {
    let model_set = models.load()?;
    let db = store.map(|path| Database::new(path.to_path_buf())).transpose()?;

    let input = File::open(possibilities)
        .with_context(|| format!("failed to open {}", possibilities.display()))?;
    let mut report = FileReporter::append(result_file)
        .with_context(|| format!("failed to open report file {}", result_file.display()))?;
    let mut reasoner = Reasoner::new(&model_set, Arc::new(LogBus))?;
    let mut run = Run::start(RunMode::Reason, possibilities.display().to_string(), model_set.names());

    let (summary, closed) = tokio::task::spawn_blocking(move || {
        let summary = reasoner.offline_reason(BufReader::new(input), &mut report)?;
        Ok::<_, anyhow::Error>((summary, reasoner.closed_records()))
    })
    .await
    .context("offline reasoning task failed to join")??;

    info!(
        "replayed {} records ({} skipped), reported {} of {} intervals",
        summary.records, summary.skipped, summary.intervals_reported, summary.intervals_closed
    );

    if let Some(db) = db {
        run.finish(summary.last_sample, "end of input");
        persist(&db, &run, &closed).await?;
    }
    Ok(())
}

async fn online(
    mode: RunMode,
    device: &str,
    classifier: &ClassifierArgs,
    models: &ModelArgs,
    store: Option<&Path>,
) -> Result<()> {
    let model_set = models.load()?;
    let db = store.map(|path| Database::new(path.to_path_buf())).transpose()?;

    let (bus, rx) = ChannelBus::new();
    let printer = spawn_printer(rx);
    let bus: Arc<dyn TupleBus> = Arc::new(bus);

    let reasoner = Reasoner::new(&model_set, bus.clone())?;
    let transport =
        open_device(device).with_context(|| format!("failed to open device {device}"))?;
    let mut run = Run::start(mode, device, model_set.names());

    let mut controller = PipelineController::new("online reasoner");
    match &classifier.classifier {
        Some(command) => {
            let classifier =
                ProcessClassifier::spawn(command, classifier.window_size, model_set.len())?;
            let route_falls = mode == RunMode::Ultimate;
            controller.start(move |cancel| {
                let orchestrator =
                    StreamOrchestrator::new(transport, classifier, bus, cancel.clone());
                let mut orchestrator = if route_falls {
                    orchestrator
                } else {
                    orchestrator.without_falls()
                };
                let outcome = reasoning_loop(reasoner, &mut orchestrator, cancel);
                let stats = orchestrator.stats();
                info!(
                    "device feed: {} lines, {} fall reports, {} motion samples, {} windows classified, {} malformed, {} ignored",
                    stats.lines,
                    stats.fall_reports,
                    stats.motion_samples,
                    stats.windows_classified,
                    stats.malformed,
                    stats.ignored
                );
                outcome
            })?;
        }
        None => {
            drop(bus);
            controller.start(move |cancel| {
                reasoning_loop(reasoner, LinePossibilitySource::new(transport), cancel)
            })?;
        }
    }

    let outcome: ReasoningOutcome = run_until_interrupted(&mut controller).await??;
    finish_printer(printer).await;

    let summary = &outcome.summary;
    info!(
        "{} ticks, {} intervals closed, {} published, stopped: {}",
        summary.ticks, summary.intervals_closed, summary.intervals_published, summary.stop_reason
    );

    if let Some(db) = db {
        run.finish(outcome.final_state.last_sample, summary.stop_reason.to_string());
        persist(&db, &run, &outcome.intervals).await?;
    }
    Ok(())
}

async fn fall(device: &str) -> Result<()> {
    let (bus, rx) = ChannelBus::new();
    let printer = spawn_printer(rx);
    let bus: Arc<dyn TupleBus> = Arc::new(bus);
    let transport =
        open_device(device).with_context(|| format!("failed to open device {device}"))?;

    let mut controller = PipelineController::new("fall relay");
    controller.start(move |cancel| fall_loop(transport, bus, cancel))?;

    let summary = run_until_interrupted(&mut controller).await?;
    finish_printer(printer).await;

    info!(
        "relayed {} fall reports ({} alarms, {} malformed)",
        summary.reports, summary.alarms, summary.malformed
    );
    Ok(())
}

async fn history(
    store: &Path,
    run_id: Option<&str>,
    limit: usize,
    all: bool,
    delete: bool,
) -> Result<()> {
    if !store.exists() {
        bail!("no interval store at {}", store.display());
    }
    let db = Database::new(store.to_path_buf())?;

    if let (Some(run_id), true) = (run_id, delete) {
        if !db.delete_run(run_id).await? {
            bail!("no run {run_id} in {}", store.display());
        }
        info!("deleted run {run_id}");
        return Ok(());
    }

    match run_id {
        Some(run_id) => {
            let Some(run) = db.get_run(run_id).await? else {
                bail!("no run {run_id} in {}", store.display());
            };
            println!("{}", serde_json::to_string_pretty(&run)?);
            for interval in db.get_intervals_for_run(run_id, !all).await? {
                let marker = if interval.significant { "" } else { " (filtered)" };
                println!("{}{marker}", interval.report_line());
            }
        }
        None => {
            for run in db.list_runs(limit).await? {
                println!(
                    "{} {:<8} {} started {} last sample {} ({})",
                    run.id,
                    run.mode.as_str(),
                    run.source,
                    run.started_at.to_rfc3339(),
                    run.last_sample,
                    run.stop_reason.as_deref().unwrap_or("unfinished"),
                );
            }
        }
    }
    Ok(())
}

/// Join the driver, cancelling it on Ctrl-C.
async fn run_until_interrupted<T: Send + 'static>(
    controller: &mut PipelineController<T>,
) -> Result<T> {
    let interrupt = controller.cancel_token().map(|cancel| {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping (interrupt again to quit now)");
                cancel.cancel();
            }
            // A driver blocked in a device read only sees the token after the next line.
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("second interrupt, exiting without closing intervals");
                std::process::exit(130);
            }
        })
    });

    let output = controller.join().await;
    if let Some(interrupt) = interrupt {
        interrupt.abort();
    }
    output?.context("driver was never started")
}

/// Tuples leave the process on stdout as `<key> <value>` lines.
fn spawn_printer(mut rx: UnboundedReceiver<Notification>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            println!("{} {}", notification.key, notification.value);
        }
    })
}

async fn finish_printer(printer: JoinHandle<()>) {
    if let Err(err) = printer.await {
        warn!("tuple printer stopped abnormally: {err}");
    }
}

async fn persist(db: &Database, run: &Run, closed: &[ClosedInterval]) -> Result<()> {
    let intervals: Vec<StoredInterval> = closed
        .iter()
        .enumerate()
        .map(|(seq, closed)| StoredInterval::from_closed(&run.id, seq as u64, closed))
        .collect();
    db.save_run(run, &intervals).await?;
    info!(
        "stored run {} with {} intervals in {}",
        run.id,
        intervals.len(),
        db.path().display()
    );
    Ok(())
}

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use super::channel_map::ChannelRegistry;
use super::config::Config;
use super::diagnostics::FragmentCounter;
use super::dispatcher::{BankDispatcher, DispatchSummary};
use super::dump::BankDump;
use super::error::ProcessorError;
use super::router::{OutputRouter, SinkReceivers, Sinks};
use super::worker_status::WorkerStatus;

/// Totals over every event of one input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSummary {
    pub events: u64,
    pub good: u64,
    pub bad: u64,
    pub ppg: u64,
    pub scaler: u64,
    pub skipped: u64,
}

impl InputSummary {
    pub fn add(&mut self, summary: &DispatchSummary) {
        self.events += 1;
        self.good += summary.good as u64;
        self.bad += summary.bad as u64;
        self.ppg += summary.ppg as u64;
        self.scaler += summary.scaler as u64;
        self.skipped += summary.skipped as u64;
    }
}

impl Display for InputSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} events, {} fragments, {} bad fragments, {} ppg, {} scalers, {} skipped",
            self.events, self.good, self.bad, self.ppg, self.scaler, self.skipped
        )
    }
}

/// Records are not persisted here, empty the sinks so they do not grow without bound
fn drain(receivers: &SinkReceivers) {
    receivers.good.try_iter().for_each(drop);
    receivers.bad.try_iter().for_each(drop);
    receivers.ppg.try_iter().for_each(drop);
    receivers.scaler.try_iter().for_each(drop);
}

/// Decode every event of one bank dump
pub fn process_input(
    path: &Path,
    dispatcher: &mut BankDispatcher,
    receivers: &SinkReceivers,
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<InputSummary, ProcessorError> {
    let mut dump = BankDump::open(path)?;
    let input = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    spdlog::info!(
        "Input {} has size: {}",
        input,
        human_bytes::human_bytes(dump.size_bytes() as f64)
    );

    let flush_frac: f32 = 0.01;
    let mut last_progress: f32 = 0.0;
    let mut summary = InputSummary::default();
    dispatcher.reset();
    tx.send(WorkerStatus::new(0.0, &input, worker_id))?;
    while let Some(event) = dump.next_event()? {
        let dispatched = dispatcher.process_event(&event)?;
        summary.add(&dispatched);
        drain(receivers);

        let progress = dump.progress();
        if progress - last_progress > flush_frac {
            last_progress = progress;
            tx.send(WorkerStatus::new(progress, &input, worker_id))?;
        }
    }
    tx.send(WorkerStatus::new(1.0, &input, worker_id))?;
    Ok(summary)
}

/// Process a subset of the inputs, the body of one worker thread.
///
/// Each worker builds its own dispatcher, so timestamp wrap state is never shared; the
/// channel registry and the diagnostics tally are shared by all workers.
pub fn process_subset(
    config: Config,
    registry: Arc<dyn ChannelRegistry>,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<PathBuf>,
    counter: Arc<FragmentCounter>,
) -> Result<(), ProcessorError> {
    let (sinks, receivers) = Sinks::unbounded();
    let router = OutputRouter::new(sinks, counter, config.suppress_errors);
    let mut dispatcher = BankDispatcher::new(registry, config.decoder_options(), router);

    for path in subset {
        if path.exists() {
            spdlog::info!("Processing {}...", path.display());
            let summary = process_input(&path, &mut dispatcher, &receivers, &tx, worker_id)?;
            spdlog::info!("Finished processing {}: {}", path.display(), summary);
        } else {
            spdlog::info!("Input {} does not exist, skipping...", path.display());
        }
    }
    Ok(())
}

/// Divide the inputs in to a set of subsets (per thread/worker)
pub fn create_subsets(config: &Config) -> Vec<Vec<PathBuf>> {
    let mut subsets: Vec<Vec<PathBuf>> = vec![Vec::new(); config.n_threads.max(1) as usize];
    let n_subsets = subsets.len();

    for (idx, path) in config.input_paths.iter().enumerate() {
        subsets[idx % n_subsets].push(path.clone())
    }

    subsets
}

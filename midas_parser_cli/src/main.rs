use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

use libmidas_parser::channel_map::{ChannelMap, ChannelRegistry};
use libmidas_parser::config::Config;
use libmidas_parser::diagnostics::FragmentCounter;
use libmidas_parser::error::{ConfigError, ProcessorError};
use libmidas_parser::process::{create_subsets, process_subset};
use libmidas_parser::worker_status::WorkerStatus;

const LOG_FILE: &str = "./midas_parser.log";

fn init_logger() -> spdlog::Result<()> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from(LOG_FILE))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

fn make_template_config(path: &Path) -> Result<(), ConfigError> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    std::fs::write(path, yaml_str)?;
    Ok(())
}

fn make_bar(pb_manager: &MultiProgress, worker_id: usize) -> ProgressBar {
    let bar = pb_manager.add(ProgressBar::new(100));
    if let Ok(style) =
        ProgressStyle::with_template("{prefix} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_prefix(format!("Worker {worker_id}"));
    bar
}

fn main() {
    // Create a cli
    let matches = Command::new("midas_parser_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .get_matches();

    if let Err(e) = init_logger() {
        eprintln!("Could not create the log file {LOG_FILE}: {e}");
        return;
    }

    let config_path = match matches.get_one::<String>("path") {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("A configuration path is required (-p/--path)");
            return;
        }
    };

    if let Some(("new", _)) = matches.subcommand() {
        spdlog::info!("Making a template config at {}...", config_path.display());
        match make_template_config(&config_path) {
            Ok(()) => println!("Wrote template config to {}", config_path.display()),
            Err(e) => {
                spdlog::error!("{e}");
                eprintln!("Failed to write template config: {e}");
            }
        }
        return;
    }

    // Load our config
    spdlog::info!("Loading config from {}...", config_path.display());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            spdlog::error!("{e}");
            eprintln!("Failed to load config: {e}");
            return;
        }
    };
    spdlog::info!("Config successfully loaded.");
    for path in config.input_paths.iter() {
        spdlog::info!("Input Path: {}", path.display());
    }
    match &config.channel_map_path {
        Some(path) => spdlog::info!("Channel Map Path: {}", path.display()),
        None => spdlog::info!("Channel Map Path: None"),
    }
    spdlog::info!("Record Waveforms: {}", config.record_waveforms);
    spdlog::info!("Ignore Missing Channels: {}", config.ignore_missing_channel);
    spdlog::info!("Suppress Errors: {}", config.suppress_errors);
    spdlog::info!("Number of Threads: {}", config.n_threads);

    if !config.is_n_threads_valid() {
        spdlog::error!("Number of threads must be at least 1");
        eprintln!("Number of threads must be at least 1");
        return;
    }
    if let Err(e) = config.check_inputs() {
        spdlog::error!("{e}");
        eprintln!("Invalid input: {e}");
        return;
    }

    // One channel map shared by every worker
    let registry: Arc<dyn ChannelRegistry> =
        match ChannelMap::new(config.channel_map_path.as_deref()) {
            Ok(map) => Arc::new(map),
            Err(e) => {
                spdlog::error!("{e}");
                eprintln!("Failed to load channel map: {e}");
                return;
            }
        };

    // Spawn the workers
    let pb_manager = MultiProgress::new();
    let counter = Arc::new(FragmentCounter::new());
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let subsets = create_subsets(&config);
    let mut bars: Vec<Option<ProgressBar>> = vec![None; subsets.len()];
    let mut workers: Vec<JoinHandle<Result<(), ProcessorError>>> = vec![];
    for (idx, subset) in subsets.into_iter().enumerate() {
        // Dont make empty workers
        if subset.is_empty() {
            continue;
        }
        let conf = config.clone();
        let registry = registry.clone();
        let tx = tx.clone();
        let counter = counter.clone();
        bars[idx] = Some(make_bar(&pb_manager, idx));
        workers.push(std::thread::spawn(move || {
            process_subset(conf, registry, tx, idx, subset, counter)
        }));
    }
    drop(tx);

    // Poll progress until every worker hangs up
    loop {
        match rx.try_recv() {
            Ok(status) => {
                if let Some(Some(bar)) = bars.get(status.worker_id) {
                    bar.set_position((status.progress * 100.0) as u64);
                    bar.set_message(status.input);
                }
            }
            Err(TryRecvError::Empty) => {
                std::thread::sleep(std::time::Duration::from_millis(100))
            }
            Err(TryRecvError::Disconnected) => break,
        }
    }

    let mut failed = false;
    for worker in workers {
        match worker.join() {
            Ok(Ok(())) => spdlog::info!("Worker complete"),
            Ok(Err(e)) => {
                failed = true;
                spdlog::error!("Processor error: {e}")
            }
            Err(_) => {
                failed = true;
                spdlog::error!("An error occured joining one of the workers!")
            }
        }
    }
    for bar in bars.into_iter().flatten() {
        bar.finish();
    }

    counter.report();
    let totals = counter.totals();
    println!(
        "Decoded {} fragments, {} failed. See {LOG_FILE} for details.",
        totals.good, totals.bad
    );
    if failed {
        eprintln!("At least one worker failed, check the log file!");
    }
    spdlog::info!("Done.");
}

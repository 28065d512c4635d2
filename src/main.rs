//! CLI entry point for the record loop
//!
//! # Usage
//!
//! Process record files once and print the run summary:
//! ```bash
//! record-loop files run_42.evio.0 run_42.evio.1 --max-records 100000
//! ```
//!
//! Replay files through the live path (receiver task, bounded queue):
//! ```bash
//! record-loop replay run_42.evio.0 --config config/record_loop.toml
//! ```
//!
//! Validate a configuration file:
//! ```bash
//! record-loop check-config config/record_loop.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use daq_record_loop::codec::{frame_len, BankDecoder};
use daq_record_loop::config::{LoopConfig, DEFAULT_CONFIG_PATH};
use daq_record_loop::logging::{self, LoggingConfig, OutputFormat};
use daq_record_loop::processor::{
    EndRunSentinel, ProcessorChain, RunSummary, RunSummaryHandle, RunSummaryProcessor,
};
use daq_record_loop::record_loop::RecordLoop;
use daq_record_loop::source::{BoundedQueueSource, QueueReceiver, SequentialFileSource};
use daq_record_loop::{LoopSummary, RecordKind};

#[derive(Parser)]
#[command(name = "record-loop")]
#[command(about = "Drive DAQ records through a processor chain", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process record files in order
    Files {
        /// Record files; falls back to `[files] paths` from the configuration
        paths: Vec<PathBuf>,

        /// Stop after this many records
        #[arg(long)]
        max_records: Option<u64>,
    },

    /// Stream record files through the live receiver and queue
    Replay {
        /// Record files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Stop after this many records
        #[arg(long)]
        max_records: Option<u64>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// File to check
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { path } => check_config(&path),
        Commands::Files { paths, max_records } => {
            let config = load_config(&cli.config, cli.log_format, max_records)?;
            run_files(&config, paths)
        }
        Commands::Replay { paths, max_records } => {
            let config = load_config(&cli.config, cli.log_format, max_records)?;
            run_replay(&config, paths)
        }
    }
}

fn load_config(path: &Path, format: OutputFormat, max_records: Option<u64>) -> Result<LoopConfig> {
    let mut config = LoopConfig::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    if let Some(max) = max_records {
        config.run.max_records = max;
    }
    config.validate()?;
    logging::init(LoggingConfig::from_loop_config(&config)?.with_format(format))?;
    info!(config = %path.display(), "Configuration loaded");
    Ok(config)
}

fn check_config(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("configuration file {} does not exist", path.display());
    }
    let config = LoopConfig::load_from(path)?;
    config.validate()?;
    println!("{}: ok", path.display());
    println!("  queue: capacity {} ({:?})", config.queue.capacity, config.queue.overflow);
    println!("  files: {} listed, policy {:?}", config.files.paths.len(), config.files.error_policy);
    println!("  live:  policy {:?}", config.live.error_policy);
    println!();
    println!("# effective configuration (file + environment)");
    print!("{}", toml::to_string_pretty(&config).context("rendering configuration")?);
    Ok(())
}

fn build_chain(config: &LoopConfig) -> Result<(ProcessorChain, RunSummaryHandle)> {
    let run_summary = RunSummaryProcessor::new().with_convention(config.classify.clone());
    let handle = run_summary.handle();

    let mut chain = ProcessorChain::new();
    chain.register(run_summary)?;
    if config.run.sentinel_on_end {
        chain.register(EndRunSentinel::new().with_convention(config.classify.clone()))?;
    }
    Ok((chain, handle))
}

fn run_files(config: &LoopConfig, paths: Vec<PathBuf>) -> Result<()> {
    let paths = if paths.is_empty() {
        config.files.paths.clone()
    } else {
        paths
    };
    if paths.is_empty() {
        bail!("no record files given on the command line or in [files] paths");
    }

    let source = SequentialFileSource::new(paths, BankDecoder).with_policy(config.files.error_policy);
    let (chain, run) = build_chain(config)?;
    let mut record_loop = RecordLoop::new(source, chain).with_options(config.loop_options());

    let result = record_loop.run();
    if let Some(summary) = record_loop.summary() {
        print_summary(summary, &run.snapshot());
    }
    result?;
    Ok(())
}

fn run_replay(config: &LoopConfig, paths: Vec<PathBuf>) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let queue = Arc::new(config.queue.build());
    let (tx, rx) = mpsc::channel::<Bytes>(config.queue.capacity);

    let receiver = QueueReceiver::spawn_on(
        runtime.handle(),
        "replay",
        rx,
        Arc::new(BankDecoder),
        Arc::clone(&queue),
        config.live.error_policy,
    );
    let source = BoundedQueueSource::new("replay", queue)
        .with_pop_timeout(config.queue.pop_timeout)
        .with_receiver(receiver);

    let (chain, run) = build_chain(config)?;
    let handle = RecordLoop::new(source, chain)
        .with_options(config.loop_options())
        .spawn()?;

    let control = handle.control().clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping record loop");
            control.stop();
        }
    });

    runtime.block_on(async move {
        for path in paths {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let data = Bytes::from(data);
            let mut offset = 0;
            while offset < data.len() {
                let Ok(len) = frame_len(&data[offset..]) else {
                    warn!(path = %path.display(), offset, "Truncated frame; skipping rest of file");
                    break;
                };
                if tx.send(data.slice(offset..offset + len)).await.is_err() {
                    return Ok(());
                }
                offset += len;
            }
        }
        Ok::<(), anyhow::Error>(())
    })?;

    // Dropping the sender ends the stream; the receiver closes the queue.
    let result = handle.join();
    match &result {
        Ok(summary) => print_summary(summary, &run.snapshot()),
        Err(e) => warn!(error = %e, "Replay ended with an error"),
    }
    result?;
    Ok(())
}

fn print_summary(summary: &LoopSummary, run: &RunSummary) {
    println!();
    println!("session     {}", summary.session);
    println!("termination {}", summary.termination);
    println!("run         {:?}", run.run.or(summary.run));
    println!("records     {}", summary.records_dispatched);
    for kind in RecordKind::ALL {
        let count = summary.count(kind);
        if count > 0 {
            println!("  {:<13} {}", kind, count);
        }
    }
    println!("decode errs {}", summary.decode_errors);
    println!("dropped     {}", summary.dropped);
    if let (Some(first), Some(last)) = (run.first_sequence, run.last_sequence) {
        println!("sequence    {first}..={last}");
    }
    println!("elapsed     {:?}", summary.elapsed);
    for processor in &summary.processors {
        println!(
            "  {:<18} records={} failures={} fatal={}",
            processor.name, processor.records, processor.failures, processor.fatal
        );
    }
}

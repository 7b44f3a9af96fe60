use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use difftest::trace::{Trace, VcdRecorder};
use difftest::{
    ArcModel, DifferentialChecker, ExecutionMode, Harness, HarnessConfig, HostPlatform, Image,
    LogLevel, NemuLibrary, NoChecker, RefChecker, RegisterLayout, RunOutcome,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "difftest-emu")]
#[command(about = "Cycle-accurate co-simulation of a RISC-V core against a reference")]
#[command(version)]
struct Args {
    /// Program image: ELF or raw binary loaded at the start address
    #[arg(short, long, value_name = "IMAGE")]
    image: Utf8PathBuf,

    /// Shared library compiled from arcilator output
    #[arg(long)]
    model: Utf8PathBuf,

    /// Arcilator state description (JSON)
    #[arg(long)]
    model_state: Utf8PathBuf,

    /// Model name inside the state description, defaults to the first one
    #[arg(long)]
    model_name: Option<String>,

    /// Reference simulator shared library with the difftest interface
    #[arg(long = "ref")]
    reference: Option<Utf8PathBuf>,

    /// YAML harness configuration
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Seed for the initial state of the model
    #[arg(short, long)]
    seed: Option<u64>,

    /// Cycle budget
    #[arg(short = 'C', long)]
    max_cycles: Option<u64>,

    /// First cycle of the core's debug log
    #[arg(short = 'b', long)]
    log_begin: Option<u64>,

    /// Last cycle of the core's debug log
    #[arg(short = 'e', long)]
    log_end: Option<u64>,

    #[arg(short = 'l', long, value_enum)]
    log_level: Option<LogLevel>,

    /// VCD output file
    #[arg(long)]
    trace: Option<Utf8PathBuf>,

    /// Clock the core without checking commits
    #[arg(long)]
    stress: bool,

    #[arg(long)]
    stuck_threshold: Option<u64>,

    /// Device polling interval in milliseconds
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Address of the first instruction
    #[arg(long, value_parser = parse_hex)]
    start_address: Option<u64>,

    /// Register vector exchanged with the reference
    #[arg(long, value_enum)]
    layout: Option<RegisterLayout>,
}

fn parse_hex(s: &str) -> Result<u64, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

impl Args {
    fn harness_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)?,
            None => HarnessConfig::default(),
        };

        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.max_cycles.is_some() {
            config.max_cycles = self.max_cycles;
        }
        if let Some(begin) = self.log_begin {
            config.log.begin = begin;
        }
        if let Some(end) = self.log_end {
            config.log.end = end;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if self.trace.is_some() {
            config.trace = self.trace.clone();
        }
        if self.stress {
            config.mode = ExecutionMode::Stress;
        }
        if let Some(threshold) = self.stuck_threshold {
            config.stuck_threshold = threshold;
        }
        if let Some(interval) = self.poll_interval {
            config.poll_interval = interval;
        }
        if let Some(addr) = self.start_address {
            config.start_address = addr;
            config.ram.base = addr;
        }
        if let Some(layout) = self.layout {
            config.layout = layout;
        }

        config.validate()?;
        Ok(config)
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let config = args.harness_config().context("Failed to build configuration")?;

    let mut model = ArcModel::load(
        &args.model,
        &args.model_state,
        args.model_name.as_deref(),
        config.layout,
    )
    .context("Failed to load hardware model")?;
    model.randomize(config.seed);
    tracing::info!(model = model.name(), seed = config.seed, "model ready");

    let image = Image::load(&args.image, config.start_address).context("Failed to read image")?;
    image
        .write_into(&mut model, &config.ram)
        .context("Failed to load image into model memory")?;

    let checker: Box<dyn DifferentialChecker> = match (&args.reference, config.mode) {
        (_, ExecutionMode::Stress) => Box::new(NoChecker),
        (Some(path), ExecutionMode::Differential) => {
            let reference = NemuLibrary::open(path).context("Failed to load reference simulator")?;
            let bytes = image.flatten(config.start_address)?;
            Box::new(RefChecker::new(reference, bytes, config.start_address))
        }
        (None, ExecutionMode::Differential) => {
            tracing::warn!("no reference given, commits are tracked but not checked");
            Box::new(NoChecker)
        }
    };

    let trace = match &config.trace {
        Some(path) => {
            let recorder = VcdRecorder::create(path, &model)
                .with_context(|| format!("Failed to create trace {path}"))?;
            Some(Trace::<ArcModel>::new(Box::new(recorder)))
        }
        None => None,
    };

    let mut harness = Harness::new(model, checker, HostPlatform::new(), &config);
    if let Some(trace) = trace {
        harness = harness.with_trace(trace);
    }

    let started = Instant::now();
    let result = harness.execute();
    let elapsed = started.elapsed();

    match result {
        Ok(outcome) => {
            harness.close_trace().context("Failed to close trace")?;
            let reason = match outcome {
                RunOutcome::Finished { .. } => "finished",
                RunOutcome::BudgetExhausted { .. } => "cycle budget exhausted",
            };
            tracing::info!(
                cycles = outcome.cycles(),
                max_cycles = harness.max_cycles(),
                elapsed_ms = elapsed.as_millis() as u64,
                "{reason}"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(err) if err.is_fatal() => {
            // Already reported by the harness on abort.
            tracing::info!(
                cycles = harness.cycles(),
                elapsed_ms = elapsed.as_millis() as u64,
                "aborted"
            );
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err.into()),
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(Args::parse()) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

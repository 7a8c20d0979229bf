use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Instant;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use splus_harvest::app::{App, ProgressEvent, ProgressSink};
use splus_harvest::config::{ConfigLoader, ResolvedConfig};
use splus_harvest::error::HarvestError;
use splus_harvest::fetch::ThreadSleeper;
use splus_harvest::input::{read_field_list, sample_fields};
use splus_harvest::output::{JsonOutput, OutputMode, render_summary};
use splus_harvest::splus::{Credentials, SplusSession};

#[derive(Parser)]
#[command(name = "splus-harvest")]
#[command(about = "Harvest filtered S-PLUS iDR5 catalogs field by field and combine them")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    /// Append logs to this file as well as stderr.
    #[arg(long, global = true, default_value = "splus_query.log")]
    log_file: Option<String>,

    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Validate, fetch and combine every field of the pointing list")]
    Run(RunArgs),
    #[command(about = "Only probe which fields of the pointing list have data")]
    Validate(RunArgs),
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// CSV pointing list.
    #[arg(long)]
    input: Option<String>,

    #[arg(long)]
    field_column: Option<String>,

    #[arg(long)]
    output_dir: Option<String>,

    #[arg(long)]
    workers: Option<usize>,

    /// Randomly pick this many fields (test run).
    #[arg(long)]
    sample: Option<usize>,

    #[arg(long)]
    json: bool,
}

struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_secs = elapsed.as_secs(), "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::Auth(_) => 2,
        HarvestError::ConfigRead(_) | HarvestError::ConfigParse(_) | HarvestError::Input(_) => 2,
        HarvestError::Aggregation(_) | HarvestError::Filesystem(_) => 3,
        _ => 1,
    }
}

fn init_tracing(log_file: Option<&str>) -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .into_diagnostic()?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let log_file = if cli.no_log_file {
        None
    } else {
        cli.log_file.as_deref()
    };
    init_tracing(log_file)?;

    let started = Instant::now();
    let result = match cli.command {
        Some(Commands::Run(args)) => run_harvest(cli.config.as_deref(), args),
        Some(Commands::Validate(args)) => run_validate(cli.config.as_deref(), args),
        None => run_harvest(cli.config.as_deref(), RunArgs::default()),
    };
    if let Err(err) = &result {
        error!(error = %err, "harvest aborted");
    }
    info!(
        "total time: {:.1} minutes",
        started.elapsed().as_secs_f64() / 60.0
    );
    result.map_err(miette::Report::new)
}

fn resolve(config: Option<&str>, args: &RunArgs) -> Result<ResolvedConfig, HarvestError> {
    let mut resolved = ConfigLoader::resolve(config)?;
    if let Some(input) = &args.input {
        resolved.input = Utf8PathBuf::from(input);
    }
    if let Some(column) = &args.field_column {
        resolved.field_column = column.clone();
    }
    if let Some(dir) = &args.output_dir {
        resolved.output_dir = Utf8PathBuf::from(dir);
    }
    if let Some(workers) = args.workers {
        resolved.max_workers = workers.max(1);
    }
    Ok(resolved)
}

fn open_session(config: &ResolvedConfig) -> Result<SplusSession, HarvestError> {
    let credentials = Credentials::from_env();
    SplusSession::open(
        &config.base_url,
        credentials.as_ref(),
        config.transport,
        config.max_workers,
    )
}

fn run_harvest(config: Option<&str>, args: RunArgs) -> Result<(), HarvestError> {
    let resolved = resolve(config, &args)?;
    let mut fields = read_field_list(&resolved.input, &resolved.field_column)?;
    if let Some(size) = args.sample {
        fields = sample_fields(fields, size);
    }

    let session = open_session(&resolved)?;
    let app = App::new(resolved, session, ThreadSleeper);
    let report = app.run(&fields, &LogProgress)?;

    let mode = if args.json {
        OutputMode::Json
    } else {
        OutputMode::Summary
    };
    match mode {
        OutputMode::Json => JsonOutput::print_report(&report)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?,
        OutputMode::Summary => println!("{}", render_summary(&report)),
    }
    Ok(())
}

fn run_validate(config: Option<&str>, args: RunArgs) -> Result<(), HarvestError> {
    let resolved = resolve(config, &args)?;
    let mut fields = read_field_list(&resolved.input, &resolved.field_column)?;
    if let Some(size) = args.sample {
        fields = sample_fields(fields, size);
    }

    let session = open_session(&resolved)?;
    let validator = splus_harvest::validate::UnitValidator::new(&session, resolved.timeout);
    let validation = validator.validate_all(&fields);
    for field in &validation.accepted {
        println!("{field}\tvalid");
    }
    for field in &validation.rejected {
        println!("{field}\texcluded");
    }
    Ok(())
}

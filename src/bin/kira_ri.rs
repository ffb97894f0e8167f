use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kira_read_ingest::blast::BlastHttpClient;
use kira_read_ingest::checkpoint::{CheckpointStore, FileCheckpoint};
use kira_read_ingest::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use kira_read_ingest::db::{HitStore, StoreCounts, open_db};
use kira_read_ingest::entrez::EntrezHttpClient;
use kira_read_ingest::error::KiraError;
use kira_read_ingest::fastq::read_fastq;
use kira_read_ingest::output::{JsonOutput, OutputMode, StatusReport, TextOutput};
use kira_read_ingest::pacing::pacer_from_config;
use kira_read_ingest::pairer::work_queue;
use kira_read_ingest::pipeline::{FailurePolicy, LogSink, PipelineContext, ProgressSink, Stage};
use kira_read_ingest::workspace::Workspace;

#[derive(Parser)]
#[command(name = "kira-ri")]
#[command(about = "Resumable BLAST annotation of paired-end reads into SQLite")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search, annotate and store every read not yet checkpointed")]
    Run(RunArgs),
    #[command(about = "Show stored row counts and the current checkpoint")]
    Status(StatusArgs),
    #[command(about = "Remove the checkpoint so the next run starts from the first read")]
    ResetCheckpoint(ResetArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    forward: Option<Utf8PathBuf>,

    #[arg(long)]
    reverse: Option<Utf8PathBuf>,

    #[arg(long)]
    database: Option<Utf8PathBuf>,

    #[arg(long)]
    checkpoint: Option<Utf8PathBuf>,

    #[arg(long)]
    delay_secs: Option<u64>,

    #[arg(long)]
    search_timeout_secs: Option<u64>,

    #[arg(long, value_enum)]
    on_failure: Option<FailurePolicy>,

    /// Walk all input again; stored reads are skipped without a search call.
    #[arg(long)]
    ignore_checkpoint: bool,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct StatusArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    database: Option<Utf8PathBuf>,

    #[arg(long)]
    checkpoint: Option<Utf8PathBuf>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ResetArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    checkpoint: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::Input { .. }
        | KiraError::Resume(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidConfig(_) => 2,
        KiraError::SearchUnavailable(_) | KiraError::SearchStatus { .. } => 3,
        KiraError::RunHalted { stage, .. } => match stage {
            Stage::Search => 3,
            Stage::Fetch | Stage::Persist => 4,
        },
        KiraError::Storage(_) | KiraError::UnsupportedSchemaVersion { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let workspace = Workspace::new()?;

    match cli.command {
        Commands::Run(args) => run_pipeline(args, &workspace),
        Commands::Status(args) => run_status(args, &workspace),
        Commands::ResetCheckpoint(args) => run_reset(args, &workspace),
    }
}

fn run_pipeline(args: RunArgs, workspace: &Workspace) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        forward: args.forward,
        reverse: args.reverse,
        database: args.database,
        checkpoint: args.checkpoint,
        delay_secs: args.delay_secs,
        search_timeout_secs: args.search_timeout_secs,
        on_failure: args.on_failure,
    };
    let resolved = ConfigLoader::resolve(args.config.as_deref(), overrides, workspace)?;
    let (forward, reverse) = resolved.inputs()?;
    let forward_reads = read_fastq(forward)?;
    let reverse_reads = read_fastq(reverse)?;
    info!(
        forward = forward_reads.len(),
        reverse = reverse_reads.len(),
        "reads loaded"
    );

    let checkpoint = FileCheckpoint::new(resolved.checkpoint.clone());
    let last_done = if args.ignore_checkpoint {
        info!("ignoring checkpoint; stored reads will be skipped");
        None
    } else {
        checkpoint.load()?
    };
    let queue = work_queue(forward_reads, reverse_reads, last_done.as_deref())?;

    workspace.ensure_project_root()?;
    let store = HitStore::new(open_db(&resolved.database)?);
    let search = BlastHttpClient::new(resolved.search_timeout, resolved.poll_interval)?;
    let annotations = EntrezHttpClient::new(
        resolved.entrez_email.clone(),
        resolved.entrez_api_key.clone(),
    )?;
    let mut context = PipelineContext::new(
        store,
        checkpoint,
        search,
        annotations,
        pacer_from_config(resolved.pacing),
        resolved.on_failure,
    );

    let output_mode = output_mode(args.json);
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &LogSink,
        OutputMode::Text => &TextOutput,
    };
    let summary = context.run(queue, sink)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_run(&summary).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_run(&summary),
    }

    if let Some(halted) = summary.halt_error() {
        return Err(halted.into());
    }
    Ok(())
}

fn run_status(args: StatusArgs, workspace: &Workspace) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        database: args.database,
        checkpoint: args.checkpoint,
        ..ConfigOverrides::default()
    };
    let resolved = ConfigLoader::resolve(args.config.as_deref(), overrides, workspace)?;
    let report = status_report(&resolved)?;
    match output_mode(args.json) {
        OutputMode::Json => JsonOutput::print_status(&report).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_status(&report),
    }
    Ok(())
}

fn status_report(resolved: &ResolvedConfig) -> Result<StatusReport, KiraError> {
    let counts = if resolved.database.as_std_path().exists() {
        HitStore::new(open_db(&resolved.database)?).counts()?
    } else {
        StoreCounts::default()
    };
    let checkpoint = FileCheckpoint::new(resolved.checkpoint.clone()).load()?;
    Ok(StatusReport {
        database: resolved.database.clone(),
        checkpoint_path: resolved.checkpoint.clone(),
        checkpoint,
        counts,
    })
}

fn run_reset(args: ResetArgs, workspace: &Workspace) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        checkpoint: args.checkpoint,
        ..ConfigOverrides::default()
    };
    let resolved = ConfigLoader::resolve(args.config.as_deref(), overrides, workspace)?;
    let mut checkpoint = FileCheckpoint::new(resolved.checkpoint);
    let previous = checkpoint.load()?;
    checkpoint.clear()?;
    match previous {
        Some(header) => println!("checkpoint cleared (was {header})"),
        None => println!("no checkpoint to clear"),
    }
    Ok(())
}

fn output_mode(json: bool) -> OutputMode {
    if json {
        OutputMode::Json
    } else {
        OutputMode::Text
    }
}

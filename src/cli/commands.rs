//! CLI command definitions for agent-harvest.
//!
//! Every stage (`search`, `clean`, `extract`) is the same resumable batch run
//! with a different source and executor. `status` plans a batch without
//! dispatching anything.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::batch::{
    plan_batch, BatchConfig, BatchRunner, BatchSettings, CompletionIndex, ExecutionReport,
    JsonDirSink, TaskExecutor, WorkItemSource,
};
use crate::error::ConfigError;
use crate::llm::{extraction_source, ChatClient, ExtractionExecutor, DEFAULT_MODEL};
use crate::realtor::DEFAULT_STATE;
use crate::search::serp::DEFAULT_NUM_RESULTS;
use crate::search::{search_source, CleanExecutor, JsonDirSource, SearchExecutor, SerpClient};

const SEARCH_CONCURRENCY: usize = 25;
const SEARCH_TIMEOUT_SECS: u64 = 30;
const EXTRACT_CONCURRENCY: usize = 10;
const EXTRACT_TIMEOUT_SECS: u64 = 120;
const CLEAN_CONCURRENCY: usize = 16;

/// Resumable search and contact extraction for real-estate agent listings.
#[derive(Parser)]
#[command(name = "agent-harvest")]
#[command(about = "Search real-estate agents and extract their contact details")]
#[command(version)]
#[command(
    long_about = "agent-harvest runs each pipeline stage as a resumable batch: items whose output \
file already exists are skipped, the rest are dispatched concurrently with retry and backoff.\n\n\
Example usage:\n  agent-harvest search -i ./agents -o ./search\n  agent-harvest clean -i ./search -o ./clean\n  \
agent-harvest extract -i ./agents --search-results ./clean -o ./contacts"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML file with batch settings; command-line flags take precedence.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run one web search per agent and store the raw result documents.
    Search(SearchArgs),

    /// Condense raw search documents into organic results and knowledge graph.
    Clean(CleanArgs),

    /// Ask the language model for each agent's contact details.
    Extract(ExtractArgs),

    /// Show how many items of a stage are completed and pending.
    Status(StatusArgs),
}

/// Batch knobs shared by every stage.
#[derive(clap::Args, Debug, Clone)]
pub struct BatchArgs {
    /// Input directory (or single file).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory, one `<id>.json` per completed item.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Maximum number of items in flight.
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Attempts per item within one run (1 disables in-run retries).
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Base backoff delay in milliseconds.
    #[arg(long)]
    pub backoff_ms: Option<u64>,

    /// Timeout of a single attempt in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Dispatch at most this many pending items.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Enumerate and filter, but dispatch nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the execution report as JSON to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Progress log interval in seconds (0 disables).
    #[arg(long)]
    pub progress_secs: Option<u64>,
}

impl BatchArgs {
    fn overrides(&self) -> BatchSettings {
        BatchSettings {
            concurrency: self.concurrency,
            max_attempts: self.max_attempts,
            backoff_ms: self.backoff_ms,
            timeout_secs: self.timeout_secs,
            limit: self.limit,
            progress_secs: self.progress_secs,
            ..BatchSettings::default()
        }
    }
}

/// Arguments for `agent-harvest search`.
#[derive(Parser, Debug)]
pub struct SearchArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// SERP API key.
    #[arg(long, env = "HAS_DATA_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Location sent with every query.
    #[arg(long, default_value = "United States")]
    pub location: String,

    /// Number of organic results requested per query.
    #[arg(long, default_value_t = DEFAULT_NUM_RESULTS)]
    pub num_results: u32,
}

/// Arguments for `agent-harvest clean`.
#[derive(Parser, Debug)]
pub struct CleanArgs {
    #[command(flatten)]
    pub batch: BatchArgs,
}

/// Arguments for `agent-harvest extract`.
#[derive(Parser, Debug)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Directory with condensed search results (`<id>.json`).
    #[arg(short, long)]
    pub search_results: PathBuf,

    /// API key for the chat-completions endpoint.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint.
    #[arg(long, env = "OPENAI_API_BASE")]
    pub api_base: Option<String>,

    /// Model used for extraction.
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// State appended to each agent description.
    #[arg(long, default_value = DEFAULT_STATE)]
    pub state: String,
}

/// Stage selector for `status`.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Search,
    Clean,
    Extract,
}

/// Arguments for `agent-harvest status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Stage whose input/output pair is inspected.
    #[arg(long, value_enum)]
    pub stage: Stage,

    /// Input directory (or single file).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory of the stage.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Condensed search results, required for the extract stage.
    #[arg(short, long)]
    pub search_results: Option<PathBuf>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// Use this when you need access to CLI arguments before running commands
/// (e.g., to get log_level for logging initialization).
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse and run in one step.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config_file = cli.config.as_deref();
    match cli.command {
        Commands::Search(args) => run_search_command(args, config_file).await?,
        Commands::Clean(args) => run_clean_command(args, config_file).await?,
        Commands::Extract(args) => run_extract_command(args, config_file).await?,
        Commands::Status(args) => run_status_command(args)?,
    }
    Ok(())
}

async fn run_search_command(args: SearchArgs, config_file: Option<&Path>) -> anyhow::Result<()> {
    let defaults = BatchConfig::default()
        .with_concurrency(SEARCH_CONCURRENCY)
        .with_attempt_timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS));
    let config = resolve_config(defaults, config_file, &args.batch)?;

    let api_key = args
        .api_key
        .ok_or_else(|| ConfigError::MissingCredential("HAS_DATA_API_KEY".to_string()))?;
    let client = SerpClient::new(api_key)?
        .with_location(args.location)
        .with_num_results(args.num_results);
    info!(api_key = %client.api_key_masked(), "Using SERP API");

    let source = search_source(&args.batch.input)
        .with_context(|| format!("Failed to open input {}", args.batch.input.display()))?;
    run_stage(SearchExecutor::new(Arc::new(client)), &source, &args.batch, config).await?;
    Ok(())
}

async fn run_clean_command(args: CleanArgs, config_file: Option<&Path>) -> anyhow::Result<()> {
    let defaults = BatchConfig::default().with_concurrency(CLEAN_CONCURRENCY);
    let config = resolve_config(defaults, config_file, &args.batch)?;

    let source = JsonDirSource::open(&args.batch.input)
        .with_context(|| format!("Failed to open input {}", args.batch.input.display()))?;
    run_stage(CleanExecutor, &source, &args.batch, config).await?;
    Ok(())
}

async fn run_extract_command(args: ExtractArgs, config_file: Option<&Path>) -> anyhow::Result<()> {
    let defaults = BatchConfig::default()
        .with_concurrency(EXTRACT_CONCURRENCY)
        .with_attempt_timeout(Duration::from_secs(EXTRACT_TIMEOUT_SECS));
    let config = resolve_config(defaults, config_file, &args.batch)?;

    if !args.search_results.is_dir() {
        return Err(ConfigError::MissingInput(args.search_results.display().to_string()).into());
    }
    let api_key = args
        .api_key
        .ok_or_else(|| ConfigError::MissingCredential("OPENAI_API_KEY".to_string()))?;
    let client = ChatClient::new(api_key, args.api_base, args.model.clone())?;
    info!(
        model = %args.model,
        base_url = %client.base_url(),
        api_key = %client.api_key_masked(),
        "Using chat completions endpoint"
    );

    let state = Some(args.state).filter(|s| !s.trim().is_empty());
    let source = extraction_source(&args.batch.input, &args.search_results, state)
        .with_context(|| format!("Failed to open input {}", args.batch.input.display()))?;
    let executor = ExtractionExecutor::new(Arc::new(client), args.model);
    run_stage(executor, &source, &args.batch, config).await?;
    Ok(())
}

fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let index = CompletionIndex::scan(&args.output)
        .with_context(|| format!("Failed to scan {}", args.output.display()))?;

    let stage_name = match args.stage {
        Stage::Search => "search",
        Stage::Clean => "clean",
        Stage::Extract => "extract",
    };
    let mut report = ExecutionReport::new(stage_name, args.output.display().to_string());
    match args.stage {
        Stage::Search => {
            let source = search_source(&args.input)?;
            plan_batch(&source, &index, &mut report);
        }
        Stage::Clean => {
            let source = JsonDirSource::open(&args.input)?;
            plan_batch(&source, &index, &mut report);
        }
        Stage::Extract => {
            let results = args.search_results.ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "search-results".to_string(),
                    message: "required for the extract stage".to_string(),
                }
            })?;
            let source = extraction_source(&args.input, &results, Some(DEFAULT_STATE.to_string()))?;
            plan_batch(&source, &index, &mut report);
        }
    }

    let counts = &report.counts;
    println!("Stage:     {}", stage_name);
    println!("Output:    {}", report.output);
    println!("Total:     {}", counts.enumerated);
    println!("Completed: {}", counts.skipped_completed);
    println!("Pending:   {}", counts.pending);
    println!("Rejected:  {}", counts.rejected);
    for rejected in &report.rejected {
        println!("  {}: {}", rejected.origin, rejected.reason);
    }
    Ok(())
}

/// Stage defaults, then the YAML file, then command-line flags.
fn resolve_config(
    defaults: BatchConfig,
    config_file: Option<&Path>,
    args: &BatchArgs,
) -> Result<BatchConfig, ConfigError> {
    let file = match config_file {
        Some(path) => BatchSettings::from_yaml_file(path)?,
        None => BatchSettings::default(),
    };
    let config = file
        .merge(args.overrides())
        .apply(defaults)
        .with_dry_run(args.dry_run);
    config.validate()?;
    Ok(config)
}

async fn run_stage<E, S>(
    executor: E,
    source: &S,
    args: &BatchArgs,
    config: BatchConfig,
) -> anyhow::Result<ExecutionReport>
where
    E: TaskExecutor,
    S: WorkItemSource<Payload = E::Payload>,
{
    let sink = JsonDirSink::create(&args.output).map_err(|e| {
        ConfigError::ValidationFailed(format!(
            "cannot use {} as output: {}",
            args.output.display(),
            e
        ))
    })?;
    let index = CompletionIndex::scan(sink.dir())
        .with_context(|| format!("Failed to scan {}", args.output.display()))?;
    info!(
        stage = executor.name(),
        output = %args.output.display(),
        completed = index.len(),
        "Scanned completed records"
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, waiting for in-flight items");
            let _ = shutdown_tx.send(());
        }
    });

    let runner = BatchRunner::new(executor, sink, config).with_shutdown(shutdown_rx);
    let report = runner.run(source, &index).await;
    interrupt.abort();

    report.print_summary();
    if let Some(path) = &args.report {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_command_defaults() {
        let cli = Cli::try_parse_from([
            "agent-harvest",
            "search",
            "-i",
            "agents",
            "-o",
            "out",
            "--api-key",
            "k",
        ])
        .expect("should parse");

        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Search(args) => {
                assert_eq!(args.batch.input, PathBuf::from("agents"));
                assert!(args.batch.concurrency.is_none());
                assert!(!args.batch.dry_run);
                assert_eq!(args.location, "United States");
                assert_eq!(args.num_results, DEFAULT_NUM_RESULTS);
                assert_eq!(args.api_key.as_deref(), Some("k"));
            }
            _ => panic!("Expected Search command"),
        }
    }

    #[test]
    fn test_extract_command_options() {
        let cli = Cli::try_parse_from([
            "agent-harvest",
            "extract",
            "-i",
            "agents",
            "-o",
            "contacts",
            "-s",
            "clean",
            "-j",
            "4",
            "--max-attempts",
            "1",
            "--limit",
            "20",
            "--dry-run",
            "--state",
            "Minnesota",
            "-l",
            "debug",
        ])
        .expect("should parse");

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Extract(args) => {
                assert_eq!(args.search_results, PathBuf::from("clean"));
                assert_eq!(args.batch.concurrency, Some(4));
                assert_eq!(args.batch.max_attempts, Some(1));
                assert_eq!(args.batch.limit, Some(20));
                assert!(args.batch.dry_run);
                assert_eq!(args.model, DEFAULT_MODEL);
                assert_eq!(args.state, "Minnesota");
            }
            _ => panic!("Expected Extract command"),
        }
    }

    #[test]
    fn test_status_requires_stage() {
        assert!(Cli::try_parse_from(["agent-harvest", "status", "-i", "a", "-o", "b"]).is_err());
        let cli = Cli::try_parse_from([
            "agent-harvest",
            "status",
            "--stage",
            "clean",
            "-i",
            "a",
            "-o",
            "b",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Status(StatusArgs {
                stage: Stage::Clean,
                ..
            })
        ));
    }

    #[test]
    fn test_resolve_config_precedence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch.yaml");
        fs::write(&path, "concurrency: 7\nmax_attempts: 5\nbackoff_ms: 250\n").unwrap();

        let cli = Cli::try_parse_from([
            "agent-harvest",
            "clean",
            "-i",
            "raw",
            "-o",
            "clean",
            "--max-attempts",
            "2",
        ])
        .unwrap();
        let Commands::Clean(args) = cli.command else {
            panic!("Expected Clean command");
        };

        let defaults = BatchConfig::default().with_concurrency(CLEAN_CONCURRENCY);
        let config = resolve_config(defaults, Some(&path), &args.batch).unwrap();
        assert_eq!(config.concurrency, 7);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.base_delay, Duration::from_millis(250));

        let config = resolve_config(
            BatchConfig::default().with_concurrency(CLEAN_CONCURRENCY),
            None,
            &args.batch,
        )
        .unwrap();
        assert_eq!(config.concurrency, CLEAN_CONCURRENCY);
    }

    #[test]
    fn test_resolve_config_rejects_invalid_values() {
        let cli = Cli::try_parse_from([
            "agent-harvest",
            "clean",
            "-i",
            "raw",
            "-o",
            "clean",
            "--concurrency",
            "0",
        ])
        .unwrap();
        let Commands::Clean(args) = cli.command else {
            panic!("Expected Clean command");
        };

        let err = resolve_config(BatchConfig::default(), None, &args.batch).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_clean_stage_end_to_end() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("raw");
        let out = dir.path().join("clean");
        fs::create_dir_all(&raw).unwrap();
        fs::write(
            raw.join("a1.json"),
            r#"{"organicResults": [{"title": "Jane Roe", "link": "https://x.example", "snippet": "jane@x.example"}]}"#,
        )
        .unwrap();
        fs::write(raw.join("a2.json"), "not json").unwrap();

        let report_path = dir.path().join("report.json");
        let cli = Cli::try_parse_from([
            "agent-harvest".to_string(),
            "clean".to_string(),
            "-i".to_string(),
            raw.display().to_string(),
            "-o".to_string(),
            out.display().to_string(),
            "--report".to_string(),
            report_path.display().to_string(),
        ])
        .unwrap();
        run_with_cli(cli).await.unwrap();

        assert!(out.join("a1.json").is_file());
        assert!(!out.join("a2.json").exists());
        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(report["counts"]["written"], 1);
        assert_eq!(report["counts"]["failed"], 1);
    }

    #[tokio::test]
    async fn test_output_file_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("raw");
        let out = dir.path().join("clean");
        fs::create_dir_all(&raw).unwrap();
        fs::write(raw.join("a1.json"), r#"{"organicResults": []}"#).unwrap();
        fs::write(&out, "not a directory").unwrap();

        let cli = Cli::try_parse_from([
            "agent-harvest".to_string(),
            "clean".to_string(),
            "-i".to_string(),
            raw.display().to_string(),
            "-o".to_string(),
            out.display().to_string(),
        ])
        .unwrap();
        let err = run_with_cli(cli).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ValidationFailed(_))
        ));
        assert_eq!(fs::read_to_string(&out).unwrap(), "not a directory");
    }

    #[tokio::test]
    async fn test_search_without_key_fails_before_scheduling() {
        let dir = TempDir::new().unwrap();
        let args = SearchArgs {
            batch: BatchArgs {
                input: dir.path().join("agents"),
                output: dir.path().join("out"),
                concurrency: None,
                max_attempts: None,
                backoff_ms: None,
                timeout_secs: None,
                limit: None,
                dry_run: false,
                report: None,
                progress_secs: None,
            },
            api_key: None,
            location: "United States".to_string(),
            num_results: DEFAULT_NUM_RESULTS,
        };

        let err = run_search_command(args, None).await.unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
        assert!(!dir.path().join("out").exists());
    }
}

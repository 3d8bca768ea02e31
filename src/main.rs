//! agentchain - run a configured chain of LLM agents over a task

use agentchain::config::{PipelineConfig, ProviderKind};
use agentchain::error::{AppError, AppResult};
use agentchain::invoker::LlmInvoker;
use agentchain::llm::{create_provider, LlmProvider};
use agentchain::observability::logging::parse_level;
use agentchain::observability::{init_logging, metrics, LogFormat};
use agentchain::pipeline::{ConsoleObserver, LoggingObserver, RunOptions, SequentialPipeline};
use agentchain::runtime::AgentRuntime;
use clap::{ArgGroup, Parser, Subcommand};
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "agentchain.toml",
    "config/agentchain.toml",
    "config/social-media.toml",
];

/// Sequential multi-agent pipeline runner
#[derive(Parser)]
#[command(name = "agentchain")]
#[command(about = "Run a task through a chain of LLM agents, one after another")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "AGENTCHAIN_CONFIG")]
    config: Option<PathBuf>,

    /// Environment file loaded before the configuration
    #[arg(long, value_name = "FILE", default_value = ".env")]
    env_file: PathBuf,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over a task
    #[command(group(ArgGroup::new("input").required(true).args(["task", "task_file"])))]
    Run {
        /// Task text
        #[arg(short, long)]
        task: Option<String>,

        /// Read the task from a file
        #[arg(long, value_name = "FILE")]
        task_file: Option<PathBuf>,

        /// Bound on the whole run, overriding `pipeline.timeout_secs`
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Print run metrics as JSON afterwards
        #[arg(long)]
        stats: bool,

        /// Skip the provider connection check
        #[arg(long)]
        no_check: bool,
    },
    /// Test the connection to the configured provider
    Check,
    /// Validate the configuration
    Config {
        /// Print the parsed configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Before logging, so LOG_* variables may come from the file
    let env_loaded = dotenvy::from_path(&cli.env_file);

    init_logging(
        verbosity_level(cli.verbose),
        LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default()),
        env::var("LOG_SPANS").is_ok_and(|v| v.eq_ignore_ascii_case("true")),
    );

    match env_loaded {
        Ok(()) => debug!(path = %cli.env_file.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(path = %cli.env_file.display(), error = %e, "Ignoring unreadable environment file"),
    }

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            task,
            task_file,
            timeout,
            stats,
            no_check,
        } => {
            let run = RunArgs {
                task,
                task_file,
                timeout,
                stats,
                check: !no_check,
            };
            run_pipeline(config, run).await
        }
        Commands::Check => check_connection(&config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

/// `-v` flags win over `LOG_LEVEL`
fn verbosity_level(verbose: u8) -> Level {
    match verbose {
        0 => parse_level(&env::var("LOG_LEVEL").unwrap_or_default()),
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn load_configuration(config_path: Option<&Path>) -> AppResult<PipelineConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(PipelineConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(PipelineConfig::load_from_file(path)?);
        }
    }

    Err(AppError::InvalidInput(format!(
        "no configuration file found; pass -c/--config or create one of {}",
        DEFAULT_CONFIG_PATHS.join(", ")
    )))
}

struct RunArgs {
    task: Option<String>,
    task_file: Option<PathBuf>,
    timeout: Option<u64>,
    stats: bool,
    check: bool,
}

fn read_task(args: &RunArgs) -> AppResult<String> {
    match (&args.task, &args.task_file) {
        (Some(task), _) => Ok(task.clone()),
        (None, Some(path)) => Ok(std::fs::read_to_string(path)?),
        (None, None) => Err(AppError::InvalidInput(
            "provide --task or --task-file".to_string(),
        )),
    }
}

async fn run_pipeline(config: PipelineConfig, args: RunArgs) -> AppResult<()> {
    let task = read_task(&args)?;
    let provider = create_provider(&config.llm)?;

    if args.check {
        verify_provider(provider.as_ref(), &config).await?;
    }

    let invoker = LlmInvoker::new(provider, config.llm.model.clone())
        .with_temperature(config.llm.temperature)
        .with_max_tokens(config.llm.max_tokens);

    let pipeline = SequentialPipeline::from_config(&config, Arc::new(invoker))?
        .with_observer(LoggingObserver)
        .with_observer(ConsoleObserver::stdout());

    let cancel = CancellationToken::new();
    let mut options = RunOptions::from_config(&config).with_cancellation(cancel.clone());
    if let Some(secs) = args.timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, cancelling run");
            cancel.cancel();
        }
    });

    let runtime = AgentRuntime::new();
    runtime.start()?;

    println!("Original task:");
    println!("{}", "-".repeat(35));
    println!("{}", task.trim());
    println!("{}", "-".repeat(35));

    let handle = runtime.invoke(Arc::new(pipeline), task, options)?;
    info!(run_id = %handle.run_id(), pipeline = %config.pipeline.name, "Run submitted");
    let outcome = handle.get(None).await;
    runtime.stop_when_idle().await;

    let result = match outcome {
        Ok(success) => {
            println!();
            println!("FINAL RESULT");
            println!("{}", "=".repeat(55));
            println!("{}", success.output.trim());
            println!("{}", "=".repeat(55));
            Ok(())
        }
        Err(e) => {
            let report = e.to_report();
            error!(
                code = report.code,
                cause = report.cause.unwrap_or("-"),
                stage = report.stage.as_deref().unwrap_or("-"),
                "{}",
                report.message
            );
            Err(AppError::Pipeline(e))
        }
    };

    if args.stats {
        let snapshot = serde_json::to_string_pretty(&metrics().snapshot())
            .map_err(|e| AppError::InvalidInput(format!("failed to render metrics: {e}")))?;
        println!("{snapshot}");
    }

    result
}

async fn check_connection(config: &PipelineConfig) -> AppResult<()> {
    let provider = create_provider(&config.llm)?;
    verify_provider(provider.as_ref(), config).await?;
    println!("Connection test passed ({})", provider.name());
    Ok(())
}

async fn verify_provider(provider: &dyn LlmProvider, config: &PipelineConfig) -> AppResult<()> {
    info!(provider = provider.name(), "Testing provider connection");
    if let Err(e) = provider.health_check().await {
        eprintln!("Connection test failed: {e}");
        eprintln!();
        eprintln!("Common fixes:");
        for (n, hint) in troubleshooting_hints(config.llm.provider).iter().enumerate() {
            eprintln!("{}. {hint}", n + 1);
        }
        return Err(e.into());
    }
    Ok(())
}

/// Checklist printed when the connection test fails (pure function)
fn troubleshooting_hints(provider: ProviderKind) -> &'static [&'static str] {
    match provider {
        ProviderKind::AzureOpenAi => &[
            "Check the endpoint URL (https://<resource>.openai.azure.com/)",
            "Verify the API key",
            "Make sure the deployment name matches exactly",
            "Try another api_version, e.g. 2024-06-01",
            "Check that the Azure resource is active",
        ],
        ProviderKind::OpenAi | ProviderKind::Anthropic => &[
            "Verify the API key environment variable is set",
            "Check the endpoint URL if you override it",
            "Make sure the model name is available to your account",
        ],
    }
}

fn handle_config_command(config: &PipelineConfig, show: bool) -> AppResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| AppError::InvalidInput(format!("failed to render configuration: {e}")))?;
        println!("{rendered}");
    }

    println!(
        "Configuration valid: pipeline '{}' with {} stage(s)",
        config.pipeline.name,
        config.stages.len()
    );
    Ok(())
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;

use agent_client::HttpLlmProvider;
use memory_retrieval::HttpMemoryRetriever;
use research_core::config::EngineConfig;
use research_core::error::ResearchError;
use research_orchestrator::Orchestrator;
use state_store::StateStore;

mod data;
mod emit;

use data::GatewayMarketData;
use emit::OutputFormat;

#[derive(Parser)]
#[command(name = "research-cli", about = "Iterative equity research engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full analysis for one ticker.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Profile {
    Quality,
    Cost,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Company ticker, e.g. ACME.
    ticker: String,

    /// Override the maximum iteration count.
    #[arg(long)]
    iterations: Option<u32>,

    /// Override the confidence stop target, in (0, 1].
    #[arg(long)]
    confidence: Option<f64>,

    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// File destination; stdout if absent.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Research up to K hypotheses concurrently (the default).
    #[arg(long, overrides_with = "no_parallel_research")]
    parallel_research: bool,

    /// Serialize deep research (K=1).
    #[arg(long)]
    no_parallel_research: bool,

    /// Named configuration profile.
    #[arg(long, value_enum)]
    profile: Option<Profile>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => analyze(args).await,
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_config(args: &AnalyzeArgs) -> Result<EngineConfig, ResearchError> {
    let mut config = match args.profile {
        Some(Profile::Quality) => EngineConfig::quality_first(),
        Some(Profile::Cost) => EngineConfig::cost_optimized(),
        None => EngineConfig::from_env()?,
    };
    if let Some(iterations) = args.iterations {
        config.max_iterations = iterations;
        config.min_iterations = config.min_iterations.min(iterations);
    }
    if let Some(confidence) = args.confidence {
        config.confidence_stop = confidence;
    }
    if args.no_parallel_research {
        config.research_parallelism = 1;
    } else if args.parallel_research && config.research_parallelism <= 1 {
        config.research_parallelism = EngineConfig::default().research_parallelism;
    }
    config.validate()?;
    Ok(config)
}

async fn analyze(args: AnalyzeArgs) -> ExitCode {
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid arguments: {err}");
            return ExitCode::from(2);
        }
    };

    let provider = match HttpLlmProvider::from_env() {
        Ok(provider) => Arc::new(provider),
        Err(err) => {
            eprintln!("cannot initialize LLM gateway client: {err}");
            return ExitCode::from(4);
        }
    };
    let market_data = match GatewayMarketData::from_env() {
        Ok(data) => Arc::new(data),
        Err(err) => {
            eprintln!("cannot initialize market data client: {err}");
            return ExitCode::from(3);
        }
    };

    let store = Arc::new(StateStore::new(config.work_dir.clone()));
    let mut orchestrator = Orchestrator::new(config, store, provider, market_data);
    if std::env::var("MEMORY_SERVICE_URL").is_ok() {
        match HttpMemoryRetriever::from_env() {
            Ok(memory) => orchestrator = orchestrator.with_memory(Arc::new(memory)),
            Err(err) => tracing::warn!("memory retrieval disabled: {err}"),
        }
    }

    // Ctrl-C marks the analysis failed at the next suspension point;
    // partial state stays on disk for inspection.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("cancellation requested, stopping at next suspension point");
            let _ = cancel_tx.send(true);
        }
    });

    let ticker = args.ticker.to_uppercase();
    match orchestrator.run_with_cancel(&ticker, cancel_rx).await {
        Ok(outcome) => {
            let rendered = match emit::render(&outcome, args.format) {
                Ok(rendered) => rendered,
                Err(err) => {
                    eprintln!("failed to render report: {err}");
                    return ExitCode::from(4);
                }
            };
            if let Some(path) = &args.output {
                if let Err(err) = std::fs::write(path, rendered) {
                    eprintln!("failed to write {}: {err}", path.display());
                    return ExitCode::from(4);
                }
            } else {
                print!("{rendered}");
            }
            if outcome.validation.passed {
                ExitCode::SUCCESS
            } else {
                eprintln!(
                    "report graded {} and did not pass validation",
                    outcome.validation.grade
                );
                ExitCode::from(1)
            }
        }
        Err(ResearchError::DataFetch(message)) => {
            eprintln!("external data fetch failed: {message}");
            ExitCode::from(3)
        }
        Err(ResearchError::InvalidInputs(message)) => {
            eprintln!("invalid arguments: {message}");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("analysis failed: {err}");
            ExitCode::from(4)
        }
    }
}

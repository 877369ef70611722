//! rankwise CLI - Two-stage LLM evaluation for ranking aggregated articles.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rankwise::models::QualityMode;
use rankwise::{
    BarProgress, CancelSignal, Config, EvaluationPipeline, JsonlDocumentStore, ModelClient,
    PricingTable, ProgressSink, RoutedModelClient, RunContext,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "rankwise")]
#[command(author = "Infernet <dev@infernet.org>")]
#[command(version)]
#[command(about = "Two-stage LLM relevance and quality evaluation for aggregated articles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "rankwise.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a JSONL file of documents against keywords
    Score {
        /// Path to input documents JSONL file
        #[arg(short, long)]
        documents: PathBuf,

        /// Comma-separated run keywords
        #[arg(short, long, value_delimiter = ',', required = true)]
        keywords: Vec<String>,

        /// Path to output JSONL file (defaults to rewriting the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stage 2 strategy (overrides the config file)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Run batches and documents concurrently
        #[arg(long)]
        fast: bool,
    },

    /// Check that the model endpoint is reachable
    Health,

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Unified,
    Ensemble,
}

impl From<ModeArg> for QualityMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Unified => QualityMode::Unified,
            ModeArg::Ensemble => QualityMode::Ensemble,
        }
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

/// Load the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(Config::default());
    }
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    Ok(config)
}

fn print_example_config() {
    let example = r#"# rankwise configuration file

[endpoint]
# API key (can also use the variable named by api_key_env)
# api_key = "${OPENAI_API_KEY}"
api_key_env = "OPENAI_API_KEY"
base_url = "https://api.openai.com/v1"
timeout_secs = 180

[relevance]
model = "gpt-4o-mini"
batch_size = 10
threshold = "balanced"        # lenient | balanced | strict | { custom = 4.0 }
neutral_score = 5.0           # score kept when a verdict is missing

[quality]
mode = "unified"              # unified | ensemble
model = "gpt-4o"
batch_size = 5
retry_budget = 2
batch_delay_ms = 1000
fast = false
max_concurrency = 4
exclusion_threshold = 8.0     # stage 2 relevance (0-20) cutoff
summary_language = "English"
unscored = "leave_blank"      # leave_blank | neutral
call_timeout_secs = 120

[ensemble]
max_parallel_judges = 3
consensus_threshold = 0.6

[[ensemble.judges]]
id = "generalist"
model = "gpt-4o"
weight = 1.0
specialty = "general"

[[ensemble.judges]]
id = "engineer"
model = "gpt-4.1-mini"
weight = 1.5
specialty = "technical"
timeout_secs = 60

[[ensemble.judges]]
id = "reasoner"
model = "o4-mini"
weight = 1.0
specialty = "reasoning"
timeout_secs = 120

[ensemble.meta_judge]
enabled = true
model = "o3-mini"
contradiction_threshold = 5.0

# [[pricing]]
# prefix = "gpt-4o"
# input_price_per_1m = 2.5
# output_price_per_1m = 10.0
"#;
    println!("{example}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
            config.validate().context("Invalid configuration")?;

            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!(
                "  Relevance: {} (batch {}, cutoff {:.1})",
                config.relevance.model,
                config.relevance.batch_size,
                config.relevance.threshold.value()
            );
            info!(
                "  Quality: {:?} mode, model {} (batch {}, {} retries)",
                config.quality.mode,
                config.quality.model,
                config.quality.batch_size,
                config.quality.retry_budget
            );
            info!(
                "  Ensemble: {} enabled judges, meta-judge {}",
                config.ensemble.enabled_judges().len(),
                if config.ensemble.meta_judge.enabled {
                    config.ensemble.meta_judge.model.as_str()
                } else {
                    "disabled"
                }
            );
            return Ok(());
        }

        Commands::Health => {
            let config = load_config(&cli.config)?;
            let client = RoutedModelClient::from_config(&config)?;
            let health = client.health_check().await;
            let latency = health
                .latency_ms
                .map(|ms| format!(" ({ms}ms)"))
                .unwrap_or_default();
            println!("{}: {}{}", client.endpoint(), health.status, latency);
            health.into_result().context("Model endpoint is not usable")?;
        }

        Commands::Score {
            documents,
            keywords,
            output,
            mode,
            fast,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(mode) = mode {
                config.quality.mode = mode.into();
            }
            if fast {
                config.quality.fast = true;
            }
            config.validate().context("Invalid configuration")?;

            let client: Arc<dyn ModelClient> = Arc::new(
                RoutedModelClient::from_config(&config).context("Failed to create model client")?,
            );
            let store = match &output {
                Some(output) => JsonlDocumentStore::new(&documents, output),
                None => JsonlDocumentStore::in_place(&documents),
            };

            let (cancel, signal) = CancelSignal::new();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling run");
                    cancel.cancel();
                }
            });

            let progress = Arc::new(BarProgress::new());
            let ctx = RunContext::new(
                PricingTable::with_overrides(&config.pricing),
                signal,
                Arc::clone(&progress) as Arc<dyn ProgressSink>,
            );

            let pipeline = EvaluationPipeline::new(client, &config);
            let result = pipeline.run_with_provider(&ctx, &store, &keywords).await;
            progress.finish();
            let report = result.context("Evaluation run failed")?;

            println!("\n=== Evaluation Complete ===");
            println!("{report}");
            println!("  Output:            {:?}", store.output());
        }
    }

    Ok(())
}

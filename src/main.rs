use anyhow::Context;
use lekha::cli::init::{self, InitConfig, InitResult};
use lekha::cli::output::Output;
use lekha::cli::{Cli, Commands};
use lekha::exporters::FileExporter;
use lekha::llm::{OpenAIClient, RateGovernor};
use lekha::rag::Bm25Retriever;
use lekha::tools::FileHarvester;
use lekha::types::{RunStatus, TopicSpec};
use lekha::utils::toml_config::{LekhaConfig, LogFormat, LoggingConfig};
use lekha::workflows::{RunManager, RunOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    match cli.command {
        Commands::Init { path, force } => {
            match init::run(InitConfig { path, force }, &output) {
                InitResult::Success | InitResult::AlreadyExists => Ok(()),
                InitResult::Error(e) => anyhow::bail!("init failed: {}", e),
            }
        }
        Commands::Config { full, validate } => show_config(&cli.config, full, validate, &output),
        Commands::Run {
            topic,
            audience,
            goals,
            keywords,
            constraints,
            sources,
            output: output_dir,
            seed,
            max_retries,
        } => {
            let config = load_config(&cli.config, &output)?;
            init_tracing(&config.logging, cli.verbose);

            let topic = TopicSpec {
                topic,
                audience,
                goals,
                keywords,
                constraints: constraints.into_iter().collect(),
            };
            run_pipeline(config, topic, sources, output_dir, seed, max_retries, &output).await
        }
    }
}

/// Missing file means defaults; a broken file is an error.
fn load_config(path: &Path, output: &Output) -> anyhow::Result<LekhaConfig> {
    if !path.exists() {
        output.warning(&format!("{} not found, using defaults", path.display()));
        return Ok(LekhaConfig::default());
    }
    LekhaConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let default_level = if verbose {
        "lekha=debug".to_string()
    } else {
        format!("lekha={}", logging.level)
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

async fn run_pipeline(
    config: LekhaConfig,
    topic: TopicSpec,
    sources: PathBuf,
    output_dir: PathBuf,
    seed: Option<String>,
    max_retries: Option<u32>,
    output: &Output,
) -> anyhow::Result<()> {
    let api_key = config.api_key().context("no API key for the model service")?;
    let client = OpenAIClient::new(
        api_key,
        config.llm.api_base.clone(),
        Duration::from_secs(config.llm.request_timeout_secs),
    );
    let harvester = FileHarvester::load(&sources)
        .with_context(|| format!("failed to load source pack {}", sources.display()))?;
    output.info(&format!("{} documents in source pack", harvester.len()));

    let mut pipeline = config.orchestrator_config();
    if let Some(max_retries) = max_retries {
        pipeline.max_retries = max_retries;
    }

    let manager = RunManager::new(
        Arc::new(client),
        Arc::new(RateGovernor::new(config.governor_config())),
        config.routing(),
        Arc::new(harvester),
        Arc::new(Bm25Retriever::default()),
    )
    .with_gateway_config(config.gateway_config())
    .with_defaults(pipeline)
    .with_exporter(Arc::new(FileExporter::new(output_dir)));

    let mut options = RunOptions::default();
    if let Some(seed) = seed {
        options = options.with_seed(seed);
    }
    let run_id = manager.start_run_with(topic, options)?;
    output.info(&format!("Run {} started", run_id));

    let finished = tokio::select! {
        finished = manager.wait(&run_id) => finished?,
        _ = tokio::signal::ctrl_c() => {
            output.warning("Interrupted, cancelling at the next stage boundary");
            manager.cancel(&run_id)?;
            manager.wait(&run_id).await?
        }
    };

    output.header(&format!("Run {}", finished.run_id));
    output.status(finished.status);
    if let Some(report) = &finished.report {
        output.report(report);
    }
    output.kv("attempts", &finished.attempt.to_string());
    output.kv("sources", &finished.sources.len().to_string());
    output.kv(
        "tokens",
        &format!(
            "{} prompt / {} completion",
            finished.usage.prompt_tokens, finished.usage.completion_tokens
        ),
    );
    for path in &finished.artifacts {
        output.created("artifact", path);
    }

    match (&finished.status, &finished.failure) {
        (RunStatus::Succeeded, _) => {
            output.success("Article passed the quality gate");
            Ok(())
        }
        (_, Some(failure)) => {
            output.error(&format!("{}: {}", failure.reason, failure.message));
            std::process::exit(2);
        }
        _ => anyhow::bail!("run ended as {:?}", finished.status),
    }
}

fn show_config(path: &Path, full: bool, validate: bool, output: &Output) -> anyhow::Result<()> {
    let config = LekhaConfig::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    output.header("Configuration");
    output.kv("file", &path.display().to_string());
    output.kv("api_base", &config.llm.api_base);
    output.kv("fast_model", &config.llm.fast_model);
    output.kv("quality_model", &config.llm.quality_model);
    output.kv(
        "rate_limit",
        &format!(
            "{} req/min, {} tokens/min",
            config.rate_limit.requests_per_minute, config.rate_limit.tokens_per_minute
        ),
    );
    output.kv("max_retries", &config.pipeline.max_retries.to_string());

    if validate {
        match config.api_key() {
            Ok(_) => output.success(&format!("{} is set", config.llm.api_key_env)),
            Err(e) => output.warning(&e.to_string()),
        }
        output.success("Configuration is valid");
    }
    if full {
        println!("\n{}", config.to_toml_string()?);
    }
    Ok(())
}

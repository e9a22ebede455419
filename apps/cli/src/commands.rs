//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use chunkflow_chunker::TextSplitter;
use chunkflow_core::{IngestReport, ProcessContext, ingest};
use chunkflow_embeddings::HttpEmbedder;
use chunkflow_loader::HttpLoader;
use chunkflow_shared::{
    AppConfig, ArticleRef, Metrics, PipelineConfig, init_config, load_config,
};
use chunkflow_store::{HttpStore, ReconcileConfig, Reconciler};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// chunkflow — incremental article ingestion into a vector store.
#[derive(Parser)]
#[command(
    name = "chunkflow",
    version,
    about = "Ingest articles into a vector store, embedding only what changed.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one ingest pass over the given article URLs.
    Ingest {
        /// Article URLs to ingest.
        urls: Vec<String>,

        /// File with one article URL per line ('#' lines are comments).
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Cap on articles admitted this run (overrides config).
        #[arg(long)]
        max_items: Option<usize>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "chunkflow=info",
        1 => "chunkflow=debug",
        _ => "chunkflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest {
            urls,
            file,
            max_items,
        } => cmd_ingest(urls, file.as_deref(), max_items).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// ingest
// ---------------------------------------------------------------------------

async fn cmd_ingest(
    urls: Vec<String>,
    file: Option<&std::path::Path>,
    max_items: Option<usize>,
) -> Result<()> {
    let config = load_config()?;

    let article_refs = collect_refs(urls, file)?;
    if article_refs.is_empty() {
        return Err(eyre!("no article URLs given: pass URLs or --file"));
    }

    let mut pipeline_config = PipelineConfig::from(&config);
    if let Some(cap) = max_items {
        pipeline_config.max_items = cap;
    }

    let ctx = build_context(&config).await?;
    info!(
        articles = article_refs.len(),
        max_items = pipeline_config.max_items,
        "starting ingest pass"
    );

    let spinner = ingest_spinner(article_refs.len());
    let started = Instant::now();
    let report = ingest(ctx, &pipeline_config, article_refs).await;
    spinner.finish_and_clear();

    print_report(&report, started.elapsed().as_secs_f64());

    if report.completed == 0 && !report.failures.is_empty() {
        return Err(eyre!("ingest pass failed: no article completed"));
    }
    Ok(())
}

/// Assemble the production collaborators from config.
async fn build_context(config: &AppConfig) -> Result<Arc<ProcessContext>> {
    if config.store.endpoint.is_empty() {
        return Err(eyre!(
            "store endpoint not configured: set [store] endpoint in the config file \
             (run 'chunkflow config init' to create one)"
        ));
    }

    let metrics = Arc::new(Metrics::default());
    let store = Arc::new(HttpStore::from_config(&config.store)?);
    let reconciler = Reconciler::open(
        store,
        ReconcileConfig::from(&config.store),
        Arc::clone(&metrics),
    )
    .await?;

    Ok(Arc::new(ProcessContext {
        loader: Arc::new(HttpLoader::new()?),
        splitter: TextSplitter::from_config(&config.chunking),
        embedder: Arc::new(HttpEmbedder::from_config(&config.embeddings)?),
        reconciler: Arc::new(reconciler),
        metrics,
    }))
}

/// Merge positional URLs with the optional URL file, validating each.
fn collect_refs(urls: Vec<String>, file: Option<&std::path::Path>) -> Result<Vec<ArticleRef>> {
    let mut all = urls;

    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre!("cannot read {}: {e}", path.display()))?;
        all.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }

    all.into_iter()
        .map(|raw| {
            Url::parse(&raw)
                .map(|_| ArticleRef::new(raw.clone()))
                .map_err(|e| eyre!("invalid URL '{raw}': {e}"))
        })
        .collect()
}

fn ingest_spinner(total: usize) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner.set_message(format!("Ingesting {total} articles"));
    spinner
}

fn print_report(report: &IngestReport, elapsed: f64) {
    let m = &report.metrics;
    println!();
    println!("  Ingest pass finished");
    println!("  Admitted:   {}", report.admitted);
    if report.rejected > 0 {
        println!("  Rejected:   {} (admission cap)", report.rejected);
    }
    println!("  Completed:  {}", report.completed);
    println!("  Failed:     {}", report.failures.len());
    println!("  Chunks:     {} created", m.chunks_created);
    println!(
        "  Changes:    +{} new, -{} removed, {} unchanged",
        m.chunks_new, m.chunks_deleted, m.chunks_unchanged
    );
    println!("  Embedded:   {}", m.chunks_vectorized);
    if m.chunk_collisions > 0 {
        println!("  Collisions: {} (already in store)", m.chunk_collisions);
    }
    println!("  Time:       {elapsed:.1}s");
    println!();

    for failure in &report.failures {
        println!("  failed [{}]: {}", failure.stage, failure.error);
    }
    if !report.failures.is_empty() {
        println!();
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

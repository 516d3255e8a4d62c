//! Index build binary entry point.
//!
//! This binary chunks, embeds and persists the paper corpus for one or both
//! granularities, replacing any previously committed index.
//!
//! # Examples
//!
//! Build the abstract index from the default data layout:
//! ```bash
//! build_index
//! ```
//!
//! Download PDFs and build both indexes:
//! ```bash
//! build_index --granularity all --download
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use paper_rag::{
    config::RagConfig,
    embedding::{fastembed::FastEmbedProvider, EmbeddingProvider},
    extraction::{
        fetch::{HttpPdfFetcher, PdfCache},
        PdfTextExtractor,
    },
    ingestion::{AbstractSource, BuildProgress, BuildReport, FullTextSource, IndexBuilder, TextSource},
    models::{Granularity, Paper, ScoredPaper},
    provider::{json::JsonFilePaperProvider, PaperProvider},
    service,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Which indexes to build
#[derive(Debug, Clone, Copy, ValueEnum)]
enum GranularityArg {
    /// Paper abstracts
    Abstract,
    /// Text extracted from cached PDFs
    FullText,
    /// Abstract index, then full-text index
    All,
}

impl GranularityArg {
    fn granularities(self) -> Vec<Granularity> {
        match self {
            GranularityArg::Abstract => vec![Granularity::Abstract],
            GranularityArg::FullText => vec![Granularity::FullText],
            GranularityArg::All => Granularity::ALL.to_vec(),
        }
    }
}

/// Index build CLI
#[derive(Parser, Debug)]
#[command(
    name = "build_index",
    version,
    about = "Build the abstract and full-text retrieval indexes",
    long_about = "Chunk, embed and persist the paper corpus. Each build replaces the previously \
                  committed index for its granularity; searches never see a half-written index.

EXAMPLES:
  Abstract index from data/papers.json:
    build_index

  Both indexes, downloading missing PDFs first:
    build_index --granularity all --download

  Full text of the papers an abstract search returned:
    search -q \"prediction during reading\" --format json > hits.json
    build_index --granularity full-text --download --from-results hits.json

  Smaller windows counted in model tokens:
    build_index --max-tokens 128 --overlap 32 --tokenizer tokenizer.json

  Settings from a file, with debug logging:
    build_index --config rag.toml --log-level debug"
)]
struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Corpus JSON file (overrides config)
    #[arg(short, long, value_name = "FILE")]
    papers: Option<PathBuf>,

    /// Index output directory (overrides config)
    #[arg(long, value_name = "DIR")]
    index_dir: Option<PathBuf>,

    /// PDF cache directory (overrides config)
    #[arg(long, value_name = "DIR")]
    pdf_dir: Option<PathBuf>,

    /// Which index to build
    #[arg(long, value_enum, default_value = "abstract")]
    granularity: GranularityArg,

    /// Download missing PDFs before a full-text build
    #[arg(long)]
    download: bool,

    /// Maximum tokens per chunk
    #[arg(long, value_name = "N")]
    max_tokens: Option<usize>,

    /// Tokens shared by consecutive chunks
    #[arg(long, value_name = "N")]
    overlap: Option<usize>,

    /// HuggingFace tokenizer.json; chunks are counted in its tokens
    #[arg(long, value_name = "FILE")]
    tokenizer: Option<PathBuf>,

    /// Chunk texts per embedding call
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,

    /// Minimum extracted characters for a full-text paper
    #[arg(long, value_name = "N")]
    min_chars: Option<usize>,

    /// Only index the first N papers
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Only index these paper ids (comma-separated)
    #[arg(long, value_name = "IDS", value_delimiter = ',', conflicts_with = "from_results")]
    paper_ids: Option<Vec<String>>,

    /// Only index the papers in a `search --format json` result file
    #[arg(long, value_name = "FILE")]
    from_results: Option<PathBuf>,

    /// FastEmbed embedding model
    #[arg(long, value_name = "MODEL")]
    embedding_model: Option<String>,

    /// FastEmbed model cache directory
    #[arg(long, value_name = "DIR", env = "FASTEMBED_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging subsystem with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Load the config file and apply command-line overrides
fn resolve_config(args: &Args) -> Result<RagConfig> {
    let mut config = RagConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(papers) = &args.papers {
        config.papers_file = papers.clone();
    }
    if let Some(dir) = &args.index_dir {
        config.index_dir = dir.clone();
    }
    if let Some(dir) = &args.pdf_dir {
        config.pdf_dir = dir.clone();
    }
    if let Some(n) = args.max_tokens {
        config.chunking.max_tokens = n;
    }
    if let Some(n) = args.overlap {
        config.chunking.overlap = n;
    }
    if let Some(path) = &args.tokenizer {
        config.tokenizer_file = Some(path.clone());
    }
    if let Some(n) = args.batch_size {
        config.embed_batch_size = n;
    }
    if let Some(n) = args.min_chars {
        config.min_fulltext_chars = n;
    }
    if let Some(model) = &args.embedding_model {
        config.embedding_model = model.clone();
    }
    if let Some(dir) = &args.cache_dir {
        config.model_cache_dir = Some(dir.clone());
    }
    if config.model_cache_dir.is_none() {
        config.model_cache_dir = dirs::cache_dir().map(|p| p.join("fastembed"));
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Paper ids named by --paper-ids or --from-results, if either was given
async fn selected_paper_ids(args: &Args) -> Result<Option<Vec<String>>> {
    if let Some(ids) = &args.paper_ids {
        return Ok(Some(ids.clone()));
    }
    let Some(path) = &args.from_results else {
        return Ok(None);
    };

    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read search results from {:?}", path))?;
    let results: Vec<ScoredPaper> = serde_json::from_str(&contents)
        .with_context(|| format!("{:?} is not a search result file", path))?;
    Ok(Some(results.into_iter().map(|r| r.paper_id).collect()))
}

/// Create a progress bar for tracking a build
fn create_progress_bar(total: usize, granularity: Granularity) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} papers | {prefix} | {msg}")
            .expect("Invalid progress bar template")
            .progress_chars("##-"),
    );
    pb.set_prefix(granularity.to_string());
    pb
}

/// Make PDFs available locally, returning the papers that have one
async fn download_pdfs(config: &RagConfig, papers: &[Paper]) -> Result<Vec<Paper>> {
    let fetcher = HttpPdfFetcher::new(config.fetch_timeout()).context("Failed to create HTTP client")?;
    let cache = PdfCache::new(&config.pdf_dir, fetcher);
    info!("Fetching PDFs into {:?}", cache.dir());

    let report = cache.ensure_all(papers).await;
    if !report.failed.is_empty() {
        warn!("{} PDFs could not be fetched", report.failed.len());
    }
    Ok(report.available)
}

/// Run one build with a progress bar
async fn run_build<E, T>(
    builder: &IndexBuilder<E>,
    papers: &[Paper],
    source: &T,
) -> Result<BuildReport>
where
    E: EmbeddingProvider + ?Sized,
    T: TextSource,
{
    let granularity = source.granularity();
    let progress = create_progress_bar(papers.len(), granularity);
    progress.set_message("chunking");

    let mut embedded = 0;
    let report = builder
        .build_with_progress(papers, source, |event| match event {
            BuildProgress::PaperProcessed => progress.inc(1),
            BuildProgress::ChunksEmbedded(n) => {
                embedded += n;
                progress.set_message(format!("{} chunks embedded", embedded));
            }
        })
        .await
        .with_context(|| format!("Failed to build {} index", granularity))?;

    progress.finish_with_message(format!("{} chunks written", report.chunks_written));
    Ok(report)
}

fn print_summary(granularity: Granularity, report: &BuildReport, elapsed: std::time::Duration) {
    println!("\n╔════════════════════════════════════════╗");
    println!("║      {:<34}║", format!("{} index built", granularity));
    println!("╠════════════════════════════════════════╣");
    println!("║ Papers seen:          {:>16} ║", report.papers_seen);
    println!("║ Papers indexed:       {:>16} ║", report.papers_indexed);
    println!("║ Papers skipped:       {:>16} ║", report.skipped.len());
    println!("║ Chunks written:       {:>16} ║", report.chunks_written);
    println!("║ Dimension:            {:>16} ║", report.manifest.dimension);
    println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
    println!("╚════════════════════════════════════════╝");
    println!("Generation: {}", report.generation());
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level).context("Failed to initialize logging")?;

    info!("Starting index build");
    debug!("CLI arguments: {:?}", args);

    let config = resolve_config(&args)?;
    debug!("Resolved configuration: {:?}", config);

    if !config.papers_file.exists() {
        anyhow::bail!(
            "Corpus file not found: {}\n\
             Run the paper discovery step first or pass --papers.",
            config.papers_file.display()
        );
    }

    let provider = JsonFilePaperProvider::from_file(&config.papers_file)
        .await
        .with_context(|| format!("Failed to load papers from {:?}", config.papers_file))?;
    let mut papers = match selected_paper_ids(&args).await? {
        Some(ids) => {
            let papers = provider.select(&ids);
            info!("Selected {} of {} requested papers", papers.len(), ids.len());
            papers
        }
        None => provider.fetch_papers().await?,
    };
    if let Some(limit) = args.limit {
        papers.truncate(limit);
    }
    info!("Found {} papers from {}", papers.len(), provider.name());

    if papers.is_empty() {
        warn!("No papers with abstracts in corpus; the built index will be empty");
    }

    info!("Initializing FastEmbed provider: {}", config.embedding_model);
    let embedder = FastEmbedProvider::from_name(&config.embedding_model, config.model_cache_dir.clone())
        .context("Failed to initialize FastEmbed provider")?;
    info!(
        "FastEmbed provider initialized: model={}, dimension={}",
        embedder.model_name(),
        embedder.dimension()
    );

    let builder = service::index_builder(&config, Arc::new(embedder)).context("Failed to create index builder")?;

    for granularity in args.granularity.granularities() {
        let start_time = Instant::now();
        let report = match granularity {
            Granularity::Abstract => run_build(&builder, &papers, &AbstractSource).await?,
            Granularity::FullText => {
                let papers = if args.download {
                    download_pdfs(&config, &papers).await?
                } else {
                    papers.clone()
                };
                let source = FullTextSource::new(PdfTextExtractor::new(), &config.pdf_dir, config.min_fulltext_chars);
                run_build(&builder, &papers, &source).await?
            }
        };

        print_summary(granularity, &report, start_time.elapsed());
        for skipped in &report.skipped {
            debug!("Skipped {}: {}", skipped.paper_id, skipped.reason);
        }
    }

    info!("Index build completed successfully");

    Ok(())
}

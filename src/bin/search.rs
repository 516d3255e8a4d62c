//! Search binary entry point.
//!
//! This binary answers research questions against the built indexes. It
//! supports both single-query and interactive REPL modes, with table or JSON
//! output.
//!
//! # Examples
//!
//! Single query over abstracts:
//! ```bash
//! search --query "predictive processing in reading"
//! ```
//!
//! Full-text search with JSON output:
//! ```bash
//! search --granularity full-text --query "eye tracking" --format json
//! ```
//!
//! Interactive mode:
//! ```bash
//! search --interactive
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use paper_rag::{
    config::RagConfig,
    embedding::fastembed::FastEmbedProvider,
    models::{Granularity, Paper, ScoredPaper},
    provider::json::JsonFilePaperProvider,
    query::{RetrievalService, SearchEngine},
    rerank::fastembed::FastEmbedReranker,
    service::ServiceState,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Service = RetrievalService<FastEmbedProvider, FastEmbedReranker>;

/// Output format for search results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table
    Table,
    /// The retrieval API shape: [{paperId, score, chunk_ids, chunk_texts}]
    Json,
}

/// Granularity to search
#[derive(Debug, Clone, Copy, ValueEnum)]
enum GranularityArg {
    Abstract,
    FullText,
}

impl From<GranularityArg> for Granularity {
    fn from(arg: GranularityArg) -> Self {
        match arg {
            GranularityArg::Abstract => Granularity::Abstract,
            GranularityArg::FullText => Granularity::FullText,
        }
    }
}

/// Search CLI for querying the paper indexes
#[derive(Parser, Debug)]
#[command(
    name = "search",
    version,
    about = "Search papers with dense retrieval and cross-encoder reranking",
    long_about = "Query the abstract or full-text index. Candidates are fetched by embedding \
                  similarity, reranked with a cross-encoder and grouped by paper.

EXAMPLES:
  Single query:
    search --query \"predictive processing in reading\"

  Full-text index, JSON output:
    search --granularity full-text --query \"eye tracking\" --format json

  Interactive mode:
    search --interactive

  Wider candidate pool, more final chunks:
    search --query \"working memory\" --top-k-raw 100 --top-k 10"
)]
struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Index directory (overrides config)
    #[arg(long, value_name = "DIR")]
    index_dir: Option<PathBuf>,

    /// Corpus JSON used to show titles (overrides config)
    #[arg(long, value_name = "FILE")]
    papers: Option<PathBuf>,

    /// Index to search
    #[arg(long, value_enum, default_value = "abstract")]
    granularity: GranularityArg,

    /// Search query (required for single-query mode, omitted in interactive mode)
    #[arg(long, value_name = "TEXT", conflicts_with = "interactive")]
    query: Option<String>,

    /// Candidates fetched from the vector index (default: 20 abstract, 50 full text)
    #[arg(long, value_name = "N")]
    top_k_raw: Option<usize>,

    /// Chunks kept after reranking
    #[arg(long, value_name = "N")]
    top_k: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// FastEmbed embedding model (must match the one used to build)
    #[arg(long, value_name = "MODEL")]
    embedding_model: Option<String>,

    /// FastEmbed reranker model
    #[arg(long, value_name = "MODEL")]
    reranker_model: Option<String>,

    /// FastEmbed model cache directory
    #[arg(long, value_name = "DIR", env = "FASTEMBED_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

/// Load the config file and apply command-line overrides
fn resolve_config(args: &Args) -> Result<RagConfig> {
    let mut config = RagConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(dir) = &args.index_dir {
        config.index_dir = dir.clone();
    }
    if let Some(papers) = &args.papers {
        config.papers_file = papers.clone();
    }
    if args.top_k_raw.is_some() {
        config.search.top_k_raw = args.top_k_raw;
    }
    if let Some(n) = args.top_k {
        config.search.top_k_final = n;
    }
    if let Some(model) = &args.embedding_model {
        config.embedding_model = model.clone();
    }
    if let Some(model) = &args.reranker_model {
        config.reranker_model = model.clone();
    }
    if let Some(dir) = &args.cache_dir {
        config.model_cache_dir = Some(dir.clone());
    }
    if config.model_cache_dir.is_none() {
        config.model_cache_dir = dirs::cache_dir().map(|p| p.join("fastembed"));
    }

    Ok(config)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars - 3).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Search session: loaded models, opened indexes and REPL settings
struct Session {
    state: ServiceState<FastEmbedProvider, FastEmbedReranker>,
    services: HashMap<Granularity, Service>,
    papers: Option<JsonFilePaperProvider>,
    granularity: Granularity,
    top_k_raw: Option<usize>,
    top_k_final: usize,
    format: OutputFormat,
    last_results: Vec<ScoredPaper>,
}

impl Session {
    /// Open (once) the index for the current granularity
    fn service(&mut self) -> Result<&Service> {
        let granularity = self.granularity;
        if !self.services.contains_key(&granularity) {
            let service = self.state.open_search(granularity).with_context(|| {
                format!(
                    "Failed to open {} index. Run build_index --granularity {} first.",
                    granularity, granularity
                )
            })?;
            info!("Opened {} index with {} chunks", granularity, service.len());
            self.services.insert(granularity, service);
        }
        self.services
            .get(&granularity)
            .ok_or_else(|| anyhow::anyhow!("{} index not loaded", granularity))
    }

    fn paper(&self, paper_id: &str) -> Option<&Paper> {
        self.papers.as_ref().and_then(|p| p.find(paper_id))
    }

    /// Execute a search query and remember the results
    async fn execute_search(&mut self, text: &str) -> Result<()> {
        debug!("Executing search for query: {}", text);

        let mut query = self.state.query(self.granularity, text);
        if let Some(raw) = self.top_k_raw {
            query.top_k_raw = raw;
        }
        query.top_k_final = self.top_k_final;

        let start = Instant::now();
        let results = self
            .service()?
            .search(&query)
            .await
            .with_context(|| format!("Failed to execute search for query: '{}'", text))?;
        let elapsed = start.elapsed();

        match self.format {
            OutputFormat::Table => {
                println!("{}", self.format_results_table(&results));
                println!(
                    "\nFound {} papers in {:.2}s ({} index, top_k_raw={}, top_k={})",
                    results.len(),
                    elapsed.as_secs_f64(),
                    self.granularity,
                    query.top_k_raw,
                    query.top_k_final
                );
            }
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&results)
                    .with_context(|| "Failed to serialize results to JSON")?;
                println!("{}", json);
            }
        }

        self.last_results = results;
        Ok(())
    }

    /// Format results as a pretty table
    fn format_results_table(&self, results: &[ScoredPaper]) -> String {
        if results.is_empty() {
            return "No results found.".to_string();
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        table.set_header(vec![
            Cell::new("Rank").add_attribute(Attribute::Bold),
            Cell::new("Paper").add_attribute(Attribute::Bold),
            Cell::new("Title").add_attribute(Attribute::Bold),
            Cell::new("Year").add_attribute(Attribute::Bold),
            Cell::new("Score").add_attribute(Attribute::Bold),
            Cell::new("Chunks").add_attribute(Attribute::Bold),
        ]);

        for (idx, result) in results.iter().enumerate() {
            let paper = self.paper(&result.paper_id);
            let title = paper.map(|p| truncate(&p.title, 60)).unwrap_or_else(|| "-".to_string());
            let year = paper
                .and_then(|p| p.year)
                .map(|y| y.to_string())
                .unwrap_or_else(|| "-".to_string());
            let chunks = result
                .chunk_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let color = if idx == 0 { Color::Green } else { Color::White };

            table.add_row(vec![
                Cell::new(idx + 1),
                Cell::new(truncate(&result.paper_id, 16)),
                Cell::new(title),
                Cell::new(year),
                Cell::new(format!("{:.4}", result.score)).fg(color),
                Cell::new(chunks),
            ]);
        }

        table.to_string()
    }

    /// Display detailed view of a single result
    fn display_result_detail(&self, result: &ScoredPaper, rank: usize) {
        println!("\n{}", "═".repeat(80));
        println!("Rank: {}", rank);
        println!("Paper: {}", result.paper_id);
        if let Some(paper) = self.paper(&result.paper_id) {
            println!("Title: {}", paper.title);
            if !paper.authors.is_empty() {
                println!("Authors: {}", paper.authors.join(", "));
            }
            if let Some(year) = paper.year {
                println!("Year: {}", year);
            }
            if let Some(url) = &paper.url {
                println!("URL: {}", url);
            }
        }
        println!("Score: {:.4}", result.score);
        for (chunk_id, text) in result.chunk_ids.iter().zip(&result.chunk_texts) {
            println!("\n[chunk {}]\n{}", chunk_id, text);
        }
        println!("{}", "═".repeat(80));
    }

    /// Handle a /command
    fn handle_command(&mut self, parts: &[&str]) {
        match parts[0] {
            "/help" => print_help(),
            "/top" | "/top-raw" => {
                if parts.len() != 2 {
                    eprintln!("Usage: {} N", parts[0]);
                    return;
                }
                match parts[1].parse::<usize>() {
                    Ok(n) if n > 0 => {
                        if parts[0] == "/top" {
                            self.top_k_final = n;
                            println!("Set top-k to {}", n);
                        } else {
                            self.top_k_raw = Some(n);
                            println!("Set top-k-raw to {}", n);
                        }
                    }
                    _ => eprintln!("Invalid number: must be a positive integer"),
                }
            }
            "/granularity" => {
                if parts.len() != 2 {
                    eprintln!("Usage: /granularity [abstract|full-text]");
                    return;
                }
                match parts[1].parse::<Granularity>() {
                    Ok(granularity) => {
                        self.granularity = granularity;
                        println!("Searching the {} index", granularity);
                    }
                    Err(e) => eprintln!("Invalid granularity: {}", e),
                }
            }
            "/format" => {
                if parts.len() != 2 {
                    eprintln!("Usage: /format [table|json]");
                    return;
                }
                match parts[1] {
                    "table" => {
                        self.format = OutputFormat::Table;
                        println!("Set output format to table");
                    }
                    "json" => {
                        self.format = OutputFormat::Json;
                        println!("Set output format to JSON");
                    }
                    _ => eprintln!("Invalid format: must be 'table' or 'json'"),
                }
            }
            "/detail" => {
                if parts.len() != 2 {
                    eprintln!("Usage: /detail N");
                    return;
                }
                match parts[1].parse::<usize>() {
                    Ok(rank) if rank > 0 && rank <= self.last_results.len() => {
                        self.display_result_detail(&self.last_results[rank - 1], rank);
                    }
                    Ok(rank) if rank > self.last_results.len() => {
                        eprintln!(
                            "Rank {} out of range (last search had {} results)",
                            rank,
                            self.last_results.len()
                        );
                    }
                    _ => eprintln!("Invalid rank: must be a positive integer"),
                }
            }
            _ => eprintln!("Unknown command: {}. Type /help for available commands.", parts[0]),
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  <query>                  - Search for papers");
    println!("  /top N                   - Keep N chunks after reranking");
    println!("  /top-raw N               - Fetch N candidates from the index");
    println!("  /granularity abstract    - Search the abstract index");
    println!("  /granularity full-text   - Search the full-text index");
    println!("  /format table            - Use table output format");
    println!("  /format json             - Use JSON output format");
    println!("  /detail N                - Show matched chunks for result rank N");
    println!("  /help                    - Show this help");
    println!("  Ctrl+D or Ctrl+C         - Exit");
}

/// Run interactive REPL mode
async fn run_interactive(mut session: Session) -> Result<()> {
    println!("Interactive Paper Search");
    print_help();
    println!();

    let mut rl = DefaultEditor::new().with_context(|| "Failed to create readline editor")?;

    loop {
        let prompt = format!("Search [{}]> ", session.granularity);
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line).ok();

                if line.starts_with('/') {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    session.handle_command(&parts);
                } else if let Err(e) = session.execute_search(line).await {
                    eprintln!("Search failed: {:#}", e);
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level);

    let query = match (&args.query, args.interactive) {
        (Some(query), false) => Some(query.clone()),
        (None, true) => None,
        _ => anyhow::bail!(
            "Either --query or --interactive must be specified.\n\
             Use --help for usage information."
        ),
    };

    let config = resolve_config(&args)?;
    let granularity = Granularity::from(args.granularity);
    config.validate_for(granularity).context("Invalid search settings")?;

    // Fail before loading models if the index is missing.
    let store = config.index_store();
    if !store.exists(granularity) && !args.interactive {
        anyhow::bail!(
            "No {} index found under {}.\n\
             Please run build_index --granularity {} first.",
            granularity,
            config.index_dir.display(),
            granularity
        );
    }

    let papers = match JsonFilePaperProvider::from_file(&config.papers_file).await {
        Ok(provider) => Some(provider),
        Err(e) => {
            warn!("Titles unavailable, could not load {:?}: {}", config.papers_file, e);
            None
        }
    };

    info!(
        "Loading models: embedding={}, reranker={}",
        config.embedding_model, config.reranker_model
    );
    let top_k_raw = config.search.top_k_raw;
    let top_k_final = config.search.top_k_final;
    let state = ServiceState::load_fastembed(config).context("Failed to load models")?;
    info!("Models loaded");

    let mut session = Session {
        state,
        services: HashMap::new(),
        papers,
        granularity,
        top_k_raw,
        top_k_final,
        format: args.format,
        last_results: Vec::new(),
    };

    match query {
        Some(query) => session.execute_search(&query).await?,
        None => run_interactive(session).await?,
    }

    Ok(())
}

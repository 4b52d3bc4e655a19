// Kortex CLI
// `serve` runs the event router over the configured transport; `index` and
// `search` are one-shot commands against the same wired runtime, useful for
// smoke-testing a deployment or working fully offline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use kortex::{
    init_logging_with_level, topics, CorrelationId, DocumentIndexingHandler, EventRouter,
    IndexingOptions, IndexingOutcome, IndexingRequest, KortexConfig, Runtime, SearchFilters,
    SearchHandler, SearchKind, SearchRequest, TreeIndexHandler,
};

#[derive(Parser)]
#[command(name = "kortex", version, about = "Event-driven knowledge-intelligence pipeline")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume request topics and serve the pipeline
    Serve,

    /// Index a single file
    Index {
        /// File to index
        path: PathBuf,

        /// Project (tenancy scope) for the document
        #[arg(long)]
        project: String,

        /// Language tag; guessed from the extension when omitted
        #[arg(long)]
        language: Option<String>,

        /// Reindex even when the content hash is already known
        #[arg(long)]
        force: bool,
    },

    /// Query the indexed corpus
    Search {
        /// Query text
        query: String,

        /// semantic | vector | knowledge_graph | hybrid
        #[arg(long, default_value = "hybrid")]
        kind: String,

        /// Restrict to one project
        #[arg(long)]
        project: Option<String>,

        /// Maximum results
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Quality weight in [0, 1] for score fusion
        #[arg(long)]
        quality_weight: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging_with_level(cli.verbose, cli.quiet)?;

    let config = KortexConfig::from_env().context("loading configuration")?;
    let runtime = Runtime::builder(config).build().context("wiring runtime")?;

    match cli.command {
        Command::Serve => serve(runtime).await,
        Command::Index {
            path,
            project,
            language,
            force,
        } => index(runtime, path, project, language, force).await,
        Command::Search {
            query,
            kind,
            project,
            limit,
            quality_weight,
        } => search(runtime, query, kind, project, limit, quality_weight).await,
    }
}

async fn serve(runtime: Runtime) -> Result<()> {
    let mut router = EventRouter::new(
        runtime.transport.clone(),
        runtime.config.max_inflight_requests,
    );
    router.register(Arc::new(DocumentIndexingHandler::new(
        runtime.orchestrator.clone(),
        runtime.transport.clone(),
        runtime.metrics.clone(),
    )));
    router.register(Arc::new(TreeIndexHandler::new(
        runtime.orchestrator.clone(),
        runtime.transport.clone(),
        runtime.metrics.clone(),
    )));
    router.register(Arc::new(SearchHandler::new(
        runtime.search.clone(),
        runtime.transport.clone(),
        runtime.metrics.clone(),
    )));

    info!(
        max_inflight = runtime.config.max_inflight_requests,
        "kortex serving request topics"
    );

    Arc::new(router)
        .run(vec![
            topics::DOCUMENT_INDEX_REQUESTED.to_string(),
            topics::TREE_INDEX.to_string(),
            topics::SEARCH_REQUESTED.to_string(),
        ])
        .await;
    Ok(())
}

async fn index(
    runtime: Runtime,
    path: PathBuf,
    project: String,
    language: Option<String>,
    force: bool,
) -> Result<()> {
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    let request = IndexingRequest {
        source_path: path.to_string_lossy().into_owned(),
        content,
        language,
        project_id: None,
        project_name: project,
        repository_url: None,
        commit_sha: None,
        indexing_options: IndexingOptions {
            force_reindex: force,
            ..IndexingOptions::default()
        },
        user_id: None,
        correlation_id: CorrelationId::new(),
    };

    match runtime.orchestrator.process(request).await {
        IndexingOutcome::Completed(receipt) => {
            println!("{}", serde_json::to_string_pretty(&receipt)?);
            Ok(())
        }
        IndexingOutcome::Failed(failure) => {
            eprintln!("{}", serde_json::to_string_pretty(&failure.error)?);
            anyhow::bail!("indexing failed: {}", failure.error.error_message)
        }
    }
}

async fn search(
    runtime: Runtime,
    query: String,
    kind: String,
    project: Option<String>,
    limit: usize,
    quality_weight: Option<f64>,
) -> Result<()> {
    let request = SearchRequest {
        query,
        kind: SearchKind::parse_or_hybrid(&kind),
        filters: SearchFilters {
            project_name: project,
            ..SearchFilters::default()
        },
        max_results: limit,
        quality_weight,
        include_context: true,
        correlation_id: CorrelationId::new(),
    };

    let receipt = runtime
        .search
        .search(&request)
        .await
        .map_err(|e| anyhow::anyhow!("search failed: {e}"))?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

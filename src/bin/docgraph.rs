use std::fmt::Display;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use docgraph::bounded::bounded;
use docgraph::{
    Cli, EmbeddingProvider, GraphStore, MemoryStore, OpenAiEmbedder, PgGraphStore, Pipeline,
    PipelineError, PipelineFailure, PipelineReport, TableName,
};
use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let code = match run(&cli) {
        Ok(report) => {
            print_summary(&report);
            0
        }
        Err(failure) => {
            print_summary(&failure.report);
            eprintln!("docgraph: {}", failure.error);
            1
        }
    };
    process::exit(code);
}

fn init_tracing(cli: &Cli) {
    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        _ => EnvFilter::new(cli.log_filter()),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<PipelineReport, PipelineFailure> {
    // The blocking HTTP client must be created and dropped outside the async runtime.
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
        OpenAiEmbedder::new(
            cli.openai_api_key.clone(),
            cli.openai_base_url.clone(),
            cli.openai_model.clone(),
            cli.openai_dimensions,
            Duration::from_secs(cli.openai_timeout_secs.max(1)),
            cli.openai_max_retries.max(1),
            cli.openai_batch_size.max(1),
        )
        .map_err(|err| initialization("embedding provider", format!("{err:#}")))?
        .with_max_input_chars(cli.openai_max_input_chars),
    );
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| initialization("async runtime", err))?;

    let outcome = runtime.block_on(async {
        let store = connect_store(cli).await?;
        let pipeline = Pipeline::new(store, Arc::clone(&embedder), cli.pipeline_config());
        pipeline
            .process_document(&cli.file, cli.id.as_deref())
            .await
    });
    // An embedding call abandoned at its deadline may still be running on a blocking worker.
    runtime.shutdown_background();
    outcome
}

async fn connect_store(cli: &Cli) -> Result<Arc<dyn GraphStore>, PipelineFailure> {
    if cli.dry_run {
        tracing::info!("dry run: graph is kept in memory");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let Some(database_url) = cli.database_url.as_deref() else {
        return Err(initialization("graph store", "DATABASE_URL is required"));
    };
    let nodes = TableName::new(cli.schema.clone(), cli.nodes_table.clone())
        .map_err(|err| initialization("graph store", err))?;
    let references = TableName::new(cli.schema.clone(), cli.references_table.clone())
        .map_err(|err| initialization("graph store", err))?;
    let limit = cli.pipeline_config().store_timeout();
    let store = bounded(
        limit,
        "connect",
        PgGraphStore::connect(database_url, nodes, references),
    )
    .await
    .map_err(|err| initialization("graph store", format!("{err:#}")))?;
    if cli.prepare_schema {
        bounded(
            limit,
            "schema preparation",
            store.ensure_schema(cli.vector_dimensions()),
        )
        .await
        .map_err(|err| initialization("graph schema", format!("{err:#}")))?;
    }
    Ok(Arc::new(store))
}

fn initialization(component: &'static str, reason: impl Display) -> PipelineFailure {
    PipelineFailure::new(
        PipelineError::Initialization {
            component,
            reason: reason.to_string(),
        },
        PipelineReport::default(),
    )
}

fn print_summary(report: &PipelineReport) {
    if !report.document_id.is_empty() {
        println!("document: {}", report.document_id);
    }
    println!("chunks: {}", report.chunks);
    println!("nodes inserted: {}", report.inserted());
    println!("nodes failed: {}", report.failed());
    println!("embeddings failed: {}", report.embedding.failed);
    println!("parent links set: {}", report.parent_links());
    println!("parent link errors: {}", report.relations.parent_failures.len());
    println!(
        "references created: {} (exact {}, fuzzy {})",
        report.references_created(),
        report.relations.exact_created,
        report.relations.fuzzy_created
    );
    println!("reference errors: {}", report.relations.reference_failures.len());
    println!("lookup errors: {}", report.lookup_errors());
}

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use warp::Filter;

mod api;
mod config;
mod error;
mod indexer;
mod metrics;
mod middleware;
mod models;
mod pipeline;
mod store;
#[cfg(test)]
mod testing;

use crate::config::Config;
use crate::pipeline::{CohereReranker, OpenAiEmbedder, OpenAiGenerator, Retriever};
use crate::store::{StoreHandle, StoreSource};

#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "Retrieval-augmented question answering over a chunked document set")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Serve the query API (default).
    Serve,
    /// Embed every row of the chunk table and write the embeddings file.
    Embed {
        /// Chunk table to read; defaults to the configured `chunks_path`.
        #[arg(long, value_name = "PATH")]
        chunks: Option<PathBuf>,
        /// Embeddings file to write (`.npy` or JSON); defaults to the
        /// configured `embeddings_path`.
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Embed { chunks, output } => {
            let configured = config.store_source();
            let source = StoreSource::new(
                chunks.unwrap_or(configured.chunks_path),
                output.unwrap_or(configured.embeddings_path),
            );
            embed(&config, &source).await
        }
    }
}

fn openai_embedder(config: &Config) -> anyhow::Result<OpenAiEmbedder> {
    OpenAiEmbedder::new(
        &config.openai_api_key,
        &config.openai_base_url,
        &config.embedding_model,
        config.embedding_dimensions,
        config.request_timeout(),
    )
}

async fn embed(config: &Config, source: &StoreSource) -> anyhow::Result<()> {
    let embedder = openai_embedder(config)?;
    let store = indexer::embed_corpus(&embedder, &config.retry_policy(), source).await?;
    info!(
        chunks = store.len(),
        dimension = store.dimension(),
        "Embedding job finished"
    );
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!("Starting document QA retrieval service");

    // Load the chunk store; misaligned artifacts stop startup here
    let source = config.store_source();
    let store = Arc::new(StoreHandle::new(source.load()?));

    // External services
    let timeout = config.request_timeout();
    let embedder = openai_embedder(&config)?;
    let reranker = CohereReranker::new(
        &config.cohere_api_key,
        &config.cohere_base_url,
        &config.rerank_model,
        timeout,
    )?;
    let generator = OpenAiGenerator::new(
        &config.openai_api_key,
        &config.openai_base_url,
        &config.generation_model,
        config.generation_temperature,
        timeout,
    )?;
    info!(
        embedding_model = %config.embedding_model,
        rerank_model = %config.rerank_model,
        generation_model = %config.generation_model,
        "Service clients configured"
    );

    let state = api::AppState {
        store,
        source: Some(source),
        retriever: Arc::new(Retriever::new(
            Arc::new(embedder),
            Arc::new(reranker),
            config.retrieval_settings(),
        )),
        generator: Arc::new(generator),
        retry: config.retry_policy(),
        limiter: api::rate_limiter(config.max_requests_per_minute, config.rate_limit_burst),
    };

    // Build API routes
    let api_routes = api::routes(state)
        .with(warp::log("docqa::api"))
        .with(middleware::cors());

    // Health check route
    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({"status": "healthy"})));

    // Metrics route
    let metrics = warp::path("metrics").and(warp::get()).map(|| {
        let (buffer, content_type) = metrics::render();
        warp::reply::with_header(buffer, "Content-Type", content_type)
    });

    let routes = health.or(metrics).or(api_routes);

    // Start server
    let addr = ([0, 0, 0, 0], config.port);
    info!("Server listening on {}", addr.1);

    warp::serve(routes).run(addr).await;

    Ok(())
}

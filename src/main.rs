//! CLI entry point. `serve` runs the HTTP surface (§6); `ingest` runs one
//! reconciliation pass and exits; `query` runs retrieval + answer composition
//! against stdout, useful for smoke-testing a deployment from a terminal.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mimir::answer::AnswerComposer;
use mimir::config::{ChatProvider as ChatProviderKind, Config, EmbeddingProvider as EmbeddingProviderKind};
use mimir::error::{MimirError, Result as MimirResult};
use mimir::http::{self, AppState};
use mimir::llm::chat::ChatClient;
use mimir::llm::embedding::EmbeddingClient;
use mimir::llm::{anthropic::AnthropicClient, google::GoogleClient, mistral::MistralClient, openai::OpenAiClient};
use mimir::llm::{ChatProvider, CompletionOptions, EmbeddingProvider};
use mimir::pipeline::Pipeline;
use mimir::reconciler::Reconciler;
use mimir::retriever::Retriever;
use mimir::vector_store::{PgVectorStore, VectorStore};

#[derive(Debug, Parser)]
#[command(name = "mimir")]
#[command(version)]
#[command(about = "Retrieval-augmented documentation indexer and query engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (health, ingest trigger, GitHub webhook, chat completions, MCP ask).
    Serve,
    /// Run one ingestion pass over every configured repo scope and exit.
    Ingest,
    /// Run retrieval + answer composition for a single query and print the answer to stdout.
    Query {
        /// The question to answer.
        text: String,
    },
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_embedding_provider(cfg: &Config) -> Arc<dyn EmbeddingProvider> {
    let e = &cfg.embedding;
    match e.provider {
        EmbeddingProviderKind::OpenAi => Arc::new(OpenAiClient::new(e.api_key.clone(), e.model.clone(), e.base_url.clone())),
        EmbeddingProviderKind::Google => Arc::new(GoogleClient::new(e.api_key.clone(), e.model.clone(), e.base_url.clone())),
        EmbeddingProviderKind::Mistral => Arc::new(MistralClient::new(e.api_key.clone(), e.model.clone(), e.base_url.clone())),
    }
}

fn build_chat_provider(cfg: &Config) -> Arc<dyn ChatProvider> {
    let c = &cfg.chat;
    match c.provider {
        ChatProviderKind::OpenAi => Arc::new(OpenAiClient::new(c.api_key.clone(), c.model.clone(), c.base_url.clone())),
        ChatProviderKind::Google => Arc::new(GoogleClient::new(c.api_key.clone(), c.model.clone(), c.base_url.clone())),
        ChatProviderKind::Mistral => Arc::new(MistralClient::new(c.api_key.clone(), c.model.clone(), c.base_url.clone())),
        ChatProviderKind::Anthropic => Arc::new(AnthropicClient::new(c.api_key.clone(), c.model.clone(), c.base_url.clone())),
    }
}

struct Runtime {
    config: Config,
    store: Arc<dyn VectorStore>,
    embedding_client: Arc<EmbeddingClient>,
    chat_client: Arc<ChatClient>,
}

async fn build_runtime() -> MimirResult<Runtime> {
    let config = Config::load()?;

    let pg_store = PgVectorStore::connect(&config.supabase.url, &config.supabase.table).await?;
    pg_store.run_migrations().await?;
    let store: Arc<dyn VectorStore> = Arc::new(pg_store);
    store.verify_connection().await?;

    let embedding_provider = build_embedding_provider(&config);
    let embedding_client = Arc::new(EmbeddingClient::new(embedding_provider, &config.embedding.limits));

    let chat_provider = build_chat_provider(&config);
    let chat_options = CompletionOptions { temperature: config.chat.temperature, max_output_tokens: config.chat.max_output_tokens };
    let chat_client = Arc::new(ChatClient::new(chat_provider, &config.chat.limits, chat_options));

    Ok(Runtime { config, store, embedding_client, chat_client })
}

async fn run_serve() -> MimirResult<()> {
    let runtime = build_runtime().await?;
    let reconciler = Reconciler::new(runtime.store.clone(), runtime.chat_client.clone(), runtime.embedding_client.clone());
    let retriever = Retriever::new(runtime.store.clone(), runtime.embedding_client.clone());
    let answer_composer = AnswerComposer::new(runtime.chat_client.clone());
    let pipeline = Pipeline::new(reconciler);

    let port = runtime.config.server.port;
    let state = Arc::new(AppState {
        config: runtime.config,
        store: runtime.store,
        retriever,
        answer_composer,
        pipeline,
        ingestion_busy: Arc::new(AtomicBool::new(false)),
    });

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| MimirError::Config(format!("failed to bind port {port}: {e}")))?;
    tracing::info!(port, "listening");
    axum::serve(listener, app).await.map_err(|e| MimirError::Other(anyhow::anyhow!(e)))?;
    Ok(())
}

async fn run_ingest() -> MimirResult<()> {
    let runtime = build_runtime().await?;
    let reconciler = Reconciler::new(runtime.store.clone(), runtime.chat_client.clone(), runtime.embedding_client.clone());
    let pipeline = Pipeline::new(reconciler);
    let cancel = CancellationToken::new();

    let outcome = pipeline.run(&runtime.config, &cancel).await?;
    println!(
        "{}",
        serde_json::json!({
            "durationMs": outcome.duration_ms,
            "filesFetched": outcome.files_fetched,
            "unchanged": outcome.stats.unchanged_chunks,
            "moved": outcome.stats.moved_chunks,
            "new": outcome.stats.new_chunks,
            "upserted": outcome.stats.upserted_chunks,
            "deleted": outcome.stats.deleted_chunks,
        })
    );
    Ok(())
}

async fn run_query(text: String) -> MimirResult<()> {
    let runtime = build_runtime().await?;
    let retriever = Retriever::new(runtime.store.clone(), runtime.embedding_client.clone());
    let answer_composer = AnswerComposer::new(runtime.chat_client.clone());
    let cancel = CancellationToken::new();

    let chunks = retriever.retrieve(&text, &runtime.config.supabase, &cancel).await?;
    let answer = answer_composer.compose(&text, &chunks, &[], &cancel).await?;

    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!("\nSources:");
        for source in &answer.sources {
            match &source.final_url {
                Some(url) => println!("  - {} ({})", source.chunk_title, url),
                None => println!("  - {}", source.chunk_title),
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config isn't loaded yet here, so this defaults to "info" until
    // build_runtime() parses MIMIR_LOG_LEVEL; tracing's subscriber can't be
    // swapped out once installed, so this is the best ordering available.
    init_tracing("info");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let result = match cli.command {
        Command::Serve => rt.block_on(run_serve()),
        Command::Ingest => rt.block_on(run_ingest()),
        Command::Query { text } => rt.block_on(run_query(text)),
    };

    result.map_err(|e| anyhow::anyhow!(e.to_string()))
}

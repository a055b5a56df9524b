// src/main.rs
// propkb service entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use propkb::agent::{
    EscalationEngine, Orchestrator, ParentExpansion, QueryIntelligence, Reranker,
    ResponseGenerator, SearchStrategy,
};
use propkb::analytics::{AnalyticsBuffer, TokenTracker};
use propkb::api::{AppState, RateLimiter, router};
use propkb::archive::{Archive, SqliteArchive};
use propkb::config::{AgentConfig, PriceTable};
use propkb::embeddings::{Embedder, OpenAiEmbeddings};
use propkb::kb::{QdrantIndex, VectorIndex};
use propkb::llm::{ChatModel, OpenAiChatClient};
use propkb::memory::{ConversationCache, SessionManager, Summarizer};
use propkb::prompts::PromptSet;

#[derive(Parser)]
#[command(name = "propkb", version, about = "Retrieval-augmented support agent for PropKB")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0", env = "PROPKB_HOST")]
        host: String,
        /// Bind port
        #[arg(long, default_value_t = 8000, env = "PROPKB_PORT")]
        port: u16,
    },
    /// Validate configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("propkb=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { host, port } => serve(host, port).await,
        Command::CheckConfig => check_config(),
    }
}

fn check_config() -> Result<()> {
    let config = AgentConfig::load();
    let validation = config.validate();
    println!("{}", validation.report());
    if !validation.is_valid() {
        bail!("configuration invalid");
    }
    Ok(())
}

async fn serve(host: String, port: u16) -> Result<()> {
    let config = Arc::new(AgentConfig::load());
    let validation = config.validate();
    for warning in &validation.warnings {
        warn!("{warning}");
    }
    if !validation.is_valid() {
        bail!("configuration invalid:\n{}", validation.report());
    }

    let state = build_state(config.clone()).await?;

    // Background sweep for expired sessions: flush, don't leak
    let sweeper_sessions = state.sessions.clone();
    let sweeper_limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            let ended = sweeper_sessions.sweep_expired().await;
            if ended > 0 {
                info!(ended, "Swept expired sessions");
            }
            sweeper_limiter.cleanup();
        }
    });

    let app = router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, "propkb listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn build_state(config: Arc<AgentConfig>) -> Result<AppState> {
    let api_key = config
        .api_keys
        .llm
        .clone()
        .context("LLM API key missing")?;

    let http_client = propkb::http::create_shared_client();

    let chat: Arc<dyn ChatModel> = Arc::new(OpenAiChatClient::new(
        http_client.clone(),
        api_key.clone(),
        config.llm_base_url.clone(),
        config.chat_model.clone(),
    ));
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbeddings::new(
        http_client,
        api_key,
        config.llm_base_url.clone(),
        config.embedding_model.clone(),
        config.embedding_dimensions,
    ));
    let index: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::connect(
        &config.qdrant_url,
        config.api_keys.qdrant.as_deref(),
        &config.collection,
    )?);

    let cache = Arc::new(
        ConversationCache::connect(
            config.redis_url.as_deref(),
            config.memory.cached_turns,
            config.memory.cache_ttl_secs,
        )
        .await,
    );
    let archive: Arc<dyn Archive> = Arc::new(SqliteArchive::open(&config.archive_path).await?);

    let pricing = Arc::new(PriceTable::load(config.pricing_file.as_deref())?);
    let prompts = Arc::new(PromptSet::load(config.prompts_file.as_deref())?);
    let meter = Arc::new(TokenTracker::new(pricing));
    let buffer = Arc::new(AnalyticsBuffer::new());
    let summarizer = Arc::new(Summarizer::new(chat.clone()));

    let sessions = Arc::new(SessionManager::new(
        cache,
        buffer,
        meter.clone(),
        summarizer,
        archive,
        config.memory.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        QueryIntelligence::new(chat.clone(), meter.clone()),
        SearchStrategy::new(
            index.clone(),
            embedder.clone(),
            meter.clone(),
            config.query.max_search_results,
            config.query.similarity_threshold,
        ),
        ParentExpansion::new(index.clone(), config.query.parent_fetch_buffer),
        Reranker::new(config.query.max_search_results),
        ResponseGenerator::new(
            chat.clone(),
            meter.clone(),
            prompts.clone(),
            config.query.max_search_results,
        ),
        EscalationEngine::new(chat.clone(), config.query.min_confidence_score),
        sessions.clone(),
        meter,
        prompts,
    ));

    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));

    Ok(AppState {
        config,
        orchestrator,
        sessions,
        chat,
        embedder,
        index,
        rate_limiter,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

//! # copilot
//!
//! Runs single turns of the orchestration engine against an OpenAPI document.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use copilot::{
    AppStateCache, AppStateProviders, Catalog, CopilotEngine, EngineConfig, Headers,
    HttpOperationInvoker, InMemoryHistory, InMemoryWorkflowRepository, PolicyDocument,
    TrelloStateProvider, TurnRequest,
};
use futures::StreamExt;
use llm::remote::{OpenAiClient, OpenAiEmbedder};
use llm::RemoteLlmConfig;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

#[derive(Parser)]
#[command(name = "copilot")]
#[command(about = "Turn natural-language requests into API calls", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the operation summaries of an API specification
    Catalog {
        /// Path to an OpenAPI document (JSON or YAML)
        #[arg(short, long)]
        spec: PathBuf,
    },

    /// Handle one user request
    Ask {
        /// Path to an OpenAPI document (JSON or YAML)
        #[arg(short, long)]
        spec: PathBuf,

        /// The user's request
        #[arg(short, long)]
        text: String,

        /// External app whose state is injected (e.g. trello)
        #[arg(long)]
        app: Option<String>,

        /// Restrict Trello state to one board
        #[arg(long)]
        board: Option<String>,

        #[arg(long, default_value = "cli")]
        session: String,

        /// Header forwarded to the API, as NAME=VALUE
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Engine configuration file (yaml, json or toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,

        /// API base URL; defaults to the first server in the document
        #[arg(long)]
        base_url: Option<String>,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Catalog { spec } => {
            let catalog = Catalog::from_file(&spec)
                .with_context(|| format!("reading {}", spec.display()))?;
            print!("{}", catalog.summaries_text());
        }
        Commands::Ask {
            spec,
            text,
            app,
            board,
            session,
            headers,
            config,
            stream,
            base_url,
        } => {
            let config = match config {
                Some(path) => EngineConfig::from_file(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => EngineConfig::default(),
            }
            .apply_env_overrides()?;
            config.validate()?;

            let catalog = Arc::new(
                Catalog::from_file(&spec).with_context(|| format!("reading {}", spec.display()))?,
            );
            let base_url = base_url
                .or_else(|| catalog.default_server().map(str::to_string))
                .ok_or_else(|| anyhow!("no --base-url given and the document lists no servers"))?;

            let spec_id = spec
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "default".to_string());

            let engine = build_engine(&config, &base_url, board)?;
            let mut request = TurnRequest::new(text, session, spec_id, catalog)
                .with_headers(headers.into_iter().collect::<Headers>());
            if let Some(app) = app {
                request = request.with_app(app);
            }

            info!(base_url = %base_url, "Handling turn");

            if stream {
                let (tx, rx) = mpsc::channel(64);
                let printer = tokio::spawn(async move {
                    let mut fragments = ReceiverStream::new(rx);
                    let mut stdout = std::io::stdout();
                    while let Some(fragment) = fragments.next().await {
                        print!("{}", fragment);
                        let _ = stdout.flush();
                    }
                    println!();
                });
                let response = engine.handle_turn(request.with_fragments(tx)).await;
                printer.await?;
                if let Some(error) = response.error {
                    eprintln!("error: {}", error);
                }
            } else {
                let response = engine.handle_turn(request).await;
                println!("{}", response.text);
                if let Some(execution) = &response.execution {
                    eprintln!("{}", serde_json::to_string_pretty(&execution.aggregate)?);
                }
                if let Some(error) = response.error {
                    eprintln!("error: {}", error);
                }
            }
        }
    }

    Ok(())
}

fn build_engine(
    config: &EngineConfig,
    base_url: &str,
    board: Option<String>,
) -> anyhow::Result<CopilotEngine> {
    let provider = |model: &str| -> anyhow::Result<RemoteLlmConfig> {
        Ok(RemoteLlmConfig::from_env(
            &config.provider_api_key_env,
            config.provider_base_url.clone(),
            model,
        )?
        .with_timeout(config.provider_timeout()))
    };

    let classifier = Arc::new(OpenAiClient::new(provider(&config.classifier_model)?)?);
    let summarizer = Arc::new(OpenAiClient::new(provider(&config.summarizer_model)?)?);
    let embedder = Arc::new(OpenAiEmbedder::new(provider(&config.embedding_model)?)?);

    let repository = Arc::new(InMemoryWorkflowRepository::new(embedder));
    let invoker = Arc::new(HttpOperationInvoker::new(base_url, config.operation_timeout())?);

    let mut trello = TrelloStateProvider::new(config.operation_timeout())?;
    if let Some(board) = board {
        trello = trello.with_board(board);
    }
    let providers = AppStateProviders::new().register("trello", Arc::new(trello));
    let app_state = Arc::new(AppStateCache::new(
        Arc::new(providers),
        config.app_state_freshness(),
        config.app_state_retry.clone(),
    ));

    let mut engine = CopilotEngine::new(classifier, repository, invoker, config)
        .with_summarizer(summarizer)
        .with_app_state(app_state)
        .with_history(Arc::new(InMemoryHistory::new()));

    if let Some(path) = &config.policy_path {
        let policy = PolicyDocument::from_file(path)
            .with_context(|| format!("reading policy {}", path.display()))?;
        engine = engine.with_policy(Arc::new(policy));
    }

    Ok(engine)
}

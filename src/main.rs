//! Admin CLI for the lexrag core: KB bootstrap, file ingest, one-shot chat.
//!
//! Exit code 0 on success; on failure a stable `status=<word>` line goes to
//! stderr and the process exits non-zero.

use clap::{Parser, Subcommand};
use lexrag::{App, AppConfig, ChatRequest, CoreError, IngestProfile, IngestRequest, ParserKind};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "lexrag", about = "Trusted RAG core for legal question answering", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a knowledge base bound to an embedding configuration.
    InitKb {
        /// KB name.
        name: String,
        /// Embedding provider from the allowlist; defaults to the first
        /// configured provider.
        #[arg(long)]
        embed_provider: Option<String>,
    },
    /// Ingest one document into a KB.
    Ingest {
        /// KB id or name.
        kb: String,
        /// Path of the document to ingest.
        path: String,
        /// Display name; defaults to the path's file name.
        #[arg(long)]
        file_name: Option<String>,
        /// Parser: markdown or plain_text.
        #[arg(long, default_value = "markdown")]
        parser: String,
        /// Parse and segment only; persist nothing.
        #[arg(long)]
        dry_run: bool,
        /// Re-process even if this content was already ingested.
        #[arg(long)]
        force: bool,
    },
    /// Ask one question against a KB and print the reply envelope.
    Chat {
        /// KB id or name.
        kb: String,
        /// The question.
        query: String,
        /// Include record ids, hits, and timings in the output.
        #[arg(long)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("status={}", err.status_word());
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CoreError> {
    let config = AppConfig::load()?;
    let app = App::open(config)?;
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::InitKb {
            name,
            embed_provider,
        } => {
            let kb = app.create_kb(&name, embed_provider.as_deref())?;
            println!(
                "{}",
                serde_json::json!({
                    "kb_id": kb.id,
                    "name": kb.name,
                    "embed_provider": kb.embed_provider,
                    "embed_model": kb.embed_model,
                    "embed_dim": kb.embed_dim,
                })
            );
        }
        Commands::Ingest {
            kb,
            path,
            file_name,
            parser,
            dry_run,
            force,
        } => {
            let kb = app.resolve_kb(&kb)?;
            let parser: ParserKind =
                serde_json::from_value(serde_json::Value::String(parser.clone()))
                    .map_err(|_| CoreError::BadRequest(format!("unknown parser '{parser}'")))?;
            let file_name = file_name.unwrap_or_else(|| {
                std::path::Path::new(&path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.clone())
            });
            let outcome = app
                .ingest(
                    IngestRequest {
                        kb_id: kb.id,
                        source_uri: path,
                        file_name,
                        dry_run,
                        force,
                        profile: IngestProfile {
                            parser,
                            ..Default::default()
                        },
                    },
                    &cancel,
                )
                .await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome)
                    .map_err(|e| CoreError::Pipeline(e.to_string()))?
            );
            if outcome.ingest_status == lexrag::IngestStatus::Failed {
                return Err(CoreError::GateBlocked {
                    stage: "ingest".into(),
                    reasons: outcome.gate.reasons,
                });
            }
        }
        Commands::Chat { kb, query, debug } => {
            let kb = app.resolve_kb(&kb)?;
            let reply = app
                .chat(
                    ChatRequest {
                        query,
                        kb_id: kb.id,
                        conversation_id: None,
                        debug,
                        context: Default::default(),
                    },
                    &cancel,
                )
                .await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&reply)
                    .map_err(|e| CoreError::Pipeline(e.to_string()))?
            );
        }
    }
    Ok(())
}

//! # askdoc CLI
//!
//! Ask questions about one document from the command line, or serve the
//! same pipeline over HTTP.
//!
//! ```bash
//! askdoc --config ./config/askdoc.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdoc init` | Create the SQLite database and run schema migrations |
//! | `askdoc ingest <file>` | Index a `.pdf`, `.txt` or `.md` file, replacing the current document |
//! | `askdoc ask "<question>"` | Answer a question from the indexed document |
//! | `askdoc history` | Print the conversation so far |
//! | `askdoc status` | Show the indexed document and readiness |
//! | `askdoc quiz --text "<text>"` | Generate multiple-choice questions as JSON |
//! | `askdoc serve` | Start the HTTP server |
//!
//! Diagnostics go to stderr through `tracing` (filter with `RUST_LOG`);
//! results go to stdout. A failed command prints `error[<code>]: <message>`
//! and exits with status 1.

use askdoc::config::{self, Config};
use askdoc::error::PipelineError;
use askdoc::service::AnswerService;
use askdoc::{migrate, quiz, server};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "askdoc=info,askdoc_core=info";

/// askdoc: grounded question answering over a single document.
#[derive(Parser)]
#[command(name = "askdoc", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askdoc.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Index a document, replacing the current one and clearing the conversation.
    Ingest {
        /// A `.pdf`, `.txt` or `.md` file.
        file: PathBuf,

        /// Display name recorded for the document (defaults to the file name).
        #[arg(long)]
        name: Option<String>,
    },

    /// Answer a question from the indexed document.
    Ask {
        question: String,

        /// Extra context to ground the answer, such as a selected passage.
        #[arg(long)]
        context: Option<String>,

        /// Also print the retrieved chunks.
        #[arg(long)]
        sources: bool,
    },

    /// Print the conversation history, oldest first.
    History,

    /// Show the indexed document and whether answers are available.
    Status,

    /// Generate multiple-choice questions from text, printed as JSON.
    Quiz {
        #[arg(long)]
        text: String,

        #[arg(long, default_value_t = quiz::DEFAULT_QUESTION_COUNT)]
        count: usize,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<PipelineError>() {
                Some(pipeline) => eprintln!("error[{}]: {}", pipeline.code(), pipeline.message()),
                None => eprintln!("error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file, name } => {
            let service = AnswerService::open(&cfg).await?;
            let report = service.ingest_file(&file, name.as_deref()).await?;
            if report.reused {
                println!(
                    "{} is already indexed ({} chunks); nothing to do.",
                    report.source_name, report.chunk_count
                );
            } else {
                println!(
                    "Indexed {}: {} pages, {} chunks.",
                    report.source_name, report.page_count, report.chunk_count
                );
            }
            println!("document: {}", report.document_id);
            service.close().await;
        }
        Commands::Ask {
            question,
            context,
            sources,
        } => {
            let service = AnswerService::open(&cfg).await?;
            let answer = service
                .answer_with_sources(&question, context.as_deref())
                .await;
            service.close().await;
            let answer = answer?;

            println!("{}", answer.response);
            if sources {
                println!();
                for (i, s) in answer.sources.iter().enumerate() {
                    println!(
                        "{}. page {} chunk {} (score {:.3})",
                        i + 1,
                        s.chunk.page,
                        s.chunk.chunk_index,
                        s.score
                    );
                }
            }
        }
        Commands::History => {
            let service = AnswerService::open(&cfg).await?;
            let turns = service.history().await?;
            service.close().await;

            if turns.is_empty() {
                println!("No conversation yet.");
            }
            for turn in turns {
                println!("{}: {}", turn.role, turn.content);
            }
        }
        Commands::Status => {
            let service = AnswerService::open(&cfg).await?;
            let status = service.status().await?;
            service.close().await;
            print_status(&cfg, &status);
        }
        Commands::Quiz { text, count } => {
            let service = AnswerService::open(&cfg).await?;
            let result = quiz::generate(&service, &text, count).await;
            service.close().await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn print_status(cfg: &Config, status: &askdoc::service::Status) {
    println!("database:  {}", cfg.db.path.display());
    match &status.document {
        Some(doc) => {
            println!("document:  {} ({})", doc.source_name, doc.id);
            println!("pages:     {}", doc.page_count);
        }
        None => println!("document:  none"),
    }
    println!("chunks:    {}", status.chunk_count);
    match (&status.index_model, status.index_dims) {
        (Some(model), Some(dims)) => println!("index:     {} ({} dims)", model, dims),
        _ => println!("index:     none"),
    }
    println!("turns:     {}", status.turn_count);
    println!("embedder:  {}", status.embedding_model);
    println!("model:     {}", status.language_model);
    println!("ready:     {}", if status.ready { "yes" } else { "no" });
}

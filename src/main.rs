//! # Chat Engine CLI (`chat`)
//!
//! ## Usage
//!
//! ```bash
//! chat --config ./config/chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chat ask "<question>"` | Run one query and print the answer and sources |
//! | `chat serve` | Start the HTTP/SSE server |
//!
//! ## Examples
//!
//! ```bash
//! # Ask a question, streaming the answer as it is generated
//! chat ask "How do I rotate the API keys?" --stream
//!
//! # Override the QA prompt for one query
//! chat ask "What is X?" --options '{"qaChain":{"promptTemplate":"{{context}}\nQ: {{question}}"}}'
//!
//! # Inspect the full trace (needs auth.admin_groups)
//! chat ask "What is X?" --admin --verbose
//!
//! # Serve the API
//! chat serve --config ./config/chat.toml
//! ```

use chat_engine::{ask, config, logging, server};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chat Engine CLI: retrieval-augmented chat with status streaming.
#[derive(Parser)]
#[command(
    name = "chat",
    about = "Chat Engine: retrieval-augmented chat over your documents",
    version,
    long_about = "Chat Engine answers questions from retrieved documents. Each query optionally \
    classifies the question, rewrites follow-ups into standalone questions using chat history, \
    retrieves documents, and generates an answer, reporting progress for every step."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chat.toml")]
    config: PathBuf,

    /// Log at DEBUG (step inputs, outputs and timings). `RUST_LOG` overrides.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question.
    Ask {
        /// The question.
        question: String,

        /// Chat id to file the exchange under (random when omitted).
        #[arg(long)]
        chat_id: Option<String>,

        /// Print the answer incrementally as it is generated.
        #[arg(long)]
        stream: bool,

        /// Run as an administrator: privileged options and trace output.
        #[arg(long)]
        admin: bool,

        /// Per-request ChatEngineConfig overrides as JSON.
        #[arg(long)]
        options: Option<String>,
    },

    /// Start the HTTP server.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ask {
            question,
            chat_id,
            stream,
            admin,
            options,
        } => {
            ask::run_ask(
                &cfg,
                ask::AskOptions {
                    question,
                    chat_id,
                    stream,
                    admin,
                    options,
                },
            )
            .await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

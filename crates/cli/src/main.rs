//! Backpacker CLI: the main entry point.
//!
//! Commands:
//! - `init`          Write the default config and guide directory
//! - `ask`           Answer a single question
//! - `chat`          Interactive conversation in one session
//! - `capabilities`  List what the assistant can look up
//! - `doctor`        Check config, guides and the LLM endpoint

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "backpacker",
    about = "Backpacker: a budget travel assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create ~/.backpacker/config.toml and the guides directory
    Init,

    /// Ask one question and print the answer
    Ask {
        /// The question
        #[arg(short, long)]
        message: String,

        /// Session to continue (memory only lives for this process)
        #[arg(long, default_value = "cli")]
        session: String,
    },

    /// Chat interactively; `/reset` clears the conversation
    Chat,

    /// List the registered capabilities
    Capabilities,

    /// Diagnose config and provider connectivity
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => commands::init::run()?,
        Commands::Ask { message, session } => commands::ask::run(&message, &session).await?,
        Commands::Chat => commands::chat::run().await?,
        Commands::Capabilities => commands::capabilities::run()?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}

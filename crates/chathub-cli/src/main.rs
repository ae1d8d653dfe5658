//! chathub: command-line client for the chat connection hub.
//!
//! Talks the line protocol interactively, issues identity tokens for the
//! WebSocket side, and drives WebSocket load against a running hub.

mod commands;

use clap::{Parser, Subcommand};
use tracing::error;

/// chathub: chat hub client
#[derive(Parser)]
#[command(name = "chathub", version, about = "Chat hub client: line chat, tokens, WebSocket load")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat interactively over the line protocol
    Chat {
        /// Hub line address (host:port)
        #[arg(default_value = "localhost:8080")]
        addr: String,

        /// Log in with this name instead of prompting
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Issue an identity token for the WebSocket protocol
    Token {
        /// Identity the token stands for
        username: String,

        /// Hex-encoded signing secret shared with the hub
        #[arg(long)]
        secret: String,

        /// Lifetime in seconds
        #[arg(long, default_value_t = commands::token::DEFAULT_TTL)]
        ttl: u64,
    },

    /// Run many WebSocket clients against a hub
    Load {
        /// Hub WebSocket URL
        #[arg(long, default_value = "ws://localhost:8081")]
        url: String,

        /// Hex-encoded signing secret shared with the hub
        #[arg(long)]
        secret: String,

        /// Number of concurrent clients
        #[arg(long, default_value_t = 1000)]
        clients: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("chathub=debug,chathub_core=debug")
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("chathub=warn")
            .with_target(false)
            .init();
    }

    let result = match cli.command {
        Command::Chat { addr, name } => commands::chat::run(&addr, name.as_deref()).await,
        Command::Token {
            username,
            secret,
            ttl,
        } => commands::token::run(&username, &secret, ttl),
        Command::Load {
            url,
            secret,
            clients,
        } => commands::load::run(&url, &secret, clients).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("chathub: {e:#}");
        std::process::exit(1);
    }
}

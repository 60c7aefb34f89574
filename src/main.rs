// src/main.rs
// Atelier - streaming chat relay with image generation

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use atelier::client;
use atelier::config::RelayConfig;
use atelier::credentials::{CredentialStore, KeyScope};
use atelier::server;

#[derive(Parser)]
#[command(name = "atelier")]
#[command(about = "Streaming chat relay with image generation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat relay server (default)
    Serve {
        /// Port to listen on (overrides ATELIER_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with a running relay from the terminal
    Chat {
        /// Relay chat endpoint (default: the configured host and port)
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Manage stored API keys
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Store keys; saving to one scope removes them from the other
    Set {
        /// Model gateway API key
        #[arg(long, default_value = "")]
        gateway: String,

        /// Image backend API key
        #[arg(long, default_value = "")]
        openai: String,

        /// Where to store them: local persists, session lasts one login
        #[arg(long, value_enum, default_value_t = ScopeArg::Local)]
        scope: ScopeArg,
    },

    /// Show which keys are configured
    Show,

    /// Remove keys from both scopes
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Local,
    Session,
}

impl From<ScopeArg> for KeyScope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Local => KeyScope::Local,
            ScopeArg::Session => KeyScope::Session,
        }
    }
}

async fn run_serve(port: Option<u16>) -> Result<()> {
    let mut config = RelayConfig::from_env();
    if let Some(port) = port {
        config.port = port;
    }
    server::run(config).await
}

async fn run_chat(endpoint: Option<String>) -> Result<()> {
    let endpoint = endpoint.unwrap_or_else(|| {
        let config = RelayConfig::from_env();
        format!("http://{}:{}/api/chat", config.host, config.port)
    });
    client::repl::run(endpoint).await
}

fn run_keys(action: KeysAction) -> Result<()> {
    let mut store = CredentialStore::from_default_dirs();

    match action {
        KeysAction::Set {
            gateway,
            openai,
            scope,
        } => {
            let scope = KeyScope::from(scope);
            store.save(&gateway, &openai, scope);
            println!("Keys saved to the {} scope.", scope.as_str());
        }
        KeysAction::Show => {
            let (gateway, openai) = store.load();
            println!(
                "gateway key: {}",
                if gateway.is_empty() { "(not set)" } else { "set" }
            );
            println!(
                "openai key:  {}",
                if openai.is_empty() { "(not set)" } else { "set" }
            );
            println!("scope:       {}", store.scope().as_str());
        }
        KeysAction::Clear => {
            store.clear();
            println!("Keys removed from both scopes.");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from the current directory, if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Quiet for the interactive client, verbose for the server
    let log_level = match &cli.command {
        Some(Commands::Chat { .. }) | Some(Commands::Keys { .. }) => Level::WARN,
        None | Some(Commands::Serve { .. }) => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        None => run_serve(None).await?,
        Some(Commands::Serve { port }) => run_serve(port).await?,
        Some(Commands::Chat { endpoint }) => run_chat(endpoint).await?,
        Some(Commands::Keys { action }) => run_keys(action)?,
    }

    Ok(())
}

//! `rcon` - command-line client for JSONAPI servers.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jsonapi_rcon::models::{ChatMessage, ConnectionEvent};
use jsonapi_rcon::{ClientConfig, RconClient};

#[derive(Debug, Parser)]
#[command(name = "rcon", version, about = "JSONAPI RCON client")]
struct Cli {
    /// Config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, env = "RCON_HOST", global = true)]
    host: Option<String>,

    #[arg(long, env = "RCON_PORT", global = true)]
    port: Option<u16>,

    #[arg(long, env = "RCON_USERNAME", global = true)]
    username: Option<String>,

    #[arg(long, env = "RCON_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    #[arg(long, env = "RCON_SALT", global = true, hide_env_values = true)]
    salt: Option<String>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Call a method and print its result
    Call {
        method: String,
        /// Arguments; each is parsed as JSON, or passed as a string
        args: Vec<String>,
    },
    /// Print pushes from a source until Ctrl-C
    Subscribe {
        source: String,
        /// Replay recent history first
        #[arg(long)]
        show_previous: bool,
    },
    /// Print the credential key for a method or source
    Key { name: String },
}

impl Cli {
    /// Config file values overridden by flags and environment.
    fn resolve_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::load(self.config.as_deref())?;
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(username) = &self.username {
            config.username = username.clone();
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if let Some(salt) = &self.salt {
            config.salt = salt.clone();
        }
        Ok(config)
    }
}

/// Parse a CLI argument as JSON, falling back to a plain string.
fn parse_argument(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Render a push for the terminal.
fn format_push(source: &str, payload: &Value) -> String {
    let typed = match source {
        "chat" => serde_json::from_value::<ChatMessage>(payload.clone())
            .ok()
            .map(|chat| chat.display()),
        "connections" => serde_json::from_value::<ConnectionEvent>(payload.clone())
            .ok()
            .map(|event| event.display()),
        _ => None,
    };
    typed.unwrap_or_else(|| payload.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "jsonapi_rcon=info,rcon=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = cli.resolve_config()?;

    match cli.command {
        Action::Key { name } => {
            println!("{}", config.credentials().key_for(&name));
        }
        Action::Call { method, args } => {
            config.connect_on_start = false;
            let client = RconClient::new(config, |_| {})?;
            let arguments = args.iter().map(|arg| parse_argument(arg)).collect();

            let result = client
                .call(&method, arguments)
                .await
                .with_context(|| format!("Call to {} failed", method))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            client.shutdown();
        }
        Action::Subscribe {
            source,
            show_previous,
        } => {
            let label = source.clone();
            let client = RconClient::new(config, move |payload| {
                println!("{}", format_push(&label, &payload));
            })?;

            client
                .try_subscribe(&source, show_previous)
                .await
                .with_context(|| format!("Subscribe to {} failed", source))?;
            tracing::info!("Listening on {} (Ctrl-C to stop)", client.url());

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            client.shutdown();
        }
    }

    Ok(())
}

//! API command-line client
//!
//! Thin binary over `session-client`:
//! 1. Loads TOML config (`--config`, `CONFIG_PATH`, or `api-client.toml`)
//! 2. Restores persisted credentials when `auth.credentials_path` is set
//! 3. Runs one command: `login`, `register`, `logout`, or `call`
//! 4. Reports session expiry so the user knows to log in again

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use session_client::{Client, ClientConfig, Error, PendingCall, RefreshFailure, SessionEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status when the session has expired and a new login is required
const EXIT_SESSION_EXPIRED: i32 = 2;

/// Authenticated client for the REST API
#[derive(Parser, Debug)]
#[command(name = "api-cli")]
#[command(about = "Authenticated client for the REST API", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML config (falls back to CONFIG_PATH, then api-client.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and store the session credentials
    Login {
        #[arg(long, env = "API_USERNAME")]
        username: String,

        #[arg(long, env = "API_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Register an account and store the session credentials
    Register {
        /// Registration payload as JSON
        #[arg(value_parser = parse_json)]
        body: serde_json::Value,
    },

    /// End the session on the server and locally
    Logout,

    /// Send a request, refreshing credentials on a 401
    Call {
        #[arg(value_enum, ignore_case = true)]
        method: Method,

        /// Path relative to the configured base URL
        path: String,

        /// Request body as JSON
        #[arg(value_parser = parse_json)]
        body: Option<serde_json::Value>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

fn parse_json(raw: &str) -> std::result::Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("not valid JSON: {e}"))
}

fn build_call(method: Method, path: String, body: Option<serde_json::Value>) -> PendingCall {
    let call = match method {
        Method::Get => PendingCall::get(path),
        Method::Post => PendingCall::post(path),
        Method::Put => PendingCall::put(path),
        Method::Patch => PendingCall::patch(path),
        Method::Delete => PendingCall::delete(path),
    };
    match body {
        Some(body) => call.json(body),
        None => call,
    }
}

async fn run(client: &Client, command: Commands) -> Result<()> {
    match command {
        Commands::Login { username, password } => {
            let body = client
                .login(serde_json::json!({ "username": username, "password": password }))
                .await?;
            println!("{}", serde_json::to_string_pretty(&body["user"])?);
        }
        Commands::Register { body } => {
            let body = client.register(body).await?;
            println!("{}", serde_json::to_string_pretty(&body["user"])?);
        }
        Commands::Logout => client.logout().await?,
        Commands::Call { method, path, body } => {
            let response = client.request(build_call(method, path, body)).await?;
            println!("{}", response.status);
            match response.json::<serde_json::Value>() {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", response.text()),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_path = ClientConfig::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = ClientConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url,
        persisted = config.auth.credentials_path.is_some(),
        "configuration loaded"
    );

    let client = Client::from_config(config)
        .await
        .context("failed to initialize client")?;

    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event == SessionEvent::LoggedOut {
                info!("session ended");
            }
        }
    });

    let result = run(&client, cli.command).await;
    if let Some(reason) = result.as_ref().err().and_then(session_expiry) {
        // Logged here rather than from the event task, which exit would cut short
        warn!(%reason, "session expired");
        eprintln!("session expired; run `api-cli login` to sign in again");
        std::process::exit(EXIT_SESSION_EXPIRED);
    }
    result
}

/// The refresh failure behind `err`, when the command failed because the
/// session expired.
fn session_expiry(err: &anyhow::Error) -> Option<&RefreshFailure> {
    match err.downcast_ref::<Error>() {
        Some(Error::SessionExpired(reason)) => Some(reason),
        _ => None,
    }
}

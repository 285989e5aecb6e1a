//! Stockroom CLI - a terminal front end for the inventory and sales API.
//!
//! Logs in, keeps the session alive, and lists records from the backend.
//! Every request goes through the authenticated gateway in `stockroom-core`.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stockroom_core::{
    ApiClient, ApiError, Config, Resource, ResourceClient, SessionManager, SessionSupervisor,
    SystemClock, View,
};

#[derive(Parser)]
#[command(name = "stockroom", version, about = "Inventory and sales client")]
struct Cli {
    /// API base URL, overriding the config file
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the session
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// End the session and forget the stored credentials
    Logout,
    /// Show whether the stored session is still valid
    Status,
    /// List a collection (components, ready-builds, builds-in-progress)
    List { resource: Resource },
    /// Show a single record
    Get { resource: Resource, id: String },
    /// Keep the session supervised and print navigation changes until Ctrl-C
    Watch,
}

/// Initialize the tracing subscriber for logging
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, "stockroom.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

/// Exit status for a rejected login.
const EXIT_LOGIN_FAILED: u8 = 1;

/// Exit status when the session has ended and a new login is needed.
const EXIT_SESSION_ENDED: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(url) = cli.api_url.clone() {
        config.api_base_url = url;
    }

    let _log_guard = init_tracing(&config);
    info!(api = %config.api_base_url, "Stockroom starting");

    let store = config.open_token_store()?;
    let session = Arc::new(SessionManager::new(store, Arc::new(SystemClock)));
    let api = ApiClient::new(&config, session.clone())?;

    match cli.command {
        Command::Login { email } => login(&mut config, &api, email).await,
        Command::Logout => {
            if api.logout() {
                println!("Logged out.");
            } else {
                println!("No active session.");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            status(&session);
            Ok(ExitCode::SUCCESS)
        }
        Command::List { resource } => {
            let records = ResourceClient::new(api).list(resource).await;
            print_json(records)
        }
        Command::Get { resource, id } => {
            let record = ResourceClient::new(api).get(resource, &id).await;
            print_json(record)
        }
        Command::Watch => watch(&config, session).await,
    }
}

async fn login(config: &mut Config, api: &ApiClient, email: Option<String>) -> Result<ExitCode> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password(format!("Password for {}: ", email))
        .context("Failed to read password")?;

    match api.login(&email, &password).await {
        Ok(()) => {
            config.last_email = Some(email);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            println!("Logged in.");
            Ok(ExitCode::SUCCESS)
        }
        Err(ApiError::LoginFailed(message)) => {
            eprintln!("{}", message);
            Ok(ExitCode::from(EXIT_LOGIN_FAILED))
        }
        Err(e) => Err(e.into()),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn status(session: &SessionManager) {
    if session.is_authenticated() {
        let minutes = session
            .access_expires_in()
            .map(|d| d.num_minutes().max(0))
            .unwrap_or(0);
        println!("Authenticated (access credential expires in {}m)", minutes);
    } else {
        println!("Not authenticated. Run `stockroom login`.");
    }
}

fn print_json(result: Result<serde_json::Value, ApiError>) -> Result<ExitCode> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_session_ending() => {
            eprintln!("{}", e);
            eprintln!("Run `stockroom login` to start a new session.");
            Ok(ExitCode::from(EXIT_SESSION_ENDED))
        }
        Err(e) => Err(e.into()),
    }
}

async fn watch(config: &Config, session: Arc<SessionManager>) -> Result<ExitCode> {
    let mut intents = session.subscribe_navigation();
    let view = session.navigate(View::HOME);
    println!("Watching session (view {}), Ctrl-C to stop.", view);

    let supervisor = SessionSupervisor::new(session.clone(), config.supervisor_interval()).spawn();
    loop {
        tokio::select! {
            intent = intents.recv() => match intent {
                Ok(intent) => println!("{} -> {} ({:?})", intent.from, intent.to, intent.reason),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    supervisor.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

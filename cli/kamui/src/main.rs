//! Kamui CLI
//!
//! Authenticates against Kamui Platform and hands out access tokens:
//! 1. Parse arguments and install logging on stderr
//! 2. Resolve the credential file and API URL override
//! 3. Run the command against the session manager
//!
//! Any failure prints `Error: <message>` on stderr and exits with status 1.

mod commands;
mod config;
mod error;

use std::process::ExitCode;

use anyhow::{Context, Result};
use kamui_auth::{CredentialStore, SessionManager};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{Args, Command, USAGE};
use crate::config::CliConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let args = match commands::parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}\n\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(args.log_json);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so `kamui token` output stays clean on stdout.
///
/// Filter from `LOG_LEVEL`, then `RUST_LOG`, else `warn`.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(args: Args) -> Result<()> {
    let mut stdout = std::io::stdout();

    match args.command {
        Command::Help => {
            println!("{USAGE}");
            return Ok(());
        }
        Command::Version => {
            println!("kamui {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let config = CliConfig::resolve(args.config.as_deref(), args.api_url.as_deref())
        .context("failed to resolve configuration")?;
    debug!(
        path = %config.credentials_path.display(),
        api_url = ?config.api_url,
        command = ?args.command,
        "configuration resolved"
    );

    let store = CredentialStore::new(config.credentials_path.clone());
    let manager = SessionManager::new(store, config.session_config())?;

    match args.command {
        Command::Login => commands::login(&manager, cancel_signal(), &mut stdout).await,
        Command::Logout => commands::logout(&manager, &mut stdout).await,
        Command::Status => commands::status(&manager, &mut stdout).await,
        Command::Token => commands::token(&manager, &mut stdout).await,
        Command::Help | Command::Version => Ok(()),
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn cancel_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    eprintln!();
}

//! RP Admin - maintenance tool for the relying-party credential store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rp_server::PgCredentialStore;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  64  Usage error (missing database URL, bad user id)
  65  Credential blob could not be re-encoded
  67  User not found
  69  Database unavailable";

#[derive(Parser)]
#[command(name = "rp-admin")]
#[command(author, version, about = "Inspect and maintain WebAuthn relying-party users", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Postgres connection string (defaults to $DATABASE_URL)
    #[arg(long, global = true, value_name = "URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or remove registered users
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },

    /// Rewrite legacy credential blobs into the canonical array shape
    MigrateBlobs {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    /// List every user with its credential count
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one user and its decoded credentials
    Show {
        /// Username or user id
        #[arg(value_name = "USER")]
        user: String,
    },

    /// Delete a user and all of its credentials
    Delete {
        /// User id (UUID)
        #[arg(value_name = "ID")]
        id: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rp_admin=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let exit = match run(Cli::parse()).await {
        Ok(()) => ExitCode::success(),
        Err(err) => ExitCode::from_anyhow(&err),
    };

    if let Some(message) = exit.message {
        eprintln!("Error: {message}");
    }
    std::process::exit(exit.code);
}

async fn run(cli: Cli) -> Result<()> {
    let url = match cli.database_url {
        Some(url) => url,
        None => std::env::var("DATABASE_URL")
            .context("No database URL: pass --database-url or set DATABASE_URL")?,
    };

    let store = PgCredentialStore::connect(&url, 2)
        .await
        .context("Failed to connect to database")?;

    match cli.command {
        Commands::Users { action } => match action {
            UsersAction::List { json } => commands::users::list(&store, json).await,
            UsersAction::Show { user } => commands::users::show(&store, &user).await,
            UsersAction::Delete { id } => commands::users::delete(&store, &id).await,
        },
        Commands::MigrateBlobs { dry_run } => {
            commands::migrate::execute(&store, dry_run).await.map(|_| ())
        }
    }
}

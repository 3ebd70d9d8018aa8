//! Fingerprint Auth - credential exchange server and operator tools

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use fingerprint_auth::{
    AccountIdentity, AppState, CustomTokenIssuer, ExchangeConfig, ServiceAccount,
    SqliteMappingStore, TokenIssuer,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Service account key file; overrides provider settings from the environment
    #[arg(long, global = true)]
    service_account: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the credential exchange service (default)
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Verify the mapping store and token signing are working
    Check,

    /// Print environment variables equivalent to a service account file
    Env,

    /// Manage identifier to account mappings
    Map {
        #[command(subcommand)]
        action: MapAction,
    },
}

#[derive(Subcommand)]
enum MapAction {
    /// Map a device identifier to an account uid
    Add { identifier: String, uid: String },

    /// Remove the mapping of a device identifier
    Remove { identifier: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fingerprint_auth=debug,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let service_account = match cli.service_account {
        Some(ref path) => Some(
            ServiceAccount::from_file(path)
                .with_context(|| format!("reading service account {}", path.display()))?,
        ),
        None => None,
    };

    let mut config = ExchangeConfig::from_env().unwrap_or_else(|e| {
        error!("Failed to load config: {}", e);
        info!("Using default configuration");
        ExchangeConfig::default()
    });
    if let Some(ref account) = service_account {
        config = config.with_service_account(account);
    }

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            run_server(config).await?;
        }

        Commands::Check => run_check(config).await?,

        Commands::Env => {
            let account = service_account
                .context("the env command needs --service-account <file>")?;
            print_env(&account);
        }

        Commands::Map { action } => run_map(config, action).await?,
    }

    Ok(())
}

async fn run_server(config: ExchangeConfig) -> anyhow::Result<()> {
    info!("Starting credential exchange for project {}", config.provider.project_id);

    let addr = config.bind_addr();
    let state = AppState::new(config).await?;
    let app = fingerprint_auth::web::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running at http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run_check(config: ExchangeConfig) -> anyhow::Result<()> {
    println!("{}", "Fingerprint Auth Diagnostics".bold().blue());
    println!("{}", "============================".blue());
    println!();
    println!("Project ID:   {}", config.provider.project_id);
    println!("Client email: {}", config.provider.client_email);
    println!();

    let mut healthy = true;

    match SqliteMappingStore::connect(&config.database_url).await {
        Ok(store) => match store.count().await {
            Ok(count) => println!(
                "{} Mapping store reachable ({} mappings)",
                "✅".green(),
                count
            ),
            Err(e) => {
                healthy = false;
                println!("{} Mapping store query failed: {}", "❌".red(), e);
            }
        },
        Err(e) => {
            healthy = false;
            println!("{} Mapping store unavailable: {}", "❌".red(), e);
        }
    }

    match CustomTokenIssuer::new(&config.provider) {
        Ok(issuer) => {
            println!("{} Token issuer initialized ({:?})", "✅".green(), issuer.algorithm());
            match issuer
                .create_custom_token(&AccountIdentity::new("diagnostic-probe"))
                .await
            {
                Ok(_) => println!("{} Probe token signed", "✅".green()),
                Err(e) => {
                    healthy = false;
                    println!("{} Probe token signing failed: {}", "❌".red(), e);
                }
            }
        }
        Err(e) => {
            healthy = false;
            println!("{} Token issuer unavailable: {}", "❌".red(), e);
        }
    }

    println!();
    if healthy {
        println!("{}", "All services are working correctly!".green().bold());
        Ok(())
    } else {
        anyhow::bail!("one or more services failed the diagnostic")
    }
}

fn print_env(account: &ServiceAccount) {
    println!("{}", "Service Account Configuration:".bold());
    println!("Project ID:     {}", account.project_id);
    println!("Client Email:   {}", account.client_email);
    println!("Private Key ID: {}", account.private_key_id);
    println!();
    println!("{}", "Environment variables to set:".bold());
    for (name, value) in account.env_exports() {
        println!("export {}=\"{}\"", name, value);
    }
    println!();
    println!("{}", "Then start the server with:".dimmed());
    println!("  fingerprint-auth serve");
}

async fn run_map(config: ExchangeConfig, action: MapAction) -> anyhow::Result<()> {
    let store = SqliteMappingStore::connect(&config.database_url).await?;

    match action {
        MapAction::Add { identifier, uid } => {
            if identifier.is_empty() || uid.is_empty() {
                anyhow::bail!("identifier and uid must both be non-empty");
            }
            let mapping = store.upsert(&identifier, &uid).await?;
            info!("Mapped identifier to uid {}", mapping.uid);
        }
        MapAction::Remove { identifier } => {
            if store.remove(&identifier).await? {
                info!("Mapping removed");
            } else {
                anyhow::bail!("no mapping exists for that identifier");
            }
        }
    }

    Ok(())
}

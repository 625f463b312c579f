use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::build::BuildArgs;
use livebuild_cli::App;
use livebuild_config::Settings;

#[derive(Parser)]
#[command(name = "livebuild")]
#[command(about = "Livebuild CLI - turn a project brief into a running preview")]
#[command(version)]
struct Cli {
    /// Session to attach to (defaults to LIVEBUILD_SESSION_ID, then a new id)
    #[arg(long, global = true)]
    session: Option<String>,

    /// Backend base URL (overrides LIVEBUILD_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a brief, follow the build and serve the preview when it completes
    Build(BuildArgs),
    /// Serve the live preview of an existing session
    Preview,
    /// Send a follow-up message and print the reply
    Chat {
        /// Message to send
        message: String,
    },
    /// Deploy the session's project
    Deploy {
        #[arg(long, default_value = "production")]
        target: String,
    },
    /// Upload an image for use in the project
    Upload {
        /// Image file to upload
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = Settings::from_env()?;
    if let Some(session) = cli.session {
        settings.session.session_id = Some(session);
    }
    if let Some(url) = cli.api_url {
        settings.api = settings.api.with_base_url(&url)?;
    }

    let app = App::new(settings)?;

    match cli.command {
        Commands::Build(args) => cli::build::handle_build(&app, args).await,
        Commands::Preview => cli::preview::handle_preview(&app).await,
        Commands::Chat { message } => cli::chat::handle_chat(&app, &message).await,
        Commands::Deploy { target } => cli::publish::handle_deploy(&app, &target).await,
        Commands::Upload { path } => cli::publish::handle_upload(&app, &path).await,
    }
}

// ABOUTME: `livebuild preview` runs the full preview pipeline for an existing session

use anyhow::{bail, Result};
use colored::*;

use livebuild_cli::{render, App};
use livebuild_preview::PreviewState;

use super::{serve_until_interrupted, spawn_state_printer};

pub async fn handle_preview(app: &App) -> Result<()> {
    println!(
        "{} {}",
        "Starting preview for session".bold(),
        app.session_id().cyan()
    );

    let progress = spawn_state_printer(app);
    let state = app.orchestrator.start().await;
    progress.abort();
    println!("{}", render::state_line(&state));

    match state {
        PreviewState::Ready { .. } => serve_until_interrupted(app).await,
        PreviewState::Error { message, .. } => {
            let logs = app.orchestrator.logs(None, Some(20)).await;
            if !logs.is_empty() {
                println!("{}", "Recent output:".dimmed());
                for log in logs {
                    println!("  {}", log.message);
                }
            }
            app.shutdown().await;
            bail!(message)
        }
        other => bail!("Preview stopped in state {}", other.as_str()),
    }
}

// ABOUTME: Subcommand handlers for the livebuild binary plus shared terminal loops
// ABOUTME: Message and preview state printers follow the watch channels of the core crates

use anyhow::{Context, Result};
use colored::*;
use tokio::task::JoinHandle;

use livebuild_cli::{render, App};
use livebuild_preview::PreviewState;
use livebuild_session::BuildCoordinator;

pub mod build;
pub mod chat;
pub mod preview;
pub mod publish;

/// Print finished session messages in order until the session is terminal.
pub async fn print_messages(coordinator: BuildCoordinator) {
    let mut changes = coordinator.changes();
    let mut printed = 0;
    loop {
        let session = coordinator.session().await;
        for message in session.messages.since(printed) {
            // Keep ordering: stop at a turn that is still streaming
            if !message.finished {
                break;
            }
            println!("{}", render::message_line(message));
            printed += 1;
        }
        if session.status.is_terminal() {
            break;
        }
        if changes.changed().await.is_err() {
            break;
        }
    }
}

/// Print intermediate preview stages as they happen.
pub fn spawn_state_printer(app: &App) -> JoinHandle<()> {
    let mut states = app.orchestrator.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            if !state.is_terminal() && state != PreviewState::Idle {
                println!("{}", render::state_line(&state));
            }
        }
    })
}

/// Wait until the preview settles in `ready` or `error`.
pub async fn wait_for_preview(app: &App) -> PreviewState {
    let mut states = app.orchestrator.subscribe();
    let state = match states.wait_for(|state| state.is_terminal()).await {
        Ok(state) => state.clone(),
        Err(_) => app.orchestrator.state(),
    };
    state
}

/// Keep the dev server running until Ctrl+C, reporting state changes.
pub async fn serve_until_interrupted(app: &App) -> Result<()> {
    println!("{}", "Press Ctrl+C to stop the preview".dimmed());
    let mut states = app.orchestrator.subscribe();
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                println!("{}", render::state_line(&state));
            }
        }
    }

    println!("Stopping preview...");
    app.shutdown().await;
    Ok(())
}

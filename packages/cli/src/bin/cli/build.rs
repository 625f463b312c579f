// ABOUTME: `livebuild build` submits a brief and prints build progress as it arrives
// ABOUTME: When the job completes the preview is refreshed and served until interrupted

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::*;
use std::path::PathBuf;

use livebuild_cli::{load_brief, render, App};
use livebuild_session::{Brief, SessionStatus};

use super::{print_messages, serve_until_interrupted, spawn_state_printer, wait_for_preview};

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// JSON file containing the brief
    #[arg(long, conflicts_with_all = ["title", "summary"])]
    pub brief: Option<PathBuf>,

    /// Project title, when not using --brief
    #[arg(long)]
    pub title: Option<String>,

    /// Short description of the project
    #[arg(long)]
    pub summary: Option<String>,

    /// Exit once the build finishes instead of serving the preview
    #[arg(long)]
    pub no_preview: bool,
}

impl BuildArgs {
    fn to_brief(&self) -> Result<Brief> {
        if let Some(path) = &self.brief {
            return load_brief(path);
        }
        let title = self
            .title
            .clone()
            .context("Provide --brief <file> or --title <title>")?;
        let mut brief = Brief::new(title);
        if let Some(summary) = &self.summary {
            brief = brief.with_summary(summary.clone());
        }
        Ok(brief)
    }
}

pub async fn handle_build(app: &App, args: BuildArgs) -> Result<()> {
    let brief = args.to_brief()?;
    println!("{} {}", "Session".bold(), app.session_id().cyan());

    let printer = tokio::spawn(print_messages(app.coordinator.clone()));
    let watcher = (!args.no_preview).then(|| app.watch_refresh());
    let progress = watcher.as_ref().map(|_| spawn_state_printer(app));

    let status = app.coordinator.start(&brief).await?;
    let _ = printer.await;
    println!("{}", render::status_line(status));

    if status != SessionStatus::Completed {
        let session = app.coordinator.session().await;
        bail!(session
            .error
            .unwrap_or_else(|| "The build did not complete".to_string()));
    }

    let Some(watcher) = watcher else {
        return Ok(());
    };

    let state = wait_for_preview(app).await;
    if let Some(progress) = progress {
        progress.abort();
    }
    println!("{}", render::state_line(&state));

    let result = if state.url().is_some() {
        serve_until_interrupted(app).await
    } else {
        app.shutdown().await;
        Err(anyhow::anyhow!("Preview could not be started"))
    };
    watcher.abort();
    result
}

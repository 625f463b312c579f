// ABOUTME: `livebuild deploy` and `livebuild upload` wrap the backend's publish endpoints

use anyhow::{Context, Result};
use colored::*;
use std::path::Path;

use livebuild_cli::App;

pub async fn handle_deploy(app: &App, target: &str) -> Result<()> {
    let deployment = app
        .client
        .deploy(target)
        .await
        .with_context(|| format!("Deploy to '{}' failed", target))?;

    println!(
        "{} {} {}",
        "Deployed".green().bold(),
        deployment.target,
        deployment.url.underline()
    );
    Ok(())
}

pub async fn handle_upload(app: &App, path: &Path) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .context("Upload path has no file name")?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let uploaded = app
        .client
        .upload_image(file_name, bytes)
        .await
        .context("Upload failed")?;

    println!("{} {}", "Uploaded".green().bold(), uploaded.url);
    Ok(())
}

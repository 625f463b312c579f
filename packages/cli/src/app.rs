// ABOUTME: Assembles the API client, build coordinator and preview orchestrator from settings
// ABOUTME: Job completion raises the refresh signal that restarts the preview dev server

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use livebuild_client::{generate_session_id, ApiClient};
use livebuild_config::Settings;
use livebuild_preview::{
    ArtifactFetcher, LocalSandboxHost, ProcessOrchestrator, RefreshSignal, SandboxRuntimeManager,
};
use livebuild_session::{Brief, BuildCoordinator, FollowUpConsumer};

/// Everything one CLI invocation needs, bound to a single session id.
pub struct App {
    pub settings: Settings,
    pub client: ApiClient,
    pub coordinator: BuildCoordinator,
    pub orchestrator: ProcessOrchestrator,
    pub refresh: RefreshSignal,
}

impl App {
    pub fn new(mut settings: Settings) -> Result<Self> {
        let session_id = settings
            .session
            .session_id
            .clone()
            .unwrap_or_else(generate_session_id);
        settings.session.session_id = Some(session_id.clone());

        let client = ApiClient::from_settings(&settings.api, session_id)
            .context("Failed to create API client")?;
        let coordinator =
            BuildCoordinator::new(Arc::new(client.clone()), settings.session.clone());

        let host = Arc::new(LocalSandboxHost::from_settings(&settings.preview));
        let fetcher = ArtifactFetcher::from_settings(Arc::new(client.clone()), &settings.preview);
        let orchestrator = ProcessOrchestrator::new(
            SandboxRuntimeManager::new(host),
            fetcher,
            settings.preview.clone(),
        );

        let refresh = RefreshSignal::new();
        let signal = refresh.clone();
        coordinator.on_complete(move |session_id| {
            let token = signal.raise();
            info!(
                "Build for session {} completed, refreshing preview (token {})",
                session_id, token
            );
        });

        Ok(Self {
            settings,
            client,
            coordinator,
            orchestrator,
            refresh,
        })
    }

    pub fn session_id(&self) -> String {
        self.client.session_id()
    }

    /// Run a preview refresh for every token the completion callback raises.
    pub fn watch_refresh(&self) -> JoinHandle<()> {
        self.orchestrator.watch_refresh(&self.refresh)
    }

    pub fn follow_ups(&self) -> Result<FollowUpConsumer> {
        let streaming = self
            .client
            .streaming()
            .context("Failed to create streaming client")?;
        Ok(FollowUpConsumer::new(
            self.coordinator.clone(),
            Arc::new(streaming),
        ))
    }

    /// Stop preview processes and abandon any in-flight polling.
    pub async fn shutdown(&self) {
        self.reset_session(Some(self.session_id())).await;
    }

    /// Start over with `session_id` or a generated one. The client picks up
    /// the new id so file fetches follow the new session.
    pub async fn reset_session(&self, session_id: Option<String>) -> String {
        self.orchestrator.reset().await;
        let session_id = self.coordinator.reset(session_id).await;
        self.client.set_session_id(session_id.clone());
        info!("Session reset to {}", session_id);
        session_id
    }
}

/// Read a brief from a JSON file.
pub fn load_brief(path: &Path) -> Result<Brief> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read brief {}", path.display()))?;
    let brief: Brief = serde_json::from_str(&text)
        .with_context(|| format!("Invalid brief JSON in {}", path.display()))?;
    if brief.title.trim().is_empty() {
        bail!("Brief {} has an empty title", path.display());
    }
    Ok(brief)
}

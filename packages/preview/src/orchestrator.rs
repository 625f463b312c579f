// ABOUTME: Runs the preview pipeline: fetch, boot, mount, install, then start the dev server
// ABOUTME: Hot refresh restarts only the dev server stage; reset tears down without discarding the sandbox

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, RwLock as StdRwLock};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use livebuild_config::PreviewSettings;

use crate::fetcher::ArtifactFetcher;
use crate::file_tree::FileTree;
use crate::host::{ProcessHandle, ProcessOutput, SandboxHandle, SpawnSpec, KILLED_EXIT_CODE};
use crate::logs::LogBuffer;
use crate::runtime::SandboxRuntimeManager;
use crate::types::{
    LogType, PreviewError, PreviewLog, PreviewResult, PreviewState, RefreshOutcome,
    RefreshSignal,
};

/// Called with the preview URL the first time a session's preview is ready.
pub type ReadyCallback = Arc<dyn Fn(&str) + Send + Sync>;

const ERROR_MARKERS: [&str; 5] = ["error", "err!", "enoent", "eresolve", "failed"];
const MAX_ERROR_LINES: usize = 50;

#[derive(Default)]
struct Processes {
    installer: Option<ProcessHandle>,
    dev_server: Option<ProcessHandle>,
}

#[derive(Clone, Copy)]
enum ProcessKind {
    Installer,
    DevServer,
}

#[derive(Default)]
struct RefreshGuard {
    last_token: u64,
    busy: bool,
    pending: Option<u64>,
}

struct Inner {
    runtime: SandboxRuntimeManager,
    fetcher: ArtifactFetcher,
    settings: PreviewSettings,
    state: watch::Sender<PreviewState>,
    processes: Mutex<Processes>,
    logs: LogBuffer,
    generation: AtomicU64,
    installed: AtomicBool,
    first_ready_fired: AtomicBool,
    on_first_ready: StdRwLock<Option<ReadyCallback>>,
    refresh: StdMutex<RefreshGuard>,
    pipeline: Mutex<()>,
}

#[derive(Clone)]
pub struct ProcessOrchestrator {
    inner: Arc<Inner>,
}

impl ProcessOrchestrator {
    pub fn new(
        runtime: SandboxRuntimeManager,
        fetcher: ArtifactFetcher,
        settings: PreviewSettings,
    ) -> Self {
        let (state, _) = watch::channel(PreviewState::Idle);
        Self {
            inner: Arc::new(Inner {
                runtime,
                fetcher,
                settings,
                state,
                processes: Mutex::new(Processes::default()),
                logs: LogBuffer::default(),
                generation: AtomicU64::new(0),
                installed: AtomicBool::new(false),
                first_ready_fired: AtomicBool::new(false),
                on_first_ready: StdRwLock::new(None),
                refresh: StdMutex::new(RefreshGuard::default()),
                pipeline: Mutex::new(()),
            }),
        }
    }

    pub fn on_first_ready<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_first_ready
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    pub fn runtime(&self) -> &SandboxRuntimeManager {
        &self.inner.runtime
    }

    pub fn state(&self) -> PreviewState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PreviewState> {
        self.inner.state.subscribe()
    }

    pub async fn logs(&self, since: Option<DateTime<Utc>>, limit: Option<usize>) -> Vec<PreviewLog> {
        self.inner.logs.query(since, limit).await
    }

    /// Run the full pipeline. Returns `ready` or `error`.
    pub async fn start(&self) -> PreviewState {
        self.refresh_guard().busy = true;

        let state = {
            let _pipeline = self.inner.pipeline.lock().await;
            let generation = self.next_generation();
            info!("Starting preview pipeline");
            let result = self.run_pipeline(generation, false).await;
            self.settle(generation, result).await
        };

        self.finish_run().await;
        state
    }

    /// Request a remount cycle for `token`.
    pub async fn refresh(&self, token: u64) -> RefreshOutcome {
        {
            let mut guard = self.refresh_guard();
            if token == 0 || token <= guard.last_token {
                debug!(
                    "Ignoring refresh token {} (last processed {})",
                    token, guard.last_token
                );
                return RefreshOutcome::Ignored;
            }
            guard.last_token = token;
            if guard.busy {
                info!("Preview pipeline busy, deferring refresh token {}", token);
                guard.pending = Some(token);
                return RefreshOutcome::Deferred;
            }
            guard.busy = true;
        }

        let state = self.run_refresh_cycle(token).await;
        self.finish_run().await;
        RefreshOutcome::Completed(state)
    }

    /// Drive `refresh` from every token raised on `signal`.
    pub fn watch_refresh(&self, signal: &RefreshSignal) -> JoinHandle<()> {
        let mut tokens = signal.subscribe();
        let orchestrator = self.clone();

        tokio::spawn(async move {
            while tokens.changed().await.is_ok() {
                let token = *tokens.borrow_and_update();
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    orchestrator.refresh(token).await;
                });
            }
            debug!("Refresh signal closed");
        })
    }

    /// Kill processes and clear cached files, logs and URL. The sandbox
    /// instance itself is kept.
    pub async fn reset(&self) {
        info!("Resetting preview");
        self.next_generation();
        self.inner.fetcher.cancel_pending();
        self.kill_processes().await;
        self.inner.fetcher.clear_cache().await;
        self.inner.logs.clear().await;
        self.inner.installed.store(false, Ordering::SeqCst);
        self.inner.first_ready_fired.store(false, Ordering::SeqCst);
        {
            let mut guard = self.refresh_guard();
            guard.last_token = 0;
            guard.pending = None;
        }
        self.inner.state.send_replace(PreviewState::Idle);
    }

    fn refresh_guard(&self) -> MutexGuard<'_, RefreshGuard> {
        self.inner
            .refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Run deferred refresh tokens until none remain, then release the busy flag.
    async fn finish_run(&self) {
        loop {
            let next = {
                let mut guard = self.refresh_guard();
                let next = guard.pending.take();
                if next.is_none() {
                    guard.busy = false;
                }
                next
            };

            match next {
                Some(token) => {
                    self.run_refresh_cycle(token).await;
                }
                None => break,
            }
        }
    }

    async fn run_refresh_cycle(&self, token: u64) -> PreviewState {
        let _pipeline = self.inner.pipeline.lock().await;
        let generation = self.next_generation();
        info!("Refreshing preview for token {}", token);
        self.log(LogType::System, format!("Refreshing preview (token {})", token))
            .await;

        let result = if self.inner.installed.load(Ordering::SeqCst) {
            self.remount_and_restart(generation).await
        } else {
            // Nothing installed yet, so a remount alone cannot start a server
            self.run_pipeline(generation, true).await
        };
        self.settle(generation, result).await
    }

    fn set_state(&self, generation: u64, state: PreviewState) -> PreviewResult<()> {
        if self.generation() != generation {
            return Err(PreviewError::Superseded);
        }
        debug!("Preview state -> {}", state.as_str());
        self.inner.state.send_replace(state);
        Ok(())
    }

    async fn run_pipeline(&self, generation: u64, force_fetch: bool) -> PreviewResult<String> {
        self.inner.runtime.check_environment()?;

        self.set_state(generation, PreviewState::Fetching)?;
        let tree = self.inner.fetcher.fetch_files(force_fetch).await?;

        self.set_state(generation, PreviewState::Booting)?;
        let sandbox = self.inner.runtime.ensure_boot().await?;

        self.set_state(generation, PreviewState::Mounting)?;
        self.mount(&sandbox, &tree).await?;

        self.set_state(generation, PreviewState::Installing)?;
        self.install(generation, &sandbox).await?;
        self.verify_dependencies(&sandbox).await?;
        self.inner.installed.store(true, Ordering::SeqCst);

        self.set_state(generation, PreviewState::Starting)?;
        self.start_dev_server(generation, &sandbox).await
    }

    async fn remount_and_restart(&self, generation: u64) -> PreviewResult<String> {
        self.kill_processes().await;

        self.set_state(generation, PreviewState::Fetching)?;
        let tree = self.inner.fetcher.fetch_files(true).await?;

        self.set_state(generation, PreviewState::Booting)?;
        let sandbox = self.inner.runtime.ensure_boot().await?;

        self.set_state(generation, PreviewState::Mounting)?;
        self.mount(&sandbox, &tree).await?;

        self.set_state(generation, PreviewState::Starting)?;
        self.start_dev_server(generation, &sandbox).await
    }

    async fn settle(&self, generation: u64, result: PreviewResult<String>) -> PreviewState {
        match result {
            Ok(url) => self.mark_ready(generation, url).await,
            Err(PreviewError::Superseded) => {
                debug!("Preview run {} superseded", generation);
                self.state()
            }
            Err(e) => {
                if self.generation() != generation {
                    return self.state();
                }
                error!("Preview failed: {}", e);
                self.log(LogType::System, format!("Preview failed: {}", e)).await;
                let state = PreviewState::from_error(&e);
                self.inner.state.send_replace(state.clone());
                state
            }
        }
    }

    async fn mark_ready(&self, generation: u64, url: String) -> PreviewState {
        if self.generation() != generation {
            return self.state();
        }

        info!("Preview ready at {}", url);
        self.log(LogType::System, format!("Preview ready at {}", url)).await;
        let state = PreviewState::Ready { url: url.clone() };
        self.inner.state.send_replace(state.clone());

        if !self.inner.first_ready_fired.swap(true, Ordering::SeqCst) {
            let callback = self
                .inner
                .on_first_ready
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(callback) = callback {
                callback(&url);
            }
        }

        state
    }

    async fn mount(&self, sandbox: &SandboxHandle, tree: &FileTree) -> PreviewResult<()> {
        sandbox
            .mount(tree)
            .await
            .map_err(|e| PreviewError::Mount(e.message))?;
        self.log(
            LogType::System,
            format!("Mounted {} files", tree.file_count()),
        )
        .await;
        Ok(())
    }

    async fn spawn(&self, sandbox: &SandboxHandle, spec: SpawnSpec) -> PreviewResult<ProcessHandle> {
        let command = spec.display();
        self.log(LogType::System, format!("Running: {}", command)).await;

        let handle = sandbox.spawn(spec).await.map_err(|e| PreviewError::Spawn {
            command: command.clone(),
            error: e.message,
        })?;
        info!("Spawned '{}' with PID {:?}", command, handle.pid());
        Ok(handle)
    }

    /// Store `handle` as the active process of its kind, unless a reset
    /// happened since this run began. Checked under the process lock so a
    /// concurrent reset either kills this handle or is seen here.
    async fn track(&self, generation: u64, kind: ProcessKind, handle: ProcessHandle) -> PreviewResult<()> {
        let mut processes = self.inner.processes.lock().await;
        if self.generation() != generation {
            drop(handle);
            return Err(PreviewError::Superseded);
        }
        let slot = match kind {
            ProcessKind::Installer => &mut processes.installer,
            ProcessKind::DevServer => &mut processes.dev_server,
        };
        if let Some(mut previous) = slot.replace(handle) {
            previous.kill();
        }
        Ok(())
    }

    async fn kill_processes(&self) {
        let mut processes = self.inner.processes.lock().await;
        if let Some(mut installer) = processes.installer.take() {
            debug!("Killing installer {:?}", installer.pid());
            installer.kill();
        }
        if let Some(mut dev_server) = processes.dev_server.take() {
            debug!("Killing dev server {:?}", dev_server.pid());
            dev_server.kill();
        }
    }

    async fn install(&self, generation: u64, sandbox: &SandboxHandle) -> PreviewResult<()> {
        if let Some(mut previous) = self.inner.processes.lock().await.installer.take() {
            previous.kill();
        }

        let command = &self.inner.settings.install_command;
        let spec = SpawnSpec::new(command.program.clone(), command.args.clone());
        let mut handle = self.spawn(sandbox, spec).await?;
        let mut output = handle.take_output();
        let mut exit = handle.take_exit();
        self.track(generation, ProcessKind::Installer, handle).await?;

        let mut evidence: VecDeque<String> = VecDeque::new();
        let code = loop {
            tokio::select! {
                biased;
                line = next_output(&mut output) => match line {
                    Some(line) => self.record_install_output(line, &mut evidence).await,
                    None => output = None,
                },
                code = wait_exit(&mut exit) => break code,
            }
        };
        if let Some(rx) = output.as_mut() {
            while let Ok(line) = rx.try_recv() {
                self.record_install_output(line, &mut evidence).await;
            }
        }
        self.inner.processes.lock().await.installer.take();

        if code != 0 {
            let message = if evidence.is_empty() {
                format!("installer exited with code {}", code)
            } else {
                let joined = evidence.into_iter().collect::<Vec<_>>().join("\n");
                bounded_tail(&joined, self.inner.settings.error_output_limit)
            };
            return Err(PreviewError::InstallFailed { message });
        }

        self.log(LogType::System, "Dependencies installed").await;
        Ok(())
    }

    async fn record_install_output(&self, output: ProcessOutput, evidence: &mut VecDeque<String>) {
        if is_error_like(&output.line) {
            evidence.push_back(output.line.clone());
            if evidence.len() > MAX_ERROR_LINES {
                evidence.pop_front();
            }
        }
        self.log(output.stream, output.line).await;
    }

    async fn verify_dependencies(&self, sandbox: &SandboxHandle) -> PreviewResult<()> {
        let critical = &self.inner.settings.critical_dependency;
        if sandbox.file_exists(critical).await {
            return Ok(());
        }
        warn!("Critical dependency {} missing after install", critical);
        Err(PreviewError::InstallFailed {
            message: format!("{} is missing after install", critical),
        })
    }

    async fn start_dev_server(&self, generation: u64, sandbox: &SandboxHandle) -> PreviewResult<String> {
        if let Some(mut previous) = self.inner.processes.lock().await.dev_server.take() {
            previous.kill();
        }

        // Registered before spawn: the host may report readiness during spawn.
        let ready = sandbox.on_server_ready();

        let command = &self.inner.settings.dev_command;
        let spec = SpawnSpec::new(command.program.clone(), command.args.clone())
            .with_env(self.inner.settings.dev_env.clone());
        let mut handle = self.spawn(sandbox, spec).await?;
        if let Some(output) = handle.take_output() {
            self.pump_output(output);
        }
        let mut exit = handle.take_exit();
        self.track(generation, ProcessKind::DevServer, handle).await?;

        tokio::select! {
            result = ready => match result {
                Ok(ready) => {
                    self.monitor_dev_server(generation, exit);
                    Ok(ready.url)
                }
                Err(_) => Err(PreviewError::Host(
                    "sandbox dropped the server-ready notification".to_string(),
                )),
            },
            code = wait_exit(&mut exit) => {
                warn!("Dev server exited with code {} while starting", code);
                Err(PreviewError::DevServerCrashed { code })
            }
        }
    }

    fn pump_output(&self, mut output: mpsc::UnboundedReceiver<ProcessOutput>) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            while let Some(line) = output.recv().await {
                orchestrator.log(line.stream, line.line).await;
            }
        });
    }

    /// Report a non-zero exit of a ready dev server as an error state.
    fn monitor_dev_server(&self, generation: u64, exit: Option<oneshot::Receiver<i32>>) {
        let Some(exit) = exit else {
            return;
        };
        let orchestrator = self.clone();

        tokio::spawn(async move {
            let code = exit.await.unwrap_or(KILLED_EXIT_CODE);
            if orchestrator.generation() != generation {
                return;
            }
            if code == 0 {
                info!("Dev server exited cleanly");
                orchestrator
                    .log(LogType::System, "Dev server exited")
                    .await;
                return;
            }

            let error = PreviewError::DevServerCrashed { code };
            error!("{}", error);
            orchestrator
                .log(LogType::System, error.to_string())
                .await;
            let _ = orchestrator.set_state(generation, PreviewState::from_error(&error));
        });
    }

    async fn log(&self, log_type: LogType, message: impl Into<String>) {
        self.inner.logs.push(log_type, message).await;
    }
}

async fn next_output(
    output: &mut Option<mpsc::UnboundedReceiver<ProcessOutput>>,
) -> Option<ProcessOutput> {
    match output {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_exit(exit: &mut Option<oneshot::Receiver<i32>>) -> i32 {
    match exit {
        Some(rx) => rx.await.unwrap_or(KILLED_EXIT_CODE),
        None => std::future::pending().await,
    }
}

fn is_error_like(line: &str) -> bool {
    let line = line.to_ascii_lowercase();
    ERROR_MARKERS.iter().any(|marker| line.contains(marker))
}

/// Last `limit` characters of `text`.
fn bounded_tail(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    text.chars().skip(count - limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_like_lines() {
        assert!(is_error_like("npm ERR! code ERESOLVE"));
        assert!(is_error_like("Error: Cannot find module 'vite'"));
        assert!(is_error_like("ENOENT: no such file"));
        assert!(!is_error_like("added 212 packages in 9s"));
    }

    #[test]
    fn test_bounded_tail_respects_char_boundaries() {
        assert_eq!(bounded_tail("short", 10), "short");
        assert_eq!(bounded_tail("abcdef", 3), "def");
        assert_eq!(bounded_tail("ééééé", 2), "éé");
    }
}

// ABOUTME: Scripted sandbox host and artifact source shared by preview integration tests
// ABOUTME: Processes are simulated with channels so tests control output, readiness and exits

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use livebuild_client::ClientResult;
use livebuild_config::PreviewSettings;
use livebuild_preview::{
    ArtifactFetcher, ArtifactSource, FileTree, HostEnvironment, HostError, InstanceRegistry,
    LogType, ProcessHandle, ProcessOrchestrator, ProcessOutput, SandboxHandle, SandboxHost,
    SandboxInstance, SandboxRuntimeManager, ServerReady, SpawnSpec,
};

/// What a simulated process does once spawned.
#[derive(Clone)]
pub enum Script {
    /// Print lines, then exit with `code`.
    Exit { lines: Vec<String>, code: i32 },
    /// Report readiness on `port` during spawn and keep running.
    Serve { port: u16 },
}

pub struct ScriptedInstance {
    pub mounts: AtomicUsize,
    pub spawns: Mutex<Vec<SpawnSpec>>,
    pub kills: Arc<AtomicUsize>,
    pub critical_present: AtomicBool,
    installer_scripts: Mutex<VecDeque<Script>>,
    dev_scripts: Mutex<VecDeque<Script>>,
    ready_waiters: Mutex<Vec<oneshot::Sender<ServerReady>>>,
    crash_senders: Mutex<Vec<oneshot::Sender<i32>>>,
}

impl ScriptedInstance {
    fn new() -> Self {
        Self {
            mounts: AtomicUsize::new(0),
            spawns: Mutex::new(Vec::new()),
            kills: Arc::new(AtomicUsize::new(0)),
            critical_present: AtomicBool::new(true),
            installer_scripts: Mutex::new(VecDeque::new()),
            dev_scripts: Mutex::new(VecDeque::new()),
            ready_waiters: Mutex::new(Vec::new()),
            crash_senders: Mutex::new(Vec::new()),
        }
    }

    pub fn script_installer(&self, script: Script) {
        self.installer_scripts.lock().unwrap().push_back(script);
    }

    pub fn script_dev_server(&self, script: Script) {
        self.dev_scripts.lock().unwrap().push_back(script);
    }

    /// Make the most recent long-running process exit with `code`.
    pub fn crash_latest(&self, code: i32) {
        if let Some(tx) = self.crash_senders.lock().unwrap().pop() {
            let _ = tx.send(code);
        }
    }

    pub fn spawned_programs(&self) -> Vec<String> {
        self.spawns
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.display())
            .collect()
    }

    pub fn installer_spawns(&self) -> usize {
        self.spawned_programs()
            .iter()
            .filter(|cmd| cmd.contains("install"))
            .count()
    }

    pub fn dev_spawns(&self) -> usize {
        self.spawned_programs()
            .iter()
            .filter(|cmd| cmd.contains("run dev"))
            .count()
    }

    fn next_script(&self, spec: &SpawnSpec) -> Script {
        let is_installer = spec.args.first().map(String::as_str) == Some("install");
        if is_installer {
            self.installer_scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Exit {
                    lines: vec!["added 42 packages in 2s".to_string()],
                    code: 0,
                })
        } else {
            self.dev_scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Serve { port: 5173 })
        }
    }
}

#[async_trait]
impl SandboxInstance for ScriptedInstance {
    fn id(&self) -> &str {
        "scripted"
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn mount(&self, _tree: &FileTree) -> Result<(), HostError> {
        self.mounts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn spawn(&self, spec: SpawnSpec) -> Result<ProcessHandle, HostError> {
        let script = self.next_script(&spec);
        self.spawns.lock().unwrap().push(spec);
        let (handle, controls) = ProcessHandle::channel(Some(1000));

        match script {
            Script::Exit { lines, code } => {
                for line in lines {
                    let _ = controls.output.send(ProcessOutput {
                        stream: LogType::Stdout,
                        line,
                    });
                }
                let _ = controls.exit.send(code);
            }
            Script::Serve { port } => {
                let ready = ServerReady {
                    port,
                    url: format!("http://localhost:{}", port),
                };
                for waiter in self.ready_waiters.lock().unwrap().drain(..) {
                    let _ = waiter.send(ready.clone());
                }

                let (crash_tx, crash_rx) = oneshot::channel();
                self.crash_senders.lock().unwrap().push(crash_tx);
                let kills = self.kills.clone();
                let output = controls.output;
                let exit = controls.exit;
                let kill = controls.kill;
                tokio::spawn(async move {
                    let _output = output;
                    tokio::select! {
                        _ = kill => {
                            kills.fetch_add(1, Ordering::SeqCst);
                            let _ = exit.send(-1);
                        }
                        Ok(code) = crash_rx => {
                            let _ = exit.send(code);
                        }
                    }
                });
            }
        }

        Ok(handle)
    }

    fn on_server_ready(&self) -> oneshot::Receiver<ServerReady> {
        let (tx, rx) = oneshot::channel();
        self.ready_waiters.lock().unwrap().push(tx);
        rx
    }

    async fn file_exists(&self, path: &str) -> bool {
        path == "node_modules/vite/package.json" && self.critical_present.load(Ordering::SeqCst)
    }
}

pub struct ScriptedHost {
    pub instance: Arc<ScriptedInstance>,
    pub boots: AtomicUsize,
    pub environment: HostEnvironment,
}

impl ScriptedHost {
    pub fn new() -> Arc<Self> {
        Self::with_environment(HostEnvironment {
            secure_context: true,
            cross_origin_isolated: true,
        })
    }

    pub fn with_environment(environment: HostEnvironment) -> Arc<Self> {
        Arc::new(Self {
            instance: Arc::new(ScriptedInstance::new()),
            boots: AtomicUsize::new(0),
            environment,
        })
    }

    pub fn boots(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxHost for ScriptedHost {
    async fn boot(&self) -> Result<SandboxHandle, HostError> {
        self.boots.fetch_add(1, Ordering::SeqCst);
        Ok(SandboxHandle::new(self.instance.clone()))
    }

    fn current_instance(&self) -> Option<SandboxHandle> {
        None
    }

    fn environment(&self) -> HostEnvironment {
        self.environment
    }
}

/// Always serves the same manifest, optionally after a delay.
pub struct StaticSource {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub manifest: Value,
}

impl StaticSource {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            manifest: json!({
                "package.json": "{\"scripts\":{\"dev\":\"vite\"}}",
                "src": { "main.tsx": "console.log('hi')" }
            }),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactSource for StaticSource {
    async fn fetch_manifest(&self) -> ClientResult<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Some(self.manifest.clone()))
    }
}

pub struct Harness {
    pub host: Arc<ScriptedHost>,
    pub source: Arc<StaticSource>,
    pub orchestrator: ProcessOrchestrator,
}

pub fn harness_with(host: Arc<ScriptedHost>, source: Arc<StaticSource>) -> Harness {
    let runtime = SandboxRuntimeManager::with_registry(host.clone(), Arc::new(InstanceRegistry::new()));
    let fetcher = ArtifactFetcher::new(source.clone(), 3, Duration::from_millis(10));
    let orchestrator = ProcessOrchestrator::new(runtime, fetcher, PreviewSettings::default());
    Harness {
        host,
        source,
        orchestrator,
    }
}

pub fn harness() -> Harness {
    harness_with(ScriptedHost::new(), StaticSource::new())
}

/// Let spawned tasks observe kills and exits.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

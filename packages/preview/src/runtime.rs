// ABOUTME: Boots, reuses and recovers the single sandbox instance
// ABOUTME: Concurrent callers share one in-flight boot; singleton conflicts adopt the live instance

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::host::{HostErrorCode, SandboxHandle, SandboxHost};
use crate::registry::InstanceRegistry;
use crate::types::{PreviewError, PreviewResult};

type BootFuture = Shared<BoxFuture<'static, PreviewResult<SandboxHandle>>>;

#[derive(Clone)]
pub struct SandboxRuntimeManager {
    host: Arc<dyn SandboxHost>,
    registry: Arc<InstanceRegistry>,
    local: Arc<RwLock<Option<SandboxHandle>>>,
    boot_slot: Arc<Mutex<Option<BootFuture>>>,
}

impl SandboxRuntimeManager {
    /// Manager backed by the process-wide registry.
    pub fn new(host: Arc<dyn SandboxHost>) -> Self {
        Self::with_registry(host, InstanceRegistry::global())
    }

    pub fn with_registry(host: Arc<dyn SandboxHost>, registry: Arc<InstanceRegistry>) -> Self {
        Self {
            host,
            registry,
            local: Arc::new(RwLock::new(None)),
            boot_slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Fail unless the host reports a secure, cross-origin isolated context.
    pub fn check_environment(&self) -> PreviewResult<()> {
        let environment = self.host.environment();
        if !environment.secure_context {
            return Err(PreviewError::InsecureContext);
        }
        if !environment.cross_origin_isolated {
            return Err(PreviewError::IsolationPrecondition(
                "the host is not cross-origin isolated".to_string(),
            ));
        }
        Ok(())
    }

    /// The live handle, without booting.
    pub fn handle(&self) -> Option<SandboxHandle> {
        let local = self
            .local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|handle| handle.is_alive());
        local.or_else(|| self.registry.lookup())
    }

    /// Return the live handle, booting one if none exists.
    pub async fn ensure_boot(&self) -> PreviewResult<SandboxHandle> {
        if let Some(handle) = self.handle() {
            self.remember(&handle);
            return Ok(handle);
        }

        let boot = {
            let mut slot = self.boot_slot.lock().await;
            // Re-check under the lock: a boot may have just finished.
            if let Some(handle) = self.handle() {
                self.remember(&handle);
                return Ok(handle);
            }
            match slot.as_ref() {
                Some(in_flight) => in_flight.clone(),
                None => {
                    let boot = self.clone().boot().boxed().shared();
                    *slot = Some(boot.clone());
                    boot
                }
            }
        };

        let result = boot.clone().await;
        let mut slot = self.boot_slot.lock().await;
        // Another caller may already have replaced a failed boot with a retry
        if slot.as_ref().is_some_and(|in_flight| in_flight.ptr_eq(&boot)) {
            slot.take();
        }
        result
    }

    fn remember(&self, handle: &SandboxHandle) {
        *self.local.write().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
    }

    fn adopt(&self, handle: &SandboxHandle) {
        self.registry.adopt(handle);
        self.remember(handle);
    }

    async fn boot(self) -> PreviewResult<SandboxHandle> {
        info!("Booting sandbox instance");
        match self.host.boot().await {
            Ok(handle) => {
                info!("Sandbox instance {} booted", handle.id());
                self.adopt(&handle);
                Ok(handle)
            }
            Err(e) => match e.classify() {
                HostErrorCode::SingletonViolation => {
                    warn!("Sandbox boot refused, instance already running: {}", e);
                    match self.recover() {
                        Some(handle) => {
                            info!("Recovered existing sandbox instance {}", handle.id());
                            self.adopt(&handle);
                            Ok(handle)
                        }
                        None => {
                            error!("No live sandbox instance found to recover");
                            Err(PreviewError::SingletonConflict)
                        }
                    }
                }
                HostErrorCode::CrossOriginIsolation => {
                    Err(PreviewError::IsolationPrecondition(e.message))
                }
                HostErrorCode::Unknown => Err(PreviewError::Host(e.message)),
            },
        }
    }

    /// Host accessor, global, alternate global, module slot, local reference.
    fn recover(&self) -> Option<SandboxHandle> {
        self.host
            .current_instance()
            .filter(|handle| handle.is_alive())
            .or_else(|| self.registry.recover())
            .or_else(|| {
                self.local
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
                    .filter(|handle| handle.is_alive())
            })
    }
}

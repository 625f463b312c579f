// ABOUTME: Redundant storage slots for the one live sandbox handle
// ABOUTME: Every write mirrors to all slots so any recovery path finds the same instance

use once_cell::sync::Lazy;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::host::SandboxHandle;

/// Named slots a handle can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Owned by this crate's module state.
    Module,
    /// Process-wide; survives runtime manager re-creation.
    Global,
    /// Secondary process-wide slot consulted during recovery.
    AlternateGlobal,
}

#[derive(Default)]
pub struct InstanceRegistry {
    module: RwLock<Option<SandboxHandle>>,
    global: RwLock<Option<SandboxHandle>>,
    alternate_global: RwLock<Option<SandboxHandle>>,
}

static GLOBAL_REGISTRY: Lazy<Arc<InstanceRegistry>> =
    Lazy::new(|| Arc::new(InstanceRegistry::default()));

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<InstanceRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    fn cell(&self, slot: Slot) -> &RwLock<Option<SandboxHandle>> {
        match slot {
            Slot::Module => &self.module,
            Slot::Global => &self.global,
            Slot::AlternateGlobal => &self.alternate_global,
        }
    }

    /// Live handle stored in `slot`, if any.
    pub fn get(&self, slot: Slot) -> Option<SandboxHandle> {
        self.cell(slot)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|handle| handle.is_alive())
    }

    /// Store `handle` in every slot.
    pub fn adopt(&self, handle: &SandboxHandle) {
        for slot in [Slot::Module, Slot::Global, Slot::AlternateGlobal] {
            *self
                .cell(slot)
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
        }
        debug!("Adopted sandbox instance {} into all registry slots", handle.id());
    }

    /// Store a handle in a single slot, as a hot-reloaded module would find
    /// it. Regular code paths use `adopt`.
    pub fn seed(&self, slot: Slot, handle: &SandboxHandle) {
        *self
            .cell(slot)
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
    }

    /// Fast-path lookup: module slot, then global slot.
    pub fn lookup(&self) -> Option<SandboxHandle> {
        self.get(Slot::Module).or_else(|| self.get(Slot::Global))
    }

    /// Recovery lookup: global, alternate global, then module slot.
    pub fn recover(&self) -> Option<SandboxHandle> {
        self.get(Slot::Global)
            .or_else(|| self.get(Slot::AlternateGlobal))
            .or_else(|| self.get(Slot::Module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_tree::FileTree;
    use crate::host::{HostError, ProcessHandle, SandboxInstance, ServerReady, SpawnSpec};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;

    struct Stub {
        id: String,
        alive: AtomicBool,
    }

    #[async_trait]
    impl SandboxInstance for Stub {
        fn id(&self) -> &str {
            &self.id
        }
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
        async fn mount(&self, _tree: &FileTree) -> Result<(), HostError> {
            Ok(())
        }
        async fn spawn(&self, _spec: SpawnSpec) -> Result<ProcessHandle, HostError> {
            Err(HostError::unknown("not supported"))
        }
        fn on_server_ready(&self) -> oneshot::Receiver<ServerReady> {
            oneshot::channel().1
        }
        async fn file_exists(&self, _path: &str) -> bool {
            false
        }
    }

    fn stub(id: &str) -> (Arc<Stub>, SandboxHandle) {
        let stub = Arc::new(Stub {
            id: id.to_string(),
            alive: AtomicBool::new(true),
        });
        let handle = SandboxHandle::new(stub.clone());
        (stub, handle)
    }

    #[test]
    fn test_adopt_mirrors_every_slot() {
        let registry = InstanceRegistry::new();
        let (_, handle) = stub("a");
        registry.adopt(&handle);

        for slot in [Slot::Module, Slot::Global, Slot::AlternateGlobal] {
            assert!(registry.get(slot).unwrap().ptr_eq(&handle));
        }
    }

    #[test]
    fn test_recover_order_prefers_global() {
        let registry = InstanceRegistry::new();
        let (_, module) = stub("module");
        let (_, alternate) = stub("alternate");
        registry.seed(Slot::Module, &module);
        registry.seed(Slot::AlternateGlobal, &alternate);

        assert_eq!(registry.recover().unwrap().id(), "alternate");
        assert_eq!(registry.lookup().unwrap().id(), "module");
    }

    #[test]
    fn test_dead_handles_are_invisible() {
        let registry = InstanceRegistry::new();
        let (instance, handle) = stub("gone");
        registry.adopt(&handle);
        instance.alive.store(false, Ordering::SeqCst);

        assert!(registry.lookup().is_none());
        assert!(registry.recover().is_none());
    }
}

//! Loaded-component registry.
//!
//! Keeps every loaded interface with its kind and profile role so the
//! machine can wire components up and broadcast lifecycle calls. Init and
//! reset run in registration order, shutdown in reverse.

use log::{debug, info};

use crate::component::{ComponentHandle, ComponentId, ComponentKind};
use crate::error::{CoreError, Result};

/// One registered component.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Declared kind
    pub kind: ComponentKind,
    /// Role tag from the machine profile ("cpu", "video", "mfp", ...)
    pub role: String,
    /// Interface handle
    pub handle: ComponentHandle,
}

/// Registry of loaded components.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    entries: Vec<RegistryEntry>,
}

impl ComponentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handle` under `kind` and `role`. Roles are unique.
    pub fn register(
        &mut self,
        kind: ComponentKind,
        role: impl Into<String>,
        handle: ComponentHandle,
    ) -> Result<()> {
        let role = role.into();
        if handle.id().is_null() {
            return Err(CoreError::InvalidArgument("null component handle".into()));
        }
        if handle.kind() != kind {
            return Err(CoreError::InvalidArgument(format!(
                "role '{}': component is {}, registered as {}",
                role,
                handle.kind(),
                kind
            )));
        }
        if self.by_role(&role).is_some() {
            return Err(CoreError::InvalidArgument(format!(
                "role '{role}' already registered"
            )));
        }
        if self.entries.iter().any(|e| e.handle.id() == handle.id()) {
            return Err(CoreError::InvalidArgument(format!(
                "component {} already registered",
                handle.id()
            )));
        }
        debug!("registry: {} as '{}' ({})", handle.id(), role, kind);
        self.entries.push(RegistryEntry { kind, role, handle });
        Ok(())
    }

    /// Remove the entry for `id`.
    pub fn remove(&mut self, id: ComponentId) -> Result<RegistryEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.handle.id() == id)
            .ok_or_else(|| CoreError::NotFound(format!("component {id} is not registered")))?;
        Ok(self.entries.remove(index))
    }

    /// Every component of `kind`, in registration order.
    pub fn by_kind(&self, kind: ComponentKind) -> impl Iterator<Item = &ComponentHandle> {
        self.entries
            .iter()
            .filter(move |e| e.kind == kind)
            .map(|e| &e.handle)
    }

    /// Component registered under `role`.
    pub fn by_role(&self, role: &str) -> Option<&ComponentHandle> {
        self.entries
            .iter()
            .find(|e| e.role == role)
            .map(|e| &e.handle)
    }

    /// All entries in registration order.
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Initialize every component; stops at the first failure.
    pub fn init_all(&self) -> Result<()> {
        for entry in &self.entries {
            entry.handle.init().map_err(|e| {
                CoreError::InvalidState(format!("init of '{}' failed: {}", entry.role, e))
            })?;
        }
        info!("registry: {} components initialized", self.entries.len());
        Ok(())
    }

    /// Reset every component.
    pub fn reset_all(&self) {
        for entry in &self.entries {
            entry.handle.reset();
        }
    }

    /// Shut down every initialized component, last registered first.
    pub fn shutdown_all(&self) {
        for entry in self.entries.iter().rev() {
            entry.handle.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::IoDevice;
    use crate::component::{
        Component, ComponentInterface, IoComponent, MappedComponent, PeripheralClock,
    };
    use parking_lot::Mutex;
    use std::ops::RangeInclusive;
    use std::sync::Arc;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_init: bool,
    }

    impl IoDevice for Recorder {}

    impl Component for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn init(&mut self) -> Result<()> {
            if self.fail_init {
                return Err(CoreError::InvalidState("refused".into()));
            }
            self.log.lock().push(format!("init {}", self.name));
            Ok(())
        }

        fn reset(&mut self) {
            self.log.lock().push(format!("reset {}", self.name));
        }

        fn shutdown(&mut self) {
            self.log.lock().push(format!("shutdown {}", self.name));
        }
    }

    impl MappedComponent for Recorder {
        fn io_range(&self) -> Option<RangeInclusive<u32>> {
            None
        }

        fn io(&mut self) -> &mut dyn IoDevice {
            self
        }
    }

    impl PeripheralClock for Recorder {
        fn clock(&mut self, _cycles: u32) {}

        fn irq_pending(&self) -> bool {
            false
        }

        fn irq_vector(&self) -> u8 {
            0
        }
    }

    impl IoComponent for Recorder {
        fn acknowledge(&mut self, _vector: u8) {}
    }

    fn handle(id: u32, name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> ComponentHandle {
        ComponentHandle::new(
            ComponentId(id),
            ComponentInterface::io(Recorder {
                name,
                log: log.clone(),
                fail_init: false,
            }),
        )
    }

    #[test]
    fn lifecycle_broadcast_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ComponentRegistry::new();
        registry
            .register(ComponentKind::Io, "mfp", handle(1, "a", &log))
            .unwrap();
        registry
            .register(ComponentKind::Io, "acia", handle(2, "b", &log))
            .unwrap();

        registry.init_all().unwrap();
        registry.reset_all();
        registry.shutdown_all();

        assert_eq!(
            *log.lock(),
            vec![
                "init a",
                "init b",
                "reset a",
                "reset b",
                "shutdown b",
                "shutdown a"
            ]
        );
    }

    #[test]
    fn lookups_and_validation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ComponentRegistry::new();
        registry
            .register(ComponentKind::Io, "mfp", handle(1, "a", &log))
            .unwrap();

        assert!(registry
            .register(ComponentKind::Video, "video", handle(2, "b", &log))
            .is_err());
        assert!(registry
            .register(ComponentKind::Io, "mfp", handle(3, "c", &log))
            .is_err());
        assert!(registry
            .register(ComponentKind::Io, "other", handle(0, "d", &log))
            .is_err());

        assert_eq!(registry.by_kind(ComponentKind::Io).count(), 1);
        assert_eq!(registry.by_role("mfp").map(|h| h.id()), Some(ComponentId(1)));
        assert!(registry.by_role("video").is_none());

        registry.remove(ComponentId(1)).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.remove(ComponentId(1)),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn failed_init_is_reported() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ComponentRegistry::new();
        let bad = ComponentHandle::new(
            ComponentId(9),
            ComponentInterface::io(Recorder {
                name: "bad",
                log: log.clone(),
                fail_init: true,
            }),
        );
        registry.register(ComponentKind::Io, "bad", bad.clone()).unwrap();
        assert!(matches!(registry.init_all(), Err(CoreError::InvalidState(_))));
        assert!(!bad.is_initialized());
        registry.shutdown_all();
        assert!(log.lock().is_empty());
    }
}

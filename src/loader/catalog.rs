//! Catalog of chip cores compiled into the host.
//!
//! A module's entry symbol names one catalog entry; the entry's factory
//! plays the role of the module entry function and returns the interface.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;

use super::ModuleImage;
use crate::component::{ComponentInterface, ComponentKind};
use crate::error::{CoreError, Result};

/// Factory invoked with the relocated image. `None` is a null interface.
pub type CoreFactory = Box<dyn Fn(&ModuleImage<'_>) -> Option<ComponentInterface> + Send + Sync>;

/// A published core.
pub struct CoreEntry {
    name: String,
    kind: ComponentKind,
    description: String,
    factory: CoreFactory,
}

impl CoreEntry {
    /// Entry symbol name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of interface the factory returns.
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// One-line description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Invoke the factory.
    pub fn instantiate(&self, image: &ModuleImage<'_>) -> Option<ComponentInterface> {
        (self.factory)(image)
    }
}

impl fmt::Debug for CoreEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("description", &self.description)
            .finish()
    }
}

/// Name -> factory table.
#[derive(Debug, Default)]
pub struct CoreCatalog {
    entries: BTreeMap<String, CoreEntry>,
}

impl CoreCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every built-in core registered.
    pub fn with_builtin_cores() -> Self {
        let mut catalog = Self::new();
        crate::cores::register_builtin(&mut catalog);
        catalog
    }

    /// Publish a core. Names are unique.
    pub fn register<F>(
        &mut self,
        name: &str,
        kind: ComponentKind,
        description: &str,
        factory: F,
    ) -> Result<()>
    where
        F: Fn(&ModuleImage<'_>) -> Option<ComponentInterface> + Send + Sync + 'static,
    {
        if self.entries.contains_key(name) {
            return Err(CoreError::InvalidArgument(format!(
                "core '{name}' already registered"
            )));
        }
        debug!("catalog: {} ({})", name, kind);
        self.entries.insert(
            name.to_string(),
            CoreEntry {
                name: name.to_string(),
                kind,
                description: description.to_string(),
                factory: Box::new(factory),
            },
        );
        Ok(())
    }

    /// Look up a core by entry name.
    pub fn get(&self, name: &str) -> Option<&CoreEntry> {
        self.entries.get(name)
    }

    /// All entries, sorted by name.
    pub fn entries(&self) -> impl Iterator<Item = &CoreEntry> {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_rejected() {
        let mut catalog = CoreCatalog::new();
        catalog
            .register("null", ComponentKind::Io, "returns nothing", |_| None)
            .unwrap();
        assert!(catalog
            .register("null", ComponentKind::Io, "again", |_| None)
            .is_err());
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("null").map(|e| e.kind()), Some(ComponentKind::Io));
    }

    #[test]
    fn builtin_catalog_lists_chipset() {
        let catalog = CoreCatalog::with_builtin_cores();
        let names: Vec<&str> = catalog.entries().map(|e| e.name()).collect();
        for expected in ["mc68000", "mfp68901", "shifter", "ym2149", "st-chipset"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }
}

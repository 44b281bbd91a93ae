//! Component loader.
//!
//! Reads an EBIN module, validates it, lays code/data/bss out in one
//! region, relocates it, synchronises caches and resolves the entry point
//! to a core from the [`CoreCatalog`]. Every loaded module is tracked until
//! [`Loader::unload`]; a failure at any step releases what was allocated.

pub mod catalog;
pub mod format;
pub mod memory;
pub mod reloc;

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

pub use catalog::{CoreCatalog, CoreEntry, CoreFactory};
pub use format::{
    InterfaceVersion, ModuleBuilder, ModuleFlags, ModuleHeader, RelocEntry, Symbol, HEADER_SIZE,
    MAGIC,
};
pub use memory::{HeapRegionAllocator, Region, RegionAllocator, RegionKind};
pub use reloc::{apply_relocations, RelocKind};

use crate::component::{ComponentHandle, ComponentId, ComponentKind};
use crate::error::{CoreError, Result};

/// View of a relocated module handed to a core factory.
#[derive(Debug, Clone, Copy)]
pub struct ModuleImage<'a> {
    header: &'a ModuleHeader,
    region: &'a Region,
    symbols: &'a [Symbol],
    path: &'a Path,
}

impl<'a> ModuleImage<'a> {
    /// Header.
    pub fn header(&self) -> &'a ModuleHeader {
        self.header
    }

    /// Load address of the code section.
    pub fn load_address(&self) -> u32 {
        self.region.base()
    }

    /// Code section.
    pub fn code(&self) -> &'a [u8] {
        &self.region.bytes()[..self.header.code_size as usize]
    }

    /// Data section.
    pub fn data(&self) -> &'a [u8] {
        let start = self.header.code_size as usize;
        &self.region.bytes()[start..start + self.header.data_size as usize]
    }

    /// Zero-initialized section.
    pub fn bss(&self) -> &'a [u8] {
        let start = self.header.code_size as usize + self.header.data_size as usize;
        &self.region.bytes()[start..start + self.header.bss_size as usize]
    }

    /// Symbol by name.
    pub fn symbol(&self, name: &str) -> Option<&'a Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Source path.
    pub fn path(&self) -> &'a Path {
        self.path
    }
}

/// Bookkeeping for one loaded module.
#[derive(Debug)]
pub struct LoadedModule {
    header: ModuleHeader,
    region: Region,
    symbols: Vec<Symbol>,
    entry: String,
    path: PathBuf,
    handle: ComponentHandle,
}

impl LoadedModule {
    /// Header copy.
    pub fn header(&self) -> &ModuleHeader {
        &self.header
    }

    /// Base of the code section.
    pub fn code_base(&self) -> u32 {
        self.region.base()
    }

    /// Base of the data section.
    pub fn data_base(&self) -> u32 {
        self.region.base() + self.header.code_size
    }

    /// Base of the bss section.
    pub fn bss_base(&self) -> u32 {
        self.data_base() + self.header.data_size
    }

    /// Region holding the image.
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Entry symbol that selected the core.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Symbols.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Source path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Interface handle.
    pub fn handle(&self) -> &ComponentHandle {
        &self.handle
    }
}

/// Module loader.
pub struct Loader {
    catalog: CoreCatalog,
    allocator: Box<dyn RegionAllocator>,
    required: InterfaceVersion,
    modules: Vec<LoadedModule>,
    next_id: u32,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new(
            CoreCatalog::with_builtin_cores(),
            Box::new(HeapRegionAllocator::default()),
        )
    }
}

impl Loader {
    /// Loader over `catalog` using `allocator` for module memory.
    pub fn new(catalog: CoreCatalog, allocator: Box<dyn RegionAllocator>) -> Self {
        Self {
            catalog,
            allocator,
            required: InterfaceVersion::CURRENT,
            modules: Vec::new(),
            next_id: 1,
        }
    }

    /// Require a different interface version from loaded images.
    pub fn with_required_version(mut self, version: InterfaceVersion) -> Self {
        self.required = version;
        self
    }

    /// Interface version images must satisfy.
    pub fn required_version(&self) -> InterfaceVersion {
        self.required
    }

    /// Core catalog.
    pub fn catalog(&self) -> &CoreCatalog {
        &self.catalog
    }

    /// Mutable core catalog.
    pub fn catalog_mut(&mut self) -> &mut CoreCatalog {
        &mut self.catalog
    }

    /// Load the module at `path`, which must declare `expected` kind.
    pub fn load(&mut self, path: impl AsRef<Path>, expected: ComponentKind) -> Result<ComponentHandle> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::NotFound(format!("module file {}", path.display()))
            } else {
                CoreError::Io(e)
            }
        })?;
        self.load_bytes(path, &bytes, expected)
    }

    /// Load a module image already in memory; `path` names it in logs and
    /// serves as the entry-name fallback.
    pub fn load_bytes(
        &mut self,
        path: &Path,
        bytes: &[u8],
        expected: ComponentKind,
    ) -> Result<ComponentHandle> {
        let header = ModuleHeader::parse(bytes)?;
        header.validate(bytes.len())?;

        let kind = header
            .component_kind()
            .ok_or_else(|| CoreError::InvalidArgument(format!("bad kind {}", header.kind)))?;
        if kind != expected {
            return Err(CoreError::InvalidArgument(format!(
                "{}: module is a {} component, expected {}",
                path.display(),
                kind,
                expected
            )));
        }

        let provided = header.interface();
        if !provided.satisfies(self.required) {
            return Err(CoreError::VersionIncompatible {
                required: self.required.packed(),
                provided: provided.packed(),
            });
        }
        if header.flags().contains(ModuleFlags::COMPRESSED) {
            return Err(CoreError::Unsupported(format!(
                "{}: compressed modules",
                path.display()
            )));
        }

        let relocations = format::parse_relocations(bytes, &header)?;
        let symbols = format::parse_symbols(bytes, &header)?;

        if header.min_memory as usize > self.allocator.available() {
            return Err(CoreError::ResourceExhausted(format!(
                "{}: needs {} bytes of working memory, {} available",
                path.display(),
                header.min_memory,
                self.allocator.available()
            )));
        }

        let mut region = self
            .allocator
            .allocate(header.allocation_size(), RegionKind::Executable)?;
        if region.kind() != RegionKind::Executable {
            self.allocator.free(region);
            return Err(CoreError::Unsupported(format!(
                "{}: no executable memory available; module would not be runnable",
                path.display()
            )));
        }

        match self.populate(path, bytes, &header, &relocations, &symbols, &mut region) {
            Ok((entry, handle)) => {
                info!(
                    "loaded {} as {} ({}) at 0x{:08X}, {} bytes, {} relocations",
                    path.display(),
                    handle.id(),
                    entry,
                    region.base(),
                    region.len(),
                    relocations.len()
                );
                self.modules.push(LoadedModule {
                    header,
                    region,
                    symbols,
                    entry,
                    path: path.to_path_buf(),
                    handle: handle.clone(),
                });
                Ok(handle)
            }
            Err(e) => {
                warn!("load of {} failed: {}", path.display(), e);
                self.allocator.free(region);
                Err(e)
            }
        }
    }

    /// Copy, relocate, sync and instantiate. The caller frees `region` on error.
    fn populate(
        &mut self,
        path: &Path,
        bytes: &[u8],
        header: &ModuleHeader,
        relocations: &[RelocEntry],
        symbols: &[Symbol],
        region: &mut Region,
    ) -> Result<(String, ComponentHandle)> {
        let code_len = header.code_size as usize;
        let data_len = header.data_size as usize;
        let code_src = &bytes[header.code_offset as usize..][..code_len];
        let data_src = &bytes[header.data_offset as usize..][..data_len];
        let load_address = region.base();

        {
            let buf = region.bytes_mut();
            buf[..code_len].copy_from_slice(code_src);
            buf[code_len..code_len + data_len].copy_from_slice(data_src);
            buf[code_len + data_len..].fill(0);
            let (code, rest) = buf.split_at_mut(code_len);
            let data = &mut rest[..data_len];
            apply_relocations(code, data, relocations, load_address)?;
        }
        region.sync_caches();

        let entry = symbols
            .iter()
            .find(|s| s.section == format::SECTION_CODE && s.offset == header.entry_offset)
            .map(|s| s.name.clone())
            .or_else(|| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .ok_or_else(|| {
                CoreError::InvalidArgument(format!("{}: no entry symbol", path.display()))
            })?;
        debug!("{}: entry '{}' at +0x{:X}", path.display(), entry, header.entry_offset);

        let core = self
            .catalog
            .get(&entry)
            .ok_or_else(|| CoreError::NotFound(format!("no core named '{entry}'")))?;

        if !region.is_synced() {
            return Err(CoreError::InvalidState(
                "module memory modified after cache sync".into(),
            ));
        }
        let image = ModuleImage {
            header,
            region,
            symbols,
            path,
        };
        let interface = core.instantiate(&image).ok_or_else(|| {
            CoreError::InvalidState(format!("entry '{entry}' returned a null interface"))
        })?;

        let expected = header.component_kind();
        if Some(interface.kind()) != expected {
            return Err(CoreError::InvalidArgument(format!(
                "entry '{}' produced a {} interface for a {} module",
                entry,
                interface.kind(),
                header.kind
            )));
        }

        let id = ComponentId(self.next_id);
        self.next_id += 1;
        Ok((entry, ComponentHandle::new(id, interface)))
    }

    /// Shut down and release the module behind `id`.
    pub fn unload(&mut self, id: ComponentId) -> Result<()> {
        if id.is_null() {
            return Err(CoreError::InvalidArgument("null component handle".into()));
        }
        let index = self
            .modules
            .iter()
            .position(|m| m.handle.id() == id)
            .ok_or_else(|| CoreError::NotFound(format!("component {id} is not loaded")))?;
        let module = self.modules.remove(index);
        module.handle.shutdown();
        info!("unloaded {} ({})", module.path.display(), id);
        self.allocator.free(module.region);
        Ok(())
    }

    /// Unload everything, most recent first.
    pub fn unload_all(&mut self) {
        while let Some(module) = self.modules.pop() {
            module.handle.shutdown();
            debug!("unloaded {} ({})", module.path.display(), module.handle.id());
            self.allocator.free(module.region);
        }
    }

    /// Loaded modules in load order.
    pub fn loaded(&self) -> impl Iterator<Item = &LoadedModule> {
        self.modules.iter()
    }

    /// Module record for `id`.
    pub fn get(&self, id: ComponentId) -> Option<&LoadedModule> {
        self.modules.iter().find(|m| m.handle.id() == id)
    }

    /// Bytes left in executable memory.
    pub fn available_memory(&self) -> usize {
        self.allocator.available()
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.unload_all();
    }
}

//! EBIN modules written to disk and loaded back through the catalog.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use st_core::cores::Mfp68901;
use st_core::loader::format::{SECTION_CODE, SECTION_DATA};
use st_core::loader::{
    CoreCatalog, HeapRegionAllocator, InterfaceVersion, Loader, ModuleBuilder, RelocKind,
};
use st_core::{ComponentInterface, ComponentKind, CoreError};

fn write(dir: &Path, name: &str, image: &[u8]) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, image)?;
    Ok(path)
}

#[test]
fn relocates_copies_sections_and_zeroes_bss() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut code = vec![0u8; 8];
    code[0..4].copy_from_slice(&0x10u32.to_le_bytes());
    let image = ModuleBuilder::new(ComponentKind::Io)
        .code(code)
        .data(vec![0x34, 0x12, 0xAA, 0xBB])
        .bss(16)
        .entry("mfp68901", 4)
        .symbol("table", SECTION_DATA, 0)
        .relocation(0, RelocKind::Absolute as u8, SECTION_CODE)
        .relocation(0, RelocKind::Low16 as u8, SECTION_DATA)
        .build()?;
    let path = write(dir.path(), "timers.ebin", &image)?;

    let mut loader = Loader::default();
    let before = loader.available_memory();
    let handle = loader.load(&path, ComponentKind::Io)?;
    assert_eq!(handle.kind(), ComponentKind::Io);
    assert_eq!(handle.name(), "mfp68901");

    let module = loader.get(handle.id()).expect("module record");
    let base = module.code_base();
    let bytes = module.region().bytes();
    assert_eq!(module.entry(), "mfp68901");
    assert_eq!(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 0x10 + base);
    assert_eq!(
        u16::from_le_bytes([bytes[8], bytes[9]]),
        0x1234u16.wrapping_add(base as u16)
    );
    assert_eq!(&bytes[10..12], &[0xAA, 0xBB]);
    assert_eq!(module.data_base(), base + 8);
    assert_eq!(module.bss_base(), base + 12);
    assert!(bytes[12..28].iter().all(|&b| b == 0));
    assert!(module.symbols().iter().any(|s| s.name == "table"));
    assert!(loader.available_memory() < before);

    loader.unload(handle.id())?;
    assert_eq!(loader.available_memory(), before);
    assert!(loader.get(handle.id()).is_none());
    assert!(matches!(loader.unload(handle.id()), Err(CoreError::NotFound(_))));
    Ok(())
}

#[test]
fn entry_name_falls_back_to_file_stem() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let image = ModuleBuilder::new(ComponentKind::Audio)
        .code(vec![0x4E, 0x75])
        .data(22_050u32.to_le_bytes().to_vec())
        .build()?;
    let path = write(dir.path(), "ym2149.ebin", &image)?;

    let mut loader = Loader::default();
    let handle = loader.load(&path, ComponentKind::Audio)?;
    assert_eq!(handle.name(), "ym2149");
    assert!(matches!(handle.interface(), ComponentInterface::Audio(_)));
    Ok(())
}

#[test]
fn rejected_modules_leave_no_allocation_behind() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut loader = Loader::default();
    let before = loader.available_memory();

    let io = ModuleBuilder::new(ComponentKind::Io)
        .code(vec![0u8; 4])
        .entry("mfp68901", 0)
        .build()?;
    let path = write(dir.path(), "mfp.ebin", &io)?;
    assert!(matches!(
        loader.load(&path, ComponentKind::Video),
        Err(CoreError::InvalidArgument(_))
    ));

    let unknown = ModuleBuilder::new(ComponentKind::Io)
        .code(vec![0u8; 4])
        .entry("no-such-core", 0)
        .build()?;
    let path = write(dir.path(), "unknown.ebin", &unknown)?;
    assert!(matches!(
        loader.load(&path, ComponentKind::Io),
        Err(CoreError::NotFound(_))
    ));

    // relocation past the end of the code section
    let broken = ModuleBuilder::new(ComponentKind::Io)
        .code(vec![0u8; 4])
        .entry("mfp68901", 0)
        .relocation(2, RelocKind::Absolute as u8, SECTION_CODE)
        .build()?;
    let path = write(dir.path(), "broken.ebin", &broken)?;
    assert!(matches!(
        loader.load(&path, ComponentKind::Io),
        Err(CoreError::Relocation { failed: 1, total: 1 })
    ));

    assert!(matches!(
        loader.load(dir.path().join("absent.ebin"), ComponentKind::Io),
        Err(CoreError::NotFound(_))
    ));
    assert_eq!(loader.available_memory(), before);
    assert_eq!(loader.loaded().count(), 0);
    Ok(())
}

#[test]
fn truncated_and_corrupt_images_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let image = ModuleBuilder::new(ComponentKind::Io)
        .code(vec![0u8; 32])
        .entry("mfp68901", 0)
        .build()?;
    let mut loader = Loader::default();

    let path = write(dir.path(), "short.ebin", &image[..image.len() - 8])?;
    assert!(loader.load(&path, ComponentKind::Io).is_err());

    let mut bad_magic = image.clone();
    bad_magic[0] ^= 0xFF;
    let path = write(dir.path(), "magic.ebin", &bad_magic)?;
    assert!(loader.load(&path, ComponentKind::Io).is_err());

    let path = write(dir.path(), "header.ebin", &image[..10])?;
    assert!(loader.load(&path, ComponentKind::Io).is_err());
    Ok(())
}

#[test]
fn interface_version_gate() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let image = ModuleBuilder::new(ComponentKind::Io)
        .code(vec![0u8; 4])
        .entry("mfp68901", 0)
        .interface_version(InterfaceVersion::new(1, 0))
        .build()?;
    let path = write(dir.path(), "mfp.ebin", &image)?;

    let mut strict = Loader::default().with_required_version(InterfaceVersion::new(1, 1));
    assert!(matches!(
        strict.load(&path, ComponentKind::Io),
        Err(CoreError::VersionIncompatible { .. })
    ));

    let mut loader = Loader::default();
    loader.load(&path, ComponentKind::Io)?;
    Ok(())
}

#[test]
fn custom_catalog_sees_relocated_image() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let seen = Arc::new(AtomicU32::new(0));
    let mut catalog = CoreCatalog::new();
    let probe = seen.clone();
    catalog.register("probe", ComponentKind::Io, "records its load address", move |image| {
        probe.store(image.load_address(), Ordering::SeqCst);
        Some(ComponentInterface::io(Mfp68901::new()))
    })?;
    catalog.register("null", ComponentKind::Io, "returns nothing", |_| None)?;

    let mut loader = Loader::new(catalog, Box::new(HeapRegionAllocator::default()));
    let image = ModuleBuilder::new(ComponentKind::Io)
        .code(vec![0u8; 4])
        .entry("probe", 0)
        .build()?;
    let handle = loader.load(write(dir.path(), "probe.ebin", &image)?, ComponentKind::Io)?;
    let base = loader.get(handle.id()).map(|m| m.code_base());
    assert_eq!(Some(seen.load(Ordering::SeqCst)), base);

    let null = ModuleBuilder::new(ComponentKind::Io)
        .code(vec![0u8; 4])
        .entry("null", 0)
        .build()?;
    assert!(matches!(
        loader.load(write(dir.path(), "null.ebin", &null)?, ComponentKind::Io),
        Err(CoreError::InvalidState(_))
    ));
    Ok(())
}

#[test]
fn general_memory_fallback_is_refused() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let image = ModuleBuilder::new(ComponentKind::Io)
        .code(vec![0u8; 64])
        .entry("mfp68901", 0)
        .build()?;
    let path = write(dir.path(), "big.ebin", &image)?;

    let mut loader = Loader::new(
        CoreCatalog::with_builtin_cores(),
        Box::new(HeapRegionAllocator::new(16, 4096)),
    );
    assert!(matches!(
        loader.load(&path, ComponentKind::Io),
        Err(CoreError::Unsupported(_))
    ));
    assert_eq!(loader.available_memory(), 16);
    Ok(())
}

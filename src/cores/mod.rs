//! Built-in chip cores.
//!
//! Each core is published in the [`CoreCatalog`] under the entry symbol a
//! module names. A module's data section may carry core configuration; the
//! PSG reads its output sample rate from the first little-endian word.

pub mod chipset;
pub mod mfp;
pub mod psg;
pub mod shifter;

pub use chipset::st_chipset;
pub use mfp::Mfp68901;
pub use psg::Ym2149;
pub use shifter::Shifter;

use log::warn;

use crate::component::{AudioComponent, ComponentInterface, ComponentKind};
use crate::cpu::Cpu68000;
use crate::loader::{CoreCatalog, ModuleImage};

/// Sample rate stored at the start of a module's data section, if any.
fn configured_sample_rate(image: &ModuleImage<'_>) -> Option<u32> {
    let data = image.data();
    if data.len() < 4 {
        return None;
    }
    let rate = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if rate == 0 {
        warn!("{}: zero sample rate in data section ignored", image.path().display());
        return None;
    }
    Some(rate)
}

/// Publish every built-in core.
pub fn register_builtin(catalog: &mut CoreCatalog) {
    let builtins: [(&str, ComponentKind, &str); 5] = [
        ("mc68000", ComponentKind::Cpu, "Motorola 68000 CPU"),
        ("mfp68901", ComponentKind::Io, "MC68901 multi-function peripheral"),
        ("shifter", ComponentKind::Video, "ST video shifter"),
        ("ym2149", ComponentKind::Audio, "YM2149 sound generator"),
        (chipset::CHIPSET_NAME, ComponentKind::System, "complete ST chipset"),
    ];
    for (name, kind, description) in builtins {
        let result = catalog.register(name, kind, description, move |image| {
            Some(match kind {
                ComponentKind::Cpu => ComponentInterface::cpu(Cpu68000::new()),
                ComponentKind::Io => ComponentInterface::io(Mfp68901::new()),
                ComponentKind::Video => ComponentInterface::video(Shifter::new()),
                ComponentKind::Audio => {
                    let mut psg = Ym2149::new();
                    if let Some(rate) = configured_sample_rate(image) {
                        psg.set_sample_rate(rate);
                    }
                    ComponentInterface::audio(psg)
                }
                ComponentKind::System => {
                    ComponentInterface::System(st_chipset(configured_sample_rate(image)))
                }
            })
        });
        if let Err(e) = result {
            warn!("built-in core {name} not registered: {e}");
        }
    }
}

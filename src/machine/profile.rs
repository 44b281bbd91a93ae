//! Declarative machine profile.
//!
//! A JSON document naming the module file for each slot plus memory sizing:
//!
//! ```json
//! {
//!   "name": "st-1040",
//!   "video_standard": "pal",
//!   "memory": { "ram_bytes": 1048576, "rom": "tos102.img", "rom_required": false },
//!   "cpu":   { "module": "cores/mc68000.ebin" },
//!   "video": { "module": "cores/shifter.ebin" },
//!   "audio": [{ "module": "cores/ym2149.ebin", "role": "psg" }],
//!   "io":    [{ "module": "cores/mfp68901.ebin", "role": "mfp" }]
//! }
//! ```
//!
//! Relative paths are resolved against the profile's directory when the
//! profile is read with [`MachineProfile::from_path`].

use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::bus::MAX_RAM_SIZE;
use crate::error::{CoreError, Result};
use crate::glue::VideoStandard;

/// 8 MHz ST CPU clock.
pub const DEFAULT_CPU_CLOCK_HZ: u32 = 8_000_000;

/// Default RAM size (1 MiB).
pub const DEFAULT_RAM_BYTES: usize = 1024 * 1024;

/// Default audio output rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

fn default_cpu_clock() -> u32 {
    DEFAULT_CPU_CLOCK_HZ
}

fn default_ram() -> usize {
    DEFAULT_RAM_BYTES
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

/// Memory sizing and images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// RAM size in bytes
    #[serde(default = "default_ram")]
    pub ram_bytes: usize,
    /// TOS ROM image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rom: Option<PathBuf>,
    /// Fail if the ROM image is missing
    #[serde(default)]
    pub rom_required: bool,
    /// Cartridge image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cartridge: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ram_bytes: DEFAULT_RAM_BYTES,
            rom: None,
            rom_required: false,
            cartridge: None,
        }
    }
}

/// One component slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Module file
    pub module: PathBuf,
    /// Role tag; defaults to the slot kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Clock override in Hz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_hz: Option<u32>,
    /// Skip the slot if the module file is missing
    #[serde(default)]
    pub optional: bool,
}

impl SlotConfig {
    /// Required slot for `module`.
    pub fn new(module: impl Into<PathBuf>) -> Self {
        Self {
            module: module.into(),
            role: None,
            clock_hz: None,
            optional: false,
        }
    }

    /// Set the role tag.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Mark the slot optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Role tag, or `fallback` if none was given.
    pub fn role_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.role.as_deref().unwrap_or(fallback)
    }
}

/// Machine description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineProfile {
    /// Display name
    pub name: String,
    /// Television standard
    #[serde(default)]
    pub video_standard: VideoStandard,
    /// CPU clock in Hz
    #[serde(default = "default_cpu_clock")]
    pub cpu_clock_hz: u32,
    /// Audio output rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Memory sizing
    #[serde(default)]
    pub memory: MemoryConfig,
    /// CPU slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<SlotConfig>,
    /// Video slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<SlotConfig>,
    /// Audio slots
    #[serde(default)]
    pub audio: Vec<SlotConfig>,
    /// I/O slots; the first one is the interrupt controller
    #[serde(default)]
    pub io: Vec<SlotConfig>,
    /// Unified chipset slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SlotConfig>,
}

impl MachineProfile {
    /// Profile with no slots and default sizing.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            video_standard: VideoStandard::default(),
            cpu_clock_hz: DEFAULT_CPU_CLOCK_HZ,
            sample_rate: DEFAULT_SAMPLE_RATE,
            memory: MemoryConfig::default(),
            cpu: None,
            video: None,
            audio: Vec::new(),
            io: Vec::new(),
            system: None,
        }
    }

    /// Parse and validate a JSON profile.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let profile: MachineProfile = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Read a JSON profile; relative paths resolve against its directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::NotFound(format!("profile {}", path.display()))
            } else {
                CoreError::Io(e)
            }
        })?;
        let mut profile = Self::from_json_str(&json)?;
        if let Some(dir) = path.parent() {
            profile.resolve_paths(dir);
        }
        info!("profile '{}' loaded from {}", profile.name, path.display());
        Ok(profile)
    }

    /// Serialize to pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Make every relative path absolute under `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(rom) = self.memory.rom.as_mut() {
            fix(rom);
        }
        if let Some(cart) = self.memory.cartridge.as_mut() {
            fix(cart);
        }
        for slot in self.slots_mut() {
            fix(&mut slot.module);
        }
    }

    fn slots_mut(&mut self) -> impl Iterator<Item = &mut SlotConfig> {
        self.cpu
            .iter_mut()
            .chain(self.video.iter_mut())
            .chain(self.audio.iter_mut())
            .chain(self.io.iter_mut())
            .chain(self.system.iter_mut())
    }

    /// Check sizing and slot layout.
    pub fn validate(&self) -> Result<()> {
        let ram = self.memory.ram_bytes;
        if ram == 0 || ram % 2 != 0 || ram > MAX_RAM_SIZE {
            return Err(CoreError::InvalidSize {
                what: "profile RAM",
                expected: MAX_RAM_SIZE,
                actual: ram,
            });
        }
        if self.cpu_clock_hz == 0 {
            return Err(CoreError::InvalidArgument("cpu_clock_hz must be non-zero".into()));
        }
        if self.sample_rate == 0 {
            return Err(CoreError::InvalidArgument("sample_rate must be non-zero".into()));
        }
        let slots = self
            .cpu
            .iter()
            .chain(self.video.iter())
            .chain(self.audio.iter())
            .chain(self.io.iter())
            .chain(self.system.iter());
        for slot in slots {
            if slot.clock_hz == Some(0) {
                return Err(CoreError::InvalidArgument(format!(
                    "slot {}: clock_hz must be non-zero",
                    slot.module.display()
                )));
            }
        }
        if self.cpu.is_none() && self.system.is_none() {
            return Err(CoreError::InvalidArgument(format!(
                "profile '{}' has neither a cpu nor a system slot",
                self.name
            )));
        }
        if self.cpu.as_ref().is_some_and(|s| s.optional) && self.system.is_none() {
            return Err(CoreError::InvalidArgument(
                "the cpu slot cannot be optional without a system slot".into(),
            ));
        }
        if self.memory.rom_required && self.memory.rom.is_none() {
            return Err(CoreError::InvalidArgument(
                "rom_required is set but no rom is named".into(),
            ));
        }
        Ok(())
    }
}

//! Atari ST emulation core
//!
//! A Motorola 68000 instruction engine, a 24-bit memory map with
//! memory-mapped peripherals, the GLUE timing controller that turns CPU
//! cycles into scanlines and interrupt levels, and a loader for relocatable
//! EBIN chip modules that plug into a machine assembled from a JSON profile.
//!
//! # Features
//! - 68000 user and supervisor instruction set with exception frames,
//!   address errors, bus errors, STOP and interrupt arbitration
//! - RAM/ROM/cartridge memory map with an I/O window of registered handlers
//! - PAL/NTSC line and frame timing with HBL, VBL and MFP interrupt levels
//! - EBIN module format: validation, relocation, symbol table, core catalog
//! - Built-in cores: MC68000, MFP 68901, ST shifter, YM2149 PSG, `st-chipset`
//! - Machine profiles, a scanline-stepped frame loop and pause/stop control
//!
//! # Crate feature flags
//! - `cpu-trace` (opt-in): bounded execution trace ring in the CPU
//!
//! # Quick start
//! ## Bare CPU on a memory map
//! ```no_run
//! use st_core::bus::MemoryMap;
//! use st_core::cpu::Cpu68000;
//!
//! let mut bus = MemoryMap::new(64 * 1024).unwrap();
//! // SSP, PC, then MOVEQ #42,D0 ; STOP #$2700
//! bus.upload(0, &[0, 0, 0x80, 0, 0, 0, 0x04, 0]).unwrap();
//! bus.upload(0x400, &[0x70, 0x2A, 0x4E, 0x72, 0x27, 0x00]).unwrap();
//! let mut cpu = Cpu68000::new();
//! cpu.reset(&mut bus);
//! cpu.execute(&mut bus, 1_000);
//! assert_eq!(cpu.regs.d[0], 42);
//! ```
//!
//! ## Machine from a profile
//! ```no_run
//! use st_core::{Loader, Machine, MachineControl, MachineProfile};
//!
//! let profile = MachineProfile::from_path("machines/st.json").unwrap();
//! let mut machine = Machine::assemble(profile, Loader::default()).unwrap();
//! let control = MachineControl::new();
//! machine.run(&control, Some(50)).unwrap();
//! ```

#![warn(missing_docs)]

pub mod bus; // Memory map and I/O routing
pub mod component; // Component interfaces
pub mod cores; // Built-in chip models
pub mod cpu; // 68000 engine
pub mod error;
pub mod glue; // Timing controller
pub mod loader; // EBIN modules
pub mod machine; // Assembly and frame loop
pub mod registry;

pub use bus::{Bus, BusFault, BusStats, FaultKind, IoDevice, IoHandler, MemoryMap};
pub use component::{
    AudioComponent, Component, ComponentHandle, ComponentId, ComponentInterface, ComponentKind,
    CpuComponent, FrameBuffer, IoComponent, MappedComponent, SystemBundle, VideoComponent,
};
pub use cpu::{Cpu68000, CpuState};
pub use error::{CoreError, Result};
pub use glue::{Glue, GlueEvents, VideoStandard};
pub use loader::{CoreCatalog, Loader, ModuleBuilder, ModuleHeader};
pub use machine::{FrameReport, Machine, MachineControl, MachineProfile, SlotConfig};
pub use registry::ComponentRegistry;

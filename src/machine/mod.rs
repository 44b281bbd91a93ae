//! Machine assembly and the frame loop.
//!
//! [`Machine::assemble`] turns a [`MachineProfile`] into a running system:
//! it loads one module per populated slot, registers the interfaces, maps
//! every component's register window into the [`MemoryMap`] and attaches
//! the first I/O component to the GLUE as the interrupt controller.
//!
//! [`Machine::run_frame`] then executes one scanline's worth of cycles at a
//! time, clocking the GLUE after each batch, rendering visible lines and
//! generating audio per line.

pub mod profile;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

pub use profile::{MachineProfile, MemoryConfig, SlotConfig};

use crate::bus::{IoHandler, MemoryMap, SharedDevice};
use crate::component::{
    ComponentHandle, ComponentInterface, ComponentKind, DeviceBridge, FrameBuffer,
    MappedComponent, SharedAudio, SharedCpu, SharedIo, SharedVideo,
};
use crate::error::{CoreError, Result};
use crate::glue::{levels, Glue, CYCLES_PER_LINE};
use crate::loader::Loader;
use crate::registry::ComponentRegistry;

/// Scanlines between cooperative yields inside a frame.
const LINES_PER_YIELD: u32 = 64;

/// Pause/resume/stop flags shared between the emulation loop and its owner.
#[derive(Debug, Clone, Default)]
pub struct MachineControl {
    inner: Arc<ControlFlags>,
}

#[derive(Debug, Default)]
struct ControlFlags {
    paused: AtomicBool,
    stop: AtomicBool,
    running: AtomicBool,
}

impl MachineControl {
    /// Fresh control block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the loop between frames.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
    }

    /// Continue after [`MachineControl::pause`].
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
    }

    /// True while paused.
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Ask the loop to exit after the current frame.
    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::Release);
    }

    /// True once a stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::Acquire)
    }

    /// True while a loop is executing.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Request a stop and poll until the loop exits or `timeout` elapses.
    /// Returns `true` if the loop exited in time.
    pub fn stop_and_wait(&self, timeout: Duration) -> bool {
        self.stop();
        let deadline = Instant::now() + timeout;
        while self.is_running() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    fn enter(&self) {
        self.inner.stop.store(false, Ordering::Release);
        self.inner.running.store(true, Ordering::Release);
    }

    fn leave(&self) {
        self.inner.running.store(false, Ordering::Release);
    }
}

/// Outcome of one [`Machine::run_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Frames completed since reset
    pub frame: u64,
    /// CPU cycles executed during the frame
    pub cycles: u64,
    /// Display rows rendered
    pub rows: u32,
    /// Audio samples produced
    pub samples: usize,
    /// Interrupts accepted by the CPU
    pub interrupts: u32,
    /// CPU ended the frame stopped or halted
    pub cpu_stopped: bool,
}

/// An assembled machine.
pub struct Machine {
    profile: MachineProfile,
    loader: Loader,
    registry: ComponentRegistry,
    bus: MemoryMap,
    glue: Glue,
    cpu: SharedCpu,
    video: Option<SharedVideo>,
    audio: Vec<SharedAudio>,
    io: Vec<SharedIo>,
    cpu_clock_hz: u32,
    audio_accum: u64,
    samples: Vec<i16>,
    scratch: Vec<i16>,
    shut_down: bool,
}

/// Components collected from the registry, before wiring.
#[derive(Default)]
struct Parts {
    cpu: Option<SharedCpu>,
    video: Option<(String, SharedVideo)>,
    audio: Vec<(String, SharedAudio)>,
    io: Vec<(String, SharedIo)>,
}

impl Parts {
    fn take(&mut self, role: &str, interface: &ComponentInterface) {
        match interface {
            ComponentInterface::Cpu(cpu) => {
                self.cpu.get_or_insert_with(|| cpu.clone());
            }
            ComponentInterface::Video(video) => {
                if self.video.is_none() {
                    self.video = Some((role.to_string(), video.clone()));
                }
            }
            ComponentInterface::Audio(audio) => self.audio.push((role.to_string(), audio.clone())),
            ComponentInterface::Io(io) => self.io.push((role.to_string(), io.clone())),
            ComponentInterface::System(bundle) => {
                if let Some(cpu) = bundle.cpu() {
                    self.cpu.get_or_insert_with(|| cpu.clone());
                }
                if let Some(video) = bundle.video() {
                    if self.video.is_none() {
                        self.video = Some((format!("{role}.video"), video.clone()));
                    }
                }
                for (i, audio) in bundle.audio().iter().enumerate() {
                    self.audio.push((format!("{role}.audio{i}"), audio.clone()));
                }
                for (i, io) in bundle.io().iter().enumerate() {
                    self.io.push((format!("{role}.io{i}"), io.clone()));
                }
            }
        }
    }
}

fn read_image(path: &Path, what: &str) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("{} {} not found", what, path.display());
            Ok(None)
        }
        Err(e) => Err(CoreError::Io(e)),
    }
}

fn map_window<T: MappedComponent + ?Sized + 'static>(
    bus: &mut MemoryMap,
    role: &str,
    component: &Arc<Mutex<T>>,
) -> Result<()> {
    let range = component.lock().io_range();
    if let Some(range) = range {
        let device: SharedDevice = Arc::new(Mutex::new(DeviceBridge::new(component.clone())));
        bus.register_io(IoHandler::new(role, *range.start(), *range.end(), device))?;
    }
    Ok(())
}

impl Machine {
    /// Load every slot of `profile` through `loader` and wire the result.
    ///
    /// On failure every module loaded so far is unloaded again.
    pub fn assemble(profile: MachineProfile, mut loader: Loader) -> Result<Self> {
        profile.validate()?;
        let mut registry = ComponentRegistry::new();
        if let Err(e) = Self::load_slots(&profile, &mut loader, &mut registry) {
            warn!("machine '{}' assembly failed: {}", profile.name, e);
            loader.unload_all();
            return Err(e);
        }
        match Self::wire(profile, loader, registry) {
            Ok(machine) => Ok(machine),
            Err((e, mut loader)) => {
                warn!("machine wiring failed: {}", e);
                loader.unload_all();
                Err(e)
            }
        }
    }

    fn load_slots(
        profile: &MachineProfile,
        loader: &mut Loader,
        registry: &mut ComponentRegistry,
    ) -> Result<()> {
        let mut slots: Vec<(&SlotConfig, ComponentKind, &str)> = Vec::new();
        if let Some(slot) = &profile.system {
            slots.push((slot, ComponentKind::System, "system"));
        }
        if let Some(slot) = &profile.cpu {
            slots.push((slot, ComponentKind::Cpu, "cpu"));
        }
        if let Some(slot) = &profile.video {
            slots.push((slot, ComponentKind::Video, "video"));
        }
        slots.extend(profile.audio.iter().map(|s| (s, ComponentKind::Audio, "audio")));
        slots.extend(profile.io.iter().map(|s| (s, ComponentKind::Io, "io")));

        let mut counts = [0usize; 6];
        for (slot, kind, fallback) in slots {
            let n = &mut counts[kind.code() as usize];
            let default_role = if *n == 0 {
                fallback.to_string()
            } else {
                format!("{fallback}{n}")
            };
            *n += 1;
            let role = slot.role.clone().unwrap_or(default_role);

            if !slot.module.exists() {
                if slot.optional {
                    warn!("optional {} slot '{}': {} missing, skipped", kind, role, slot.module.display());
                    continue;
                }
                return Err(CoreError::NotFound(format!(
                    "module {} for required {} slot '{}'",
                    slot.module.display(),
                    kind,
                    role
                )));
            }
            let handle = loader.load(&slot.module, kind)?;
            if let Some(hz) = slot.clock_hz {
                debug!("slot '{}' clock override {} Hz", role, hz);
            }
            registry.register(kind, role, handle)?;
        }
        Ok(())
    }

    fn wire(
        profile: MachineProfile,
        loader: Loader,
        registry: ComponentRegistry,
    ) -> std::result::Result<Self, (CoreError, Loader)> {
        let mut parts = Parts::default();
        for entry in registry.entries() {
            parts.take(&entry.role, entry.handle.interface());
        }
        let result = (|| -> Result<(MemoryMap, SharedCpu)> {
            let cpu = parts.cpu.clone().ok_or_else(|| {
                CoreError::InvalidArgument(format!(
                    "machine '{}' has no CPU component",
                    profile.name
                ))
            })?;
            let mut bus = MemoryMap::new(profile.memory.ram_bytes)?;
            if let Some(rom) = &profile.memory.rom {
                match read_image(rom, "ROM")? {
                    Some(bytes) => {
                        let base = bus.load_rom(bytes)?;
                        info!("ROM {} mapped at 0x{:06X}", rom.display(), base);
                    }
                    None if profile.memory.rom_required => {
                        return Err(CoreError::NotFound(format!("ROM {}", rom.display())));
                    }
                    None => {}
                }
            }
            if let Some(cart) = &profile.memory.cartridge {
                if let Some(bytes) = read_image(cart, "cartridge")? {
                    bus.load_cartridge(bytes)?;
                }
            }
            if let Some((role, video)) = &parts.video {
                map_window(&mut bus, role, video)?;
            }
            for (role, audio) in &parts.audio {
                map_window(&mut bus, role, audio)?;
            }
            for (role, io) in &parts.io {
                map_window(&mut bus, role, io)?;
            }
            registry.init_all()?;
            Ok((bus, cpu))
        })();

        let (bus, cpu) = match result {
            Ok(v) => v,
            Err(e) => {
                registry.shutdown_all();
                return Err((e, loader));
            }
        };

        let mut glue = Glue::new(profile.video_standard);
        if let Some((role, mfp)) = parts.io.first() {
            debug!("'{}' drives the level-6 interrupt", role);
            glue.attach_peripheral(Box::new(DeviceBridge::new(mfp.clone())));
        }
        for (_, audio) in &parts.audio {
            audio.lock().set_sample_rate(profile.sample_rate);
        }

        info!(
            "machine '{}' assembled: {} components, {} I/O windows",
            profile.name,
            registry.len(),
            bus.handlers().len()
        );
        let mut machine = Machine {
            cpu_clock_hz: profile
                .cpu
                .as_ref()
                .and_then(|s| s.clock_hz)
                .unwrap_or(profile.cpu_clock_hz),
            profile,
            loader,
            registry,
            bus,
            glue,
            cpu,
            video: parts.video.map(|(_, v)| v),
            audio: parts.audio.into_iter().map(|(_, a)| a).collect(),
            io: parts.io.into_iter().map(|(_, i)| i).collect(),
            audio_accum: 0,
            samples: Vec::new(),
            scratch: Vec::new(),
            shut_down: false,
        };
        machine.reset();
        Ok(machine)
    }

    /// Power-on reset: clear RAM, reset every component, fetch the reset
    /// vectors.
    pub fn reset(&mut self) {
        self.bus.reset();
        self.warm_reset();
    }

    /// Reset button: components and CPU restart, RAM is kept.
    pub fn warm_reset(&mut self) {
        self.registry.reset_all();
        let mut cpu = self.cpu.lock();
        cpu.reset_cpu(&mut self.bus);
        self.glue.reset(cpu.as_interrupt_line());
        drop(cpu);
        if let Some(video) = &self.video {
            video.lock().start_frame();
        }
        self.audio_accum = 0;
        self.samples.clear();
        debug!("machine '{}' reset", self.profile.name);
    }

    /// Run until the GLUE completes a frame.
    pub fn run_frame(&mut self) -> Result<FrameReport> {
        if self.shut_down {
            return Err(CoreError::InvalidState("machine is shut down".into()));
        }
        self.samples.clear();
        let lines_per_frame = self.glue.standard().lines_per_frame();
        let mut report = FrameReport {
            frame: self.glue.frame_count(),
            cycles: 0,
            rows: 0,
            samples: 0,
            interrupts: 0,
            cpu_stopped: false,
        };
        let mut lines_since_yield = 0u32;

        loop {
            let budget = CYCLES_PER_LINE.saturating_sub(self.glue.line_cycles()).max(1);
            let line_before = self.glue.scanline();

            let (cycles, events) = {
                let mut cpu = self.cpu.lock();
                let cycles = cpu.execute(&mut self.bus, budget);
                if let Some(ack) = cpu.take_interrupt_ack() {
                    report.interrupts += 1;
                    // the MFP drops its request before the next arbitration
                    if ack.level == levels::MFP {
                        if let Some(mfp) = self.io.first() {
                            mfp.lock().acknowledge(ack.vector);
                        }
                    }
                    self.glue.interrupt_acknowledged();
                }
                let events = self.glue.clock(cycles, cpu.as_interrupt_line());
                (cycles, events)
            };
            report.cycles += u64::from(cycles);

            for i in 0..events.lines {
                let finished = (line_before + i) % lines_per_frame;
                self.end_of_line(finished, &mut report);
            }
            if events.vbl {
                if let Some(video) = &self.video {
                    video.lock().start_frame();
                }
            }

            lines_since_yield += events.lines;
            if lines_since_yield >= LINES_PER_YIELD {
                lines_since_yield = 0;
                std::thread::yield_now();
            }

            if self.glue.take_frame_complete() {
                break;
            }
        }

        report.frame = self.glue.frame_count();
        report.samples = self.samples.len();
        report.cpu_stopped = self.cpu.lock().is_stopped();
        Ok(report)
    }

    fn end_of_line(&mut self, line: u32, report: &mut FrameReport) {
        if let Some(row) = self.glue.display_row(line) {
            if let Some(video) = &self.video {
                video.lock().render_line(&mut self.bus, row);
            }
            for io in &self.io {
                io.lock().line_event();
            }
            report.rows += 1;
        }

        if self.audio.is_empty() {
            return;
        }
        self.audio_accum += u64::from(self.profile.sample_rate) * u64::from(CYCLES_PER_LINE);
        let count = (self.audio_accum / u64::from(self.cpu_clock_hz)) as usize;
        self.audio_accum %= u64::from(self.cpu_clock_hz);
        if count == 0 {
            return;
        }
        let start = self.samples.len();
        self.samples.resize(start + count, 0);
        self.scratch.resize(count, 0);
        for audio in &self.audio {
            audio.lock().generate(&mut self.bus, &mut self.scratch);
            for (out, s) in self.samples[start..].iter_mut().zip(&self.scratch) {
                *out = out.saturating_add(*s);
            }
        }
    }

    /// Run frames until `control` asks to stop or `max_frames` frames ran.
    /// Returns the number of frames executed.
    pub fn run(&mut self, control: &MachineControl, max_frames: Option<u64>) -> Result<u64> {
        control.enter();
        info!("machine '{}' running", self.profile.name);
        let mut frames = 0u64;
        let result = loop {
            if control.stop_requested() || max_frames.is_some_and(|max| frames >= max) {
                break Ok(frames);
            }
            if control.is_paused() {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
            if let Err(e) = self.run_frame() {
                break Err(e);
            }
            frames += 1;
            std::thread::yield_now();
        };
        control.leave();
        info!("machine '{}' stopped after {} frames", self.profile.name, frames);
        result
    }

    /// Broadcast shutdown and unload every module. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.registry.shutdown_all();
        self.glue.detach_peripheral();
        let names: Vec<String> = self.bus.handlers().iter().map(|h| h.name.clone()).collect();
        for name in names {
            if let Err(e) = self.bus.unregister_io(&name) {
                warn!("unmapping '{}': {}", name, e);
            }
        }
        let ids: Vec<_> = self.registry.entries().iter().map(|e| e.handle.id()).collect();
        for id in ids.into_iter().rev() {
            if let Err(e) = self.registry.remove(id).and_then(|_| self.loader.unload(id)) {
                warn!("unloading {}: {}", id, e);
            }
        }
        info!("machine '{}' shut down", self.profile.name);
    }

    /// Profile the machine was built from.
    pub fn profile(&self) -> &MachineProfile {
        &self.profile
    }

    /// Memory map.
    pub fn bus(&self) -> &MemoryMap {
        &self.bus
    }

    /// Mutable memory map (program upload, debugging).
    pub fn bus_mut(&mut self) -> &mut MemoryMap {
        &mut self.bus
    }

    /// Timing controller.
    pub fn glue(&self) -> &Glue {
        &self.glue
    }

    /// Component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Module loader.
    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// The CPU.
    pub fn cpu(&self) -> &SharedCpu {
        &self.cpu
    }

    /// Handle registered under `role`.
    pub fn component(&self, role: &str) -> Option<&ComponentHandle> {
        self.registry.by_role(role)
    }

    /// Copy of the last rendered frame.
    pub fn frame(&self) -> Option<FrameBuffer> {
        self.video.as_ref().map(|v| v.lock().frame().clone())
    }

    /// Samples produced by the last frame.
    pub fn audio_samples(&self) -> &[i16] {
        &self.samples
    }

    /// Effective CPU clock.
    pub fn cpu_clock_hz(&self) -> u32 {
        self.cpu_clock_hz
    }

    /// Frames per second at the effective CPU clock.
    pub fn frame_rate(&self) -> f64 {
        f64::from(self.cpu_clock_hz) / self.glue.standard().cycles_per_frame() as f64
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ModuleBuilder;
    use std::path::PathBuf;

    fn write_module(dir: &Path, file: &str, kind: ComponentKind, entry: &str) -> PathBuf {
        let path = dir.join(file);
        let image = ModuleBuilder::new(kind)
            .code(vec![0x4E, 0x75])
            .entry(entry, 0)
            .build()
            .unwrap();
        std::fs::write(&path, image).unwrap();
        path
    }

    #[test]
    fn control_flags() {
        let control = MachineControl::new();
        assert!(!control.is_running());
        control.pause();
        assert!(control.is_paused());
        control.resume();
        assert!(!control.is_paused());
        assert!(control.stop_and_wait(Duration::from_millis(5)));
        control.enter();
        assert!(!control.stop_and_wait(Duration::from_millis(5)));
        control.leave();
    }

    #[test]
    fn missing_required_slot_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut profile = MachineProfile::new("broken");
        profile.cpu = Some(SlotConfig::new(write_module(
            dir.path(),
            "cpu.ebin",
            ComponentKind::Cpu,
            "mc68000",
        )));
        profile.io.push(SlotConfig::new(dir.path().join("absent.ebin")));
        let err = Machine::assemble(profile, Loader::default()).err();
        assert!(matches!(err, Some(CoreError::NotFound(_))));
    }

    #[test]
    fn optional_slot_skipped_and_windows_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let mut profile = MachineProfile::new("small");
        profile.memory.ram_bytes = 64 * 1024;
        profile.cpu = Some(SlotConfig::new(write_module(
            dir.path(),
            "cpu.ebin",
            ComponentKind::Cpu,
            "mc68000",
        )));
        profile.io.push(
            SlotConfig::new(write_module(dir.path(), "mfp.ebin", ComponentKind::Io, "mfp68901"))
                .with_role("mfp"),
        );
        profile
            .audio
            .push(SlotConfig::new(dir.path().join("psg.ebin")).optional());

        let mut machine = Machine::assemble(profile, Loader::default()).unwrap();
        assert_eq!(machine.registry().len(), 2);
        assert!(machine.component("mfp").is_some());
        assert_eq!(machine.bus().handlers().len(), 1);
        assert_eq!(machine.loader().loaded().count(), 2);

        machine.shutdown();
        assert_eq!(machine.bus().handlers().len(), 0);
        assert_eq!(machine.loader().loaded().count(), 0);
        assert!(machine.run_frame().is_err());
    }
}

//! Component interfaces.
//!
//! Every emulated chip is a [`Component`] plus one capability trait:
//! [`CpuComponent`], [`VideoComponent`], [`AudioComponent`] or
//! [`IoComponent`]. A unified "system" module yields a [`SystemBundle`]
//! holding several of them.
//!
//! Components are shared as `Arc<parking_lot::Mutex<dyn ...>>` so the
//! memory map (register access), the timing controller (peripheral clock)
//! and the machine loop can all reach the same instance. Operational calls
//! receive the bus explicitly; no component keeps a global bus pointer.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::bus::{Bus, IoDevice};
use crate::error::{CoreError, Result};

/// Component kind as declared in a module header (numbered 1-5).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, FromPrimitive,
)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Central processor
    Cpu = 1,
    /// Video shifter / display generator
    Video = 2,
    /// Sound generator
    Audio = 3,
    /// Generic I/O peripheral (interrupt controller, timers, ports)
    Io = 4,
    /// Unified multi-capability chipset
    System = 5,
}

impl ComponentKind {
    /// Header encoding.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Decode a header kind field.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::from_u16(code)
    }

    /// Lowercase name used in profiles and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Cpu => "cpu",
            ComponentKind::Video => "video",
            ComponentKind::Audio => "audio",
            ComponentKind::Io => "io",
            ComponentKind::System => "system",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComponentKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(ComponentKind::Cpu),
            "video" => Ok(ComponentKind::Video),
            "audio" => Ok(ComponentKind::Audio),
            "io" => Ok(ComponentKind::Io),
            "system" => Ok(ComponentKind::System),
            other => Err(CoreError::InvalidArgument(format!(
                "unknown component kind '{other}'"
            ))),
        }
    }
}

/// Interrupt delivered by the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptAck {
    /// Accepted level (1-7)
    pub level: u8,
    /// Vector number used
    pub vector: u8,
}

/// CPU interrupt input pins.
pub trait InterruptLine {
    /// Present an interrupt level (0 = none).
    fn set_ipl(&mut self, level: u8);

    /// Vector to use for the next level-6 interrupt, or `None` for the
    /// autovector.
    fn set_vector_override(&mut self, vector: Option<u8>);
}

/// Lifecycle and state operations shared by every component.
pub trait Component: Send {
    /// Chip model name.
    fn name(&self) -> &str;

    /// One-time initialization after loading.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Return to power-on state.
    fn reset(&mut self);

    /// Release resources before unloading.
    fn shutdown(&mut self) {}

    /// Serialize internal state.
    fn save_state(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Restore state produced by [`Component::save_state`].
    fn load_state(&mut self, state: &[u8]) -> Result<()> {
        if state.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Unsupported(format!(
                "{} does not support state restore",
                self.name()
            )))
        }
    }
}

/// Instruction processor.
pub trait CpuComponent: Component {
    /// Hardware reset through the bus (vector fetch).
    fn reset_cpu(&mut self, bus: &mut dyn Bus);

    /// Run for at least `cycles`; returns cycles consumed.
    fn execute(&mut self, bus: &mut dyn Bus, cycles: u32) -> u32;

    /// Cycles executed since creation.
    fn total_cycles(&self) -> u64;

    /// Program counter.
    fn pc(&self) -> u32;

    /// True if not executing instructions (STOP or halt).
    fn is_stopped(&self) -> bool;

    /// Most recently delivered interrupt, consumed on read.
    fn take_interrupt_ack(&mut self) -> Option<InterruptAck>;

    /// Interrupt inputs.
    fn as_interrupt_line(&mut self) -> &mut dyn InterruptLine;
}

/// A component that claims a window of the I/O address space.
pub trait MappedComponent: Component {
    /// Inclusive I/O range served, or `None` if the component has no registers.
    fn io_range(&self) -> Option<RangeInclusive<u32>>;

    /// Register access for the claimed window.
    fn io(&mut self) -> &mut dyn IoDevice;
}

/// Decoded RGB frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Pixels per line
    pub width: usize,
    /// Lines
    pub height: usize,
    /// 0x00RRGGBB, row-major
    pub pixels: Vec<u32>,
}

impl FrameBuffer {
    /// Black frame.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width * height],
        }
    }

    /// One row of pixels.
    pub fn row(&self, y: usize) -> &[u32] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }
}

/// Display generator.
pub trait VideoComponent: MappedComponent {
    /// Latch frame-start registers (vertical blank).
    fn start_frame(&mut self);

    /// Fetch and decode display row `row` from video memory.
    fn render_line(&mut self, bus: &mut dyn Bus, row: u32);

    /// Most recently rendered frame.
    fn frame(&self) -> &FrameBuffer;
}

/// Sound generator.
pub trait AudioComponent: MappedComponent {
    /// Output sample rate in Hz.
    fn set_sample_rate(&mut self, hz: u32);

    /// Fill `out` with mono samples.
    fn generate(&mut self, bus: &mut dyn Bus, out: &mut [i16]);
}

/// Peripheral clock and interrupt request as seen by the timing controller.
pub trait PeripheralClock: Send {
    /// Advance by `cycles` peripheral clocks.
    fn clock(&mut self, cycles: u32);

    /// True if an enabled interrupt is pending.
    fn irq_pending(&self) -> bool;

    /// Vector the controller presents for its highest pending interrupt.
    fn irq_vector(&self) -> u8;
}

/// Generic I/O peripheral with its own interrupt controller.
pub trait IoComponent: MappedComponent + PeripheralClock {
    /// CPU acknowledged the interrupt that used `vector`.
    fn acknowledge(&mut self, vector: u8);

    /// Display-enable edge at the end of each visible line.
    fn line_event(&mut self) {}
}

/// Shared CPU.
pub type SharedCpu = Arc<Mutex<dyn CpuComponent>>;
/// Shared video component.
pub type SharedVideo = Arc<Mutex<dyn VideoComponent>>;
/// Shared audio component.
pub type SharedAudio = Arc<Mutex<dyn AudioComponent>>;
/// Shared I/O component.
pub type SharedIo = Arc<Mutex<dyn IoComponent>>;

/// Adapter that exposes a shared component's registers to the memory map
/// and its interrupt controller to the timing controller.
pub struct DeviceBridge<T: ?Sized>(Arc<Mutex<T>>);

impl<T: ?Sized> DeviceBridge<T> {
    /// Wrap a shared component.
    pub fn new(inner: Arc<Mutex<T>>) -> Self {
        Self(inner)
    }
}

impl<T: MappedComponent + ?Sized> IoDevice for DeviceBridge<T> {
    fn read_byte(&mut self, addr: u32) -> Option<u8> {
        self.0.lock().io().read_byte(addr)
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> bool {
        self.0.lock().io().write_byte(addr, value)
    }

    fn read_word(&mut self, addr: u32) -> Option<u16> {
        self.0.lock().io().read_word(addr)
    }

    fn write_word(&mut self, addr: u32, value: u16) -> bool {
        self.0.lock().io().write_word(addr, value)
    }

    fn reset(&mut self) {
        self.0.lock().reset();
    }
}

impl<T: IoComponent + ?Sized> PeripheralClock for DeviceBridge<T> {
    fn clock(&mut self, cycles: u32) {
        self.0.lock().clock(cycles);
    }

    fn irq_pending(&self) -> bool {
        self.0.lock().irq_pending()
    }

    fn irq_vector(&self) -> u8 {
        self.0.lock().irq_vector()
    }
}

/// Capabilities yielded by a unified system module.
#[derive(Clone, Default)]
pub struct SystemBundle {
    name: String,
    cpu: Option<SharedCpu>,
    video: Option<SharedVideo>,
    audio: Vec<SharedAudio>,
    io: Vec<SharedIo>,
}

impl SystemBundle {
    /// Empty bundle.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a CPU.
    pub fn with_cpu(mut self, cpu: SharedCpu) -> Self {
        self.cpu = Some(cpu);
        self
    }

    /// Add a video component.
    pub fn with_video(mut self, video: SharedVideo) -> Self {
        self.video = Some(video);
        self
    }

    /// Add an audio component.
    pub fn with_audio(mut self, audio: SharedAudio) -> Self {
        self.audio.push(audio);
        self
    }

    /// Add an I/O component.
    pub fn with_io(mut self, io: SharedIo) -> Self {
        self.io.push(io);
        self
    }

    /// Bundle name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// CPU, if the bundle has one.
    pub fn cpu(&self) -> Option<&SharedCpu> {
        self.cpu.as_ref()
    }

    /// Video component, if any.
    pub fn video(&self) -> Option<&SharedVideo> {
        self.video.as_ref()
    }

    /// Audio components.
    pub fn audio(&self) -> &[SharedAudio] {
        &self.audio
    }

    /// I/O components.
    pub fn io(&self) -> &[SharedIo] {
        &self.io
    }

    fn init(&self) -> Result<()> {
        if let Some(cpu) = &self.cpu {
            cpu.lock().init()?;
        }
        if let Some(video) = &self.video {
            video.lock().init()?;
        }
        for audio in &self.audio {
            audio.lock().init()?;
        }
        for io in &self.io {
            io.lock().init()?;
        }
        Ok(())
    }

    fn reset(&self) {
        if let Some(cpu) = &self.cpu {
            cpu.lock().reset();
        }
        if let Some(video) = &self.video {
            video.lock().reset();
        }
        for audio in &self.audio {
            audio.lock().reset();
        }
        for io in &self.io {
            io.lock().reset();
        }
    }

    fn shutdown(&self) {
        for io in self.io.iter().rev() {
            io.lock().shutdown();
        }
        for audio in self.audio.iter().rev() {
            audio.lock().shutdown();
        }
        if let Some(video) = &self.video {
            video.lock().shutdown();
        }
        if let Some(cpu) = &self.cpu {
            cpu.lock().shutdown();
        }
    }
}

/// The interface a module's entry point returns.
#[derive(Clone)]
pub enum ComponentInterface {
    /// CPU core
    Cpu(SharedCpu),
    /// Video core
    Video(SharedVideo),
    /// Audio core
    Audio(SharedAudio),
    /// I/O core
    Io(SharedIo),
    /// Unified chipset
    System(SystemBundle),
}

impl ComponentInterface {
    /// Wrap a CPU core.
    pub fn cpu(cpu: impl CpuComponent + 'static) -> Self {
        ComponentInterface::Cpu(Arc::new(Mutex::new(cpu)))
    }

    /// Wrap a video core.
    pub fn video(video: impl VideoComponent + 'static) -> Self {
        ComponentInterface::Video(Arc::new(Mutex::new(video)))
    }

    /// Wrap an audio core.
    pub fn audio(audio: impl AudioComponent + 'static) -> Self {
        ComponentInterface::Audio(Arc::new(Mutex::new(audio)))
    }

    /// Wrap an I/O core.
    pub fn io(io: impl IoComponent + 'static) -> Self {
        ComponentInterface::Io(Arc::new(Mutex::new(io)))
    }

    /// Kind this interface satisfies.
    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentInterface::Cpu(_) => ComponentKind::Cpu,
            ComponentInterface::Video(_) => ComponentKind::Video,
            ComponentInterface::Audio(_) => ComponentKind::Audio,
            ComponentInterface::Io(_) => ComponentKind::Io,
            ComponentInterface::System(_) => ComponentKind::System,
        }
    }

    /// Chip model name.
    pub fn name(&self) -> String {
        match self {
            ComponentInterface::Cpu(c) => c.lock().name().to_string(),
            ComponentInterface::Video(c) => c.lock().name().to_string(),
            ComponentInterface::Audio(c) => c.lock().name().to_string(),
            ComponentInterface::Io(c) => c.lock().name().to_string(),
            ComponentInterface::System(s) => s.name().to_string(),
        }
    }

    fn init(&self) -> Result<()> {
        match self {
            ComponentInterface::Cpu(c) => c.lock().init(),
            ComponentInterface::Video(c) => c.lock().init(),
            ComponentInterface::Audio(c) => c.lock().init(),
            ComponentInterface::Io(c) => c.lock().init(),
            ComponentInterface::System(s) => s.init(),
        }
    }

    fn reset(&self) {
        match self {
            ComponentInterface::Cpu(c) => c.lock().reset(),
            ComponentInterface::Video(c) => c.lock().reset(),
            ComponentInterface::Audio(c) => c.lock().reset(),
            ComponentInterface::Io(c) => c.lock().reset(),
            ComponentInterface::System(s) => s.reset(),
        }
    }

    fn shutdown(&self) {
        match self {
            ComponentInterface::Cpu(c) => c.lock().shutdown(),
            ComponentInterface::Video(c) => c.lock().shutdown(),
            ComponentInterface::Audio(c) => c.lock().shutdown(),
            ComponentInterface::Io(c) => c.lock().shutdown(),
            ComponentInterface::System(s) => s.shutdown(),
        }
    }
}

impl fmt::Debug for ComponentInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInterface")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

/// Identifier of a loaded component. Zero is the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u32);

impl ComponentId {
    /// The null handle.
    pub const NULL: ComponentId = ComponentId(0);

    /// True for the null handle.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A loaded interface plus lifecycle bookkeeping.
///
/// Clones share the initialized flag, so the loader knows whether the
/// registry ran `init` before it tears the component down.
#[derive(Clone, Debug)]
pub struct ComponentHandle {
    id: ComponentId,
    interface: ComponentInterface,
    initialized: Arc<AtomicBool>,
}

impl ComponentHandle {
    /// Wrap `interface` under `id`.
    pub fn new(id: ComponentId, interface: ComponentInterface) -> Self {
        Self {
            id,
            interface,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Identifier.
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Kind.
    pub fn kind(&self) -> ComponentKind {
        self.interface.kind()
    }

    /// Chip model name.
    pub fn name(&self) -> String {
        self.interface.name()
    }

    /// Underlying interface.
    pub fn interface(&self) -> &ComponentInterface {
        &self.interface
    }

    /// True once `init` has succeeded and until `shutdown`.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Run `init` once; later calls are no-ops.
    pub fn init(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        self.interface.init()?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Reset to power-on state.
    pub fn reset(&self) {
        self.interface.reset();
    }

    /// Call `shutdown` if `init` ran; idempotent.
    pub fn shutdown(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            self.interface.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct NoRegs;

    impl IoDevice for NoRegs {}

    struct Probe {
        inits: Arc<AtomicU32>,
        shutdowns: Arc<AtomicU32>,
        regs: NoRegs,
    }

    impl Component for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn init(&mut self) -> Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn reset(&mut self) {}

        fn shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl MappedComponent for Probe {
        fn io_range(&self) -> Option<RangeInclusive<u32>> {
            None
        }

        fn io(&mut self) -> &mut dyn IoDevice {
            &mut self.regs
        }
    }

    impl PeripheralClock for Probe {
        fn clock(&mut self, _cycles: u32) {}

        fn irq_pending(&self) -> bool {
            false
        }

        fn irq_vector(&self) -> u8 {
            0x4F
        }
    }

    impl IoComponent for Probe {
        fn acknowledge(&mut self, _vector: u8) {}
    }

    #[test]
    fn kind_codes_round_trip() {
        for kind in [
            ComponentKind::Cpu,
            ComponentKind::Video,
            ComponentKind::Audio,
            ComponentKind::Io,
            ComponentKind::System,
        ] {
            assert_eq!(ComponentKind::from_code(kind.code()), Some(kind));
            assert_eq!(kind.as_str().parse::<ComponentKind>().unwrap(), kind);
        }
        assert_eq!(ComponentKind::from_code(0), None);
        assert_eq!(ComponentKind::from_code(6), None);
    }

    #[test]
    fn shutdown_only_after_init() {
        let inits = Arc::new(AtomicU32::new(0));
        let shutdowns = Arc::new(AtomicU32::new(0));
        let handle = ComponentHandle::new(
            ComponentId(1),
            ComponentInterface::io(Probe {
                inits: inits.clone(),
                shutdowns: shutdowns.clone(),
                regs: NoRegs,
            }),
        );

        handle.shutdown();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);

        handle.init().unwrap();
        handle.clone().init().unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 1);

        handle.shutdown();
        handle.shutdown();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bridge_forwards_peripheral_clock() {
        let shared: SharedIo = Arc::new(Mutex::new(Probe {
            inits: Arc::default(),
            shutdowns: Arc::default(),
            regs: NoRegs,
        }));
        let bridge = DeviceBridge::new(shared);
        assert!(!bridge.irq_pending());
        assert_eq!(bridge.irq_vector(), 0x4F);
    }
}

//! GLUE chipset timing controller.
//!
//! Turns executed CPU cycles into scanline and frame timing, clocks the
//! MFP at its own rate and arbitrates the three interrupt sources into one
//! CPU interrupt level:
//!
//! | Source              | Level |
//! |---------------------|-------|
//! | MFP 68901 IRQ       | 6     |
//! | Vertical blank      | 4     |
//! | Horizontal blank    | 2     |
//!
//! HBL and VBL are single-cycle edges: they are raised during the `clock`
//! call that crosses into the relevant line and cleared before it returns.

use serde::{Deserialize, Serialize};

use crate::component::{InterruptLine, PeripheralClock};

/// CPU cycles per scanline at 8 MHz.
pub const CYCLES_PER_LINE: u32 = 512;

/// Numerator of the MFP/CPU clock ratio (2.4576 MHz / 8 MHz ~ 4/13).
pub const MFP_RATIO_NUM: u32 = 4;
/// Denominator of the MFP/CPU clock ratio.
pub const MFP_RATIO_DEN: u32 = 13;

/// Lines of bitmap display per frame.
pub const DISPLAY_LINES: u32 = 200;

/// Interrupt priority levels presented to the CPU.
pub mod levels {
    /// Horizontal blank
    pub const HBL: u8 = 2;
    /// Vertical blank
    pub const VBL: u8 = 4;
    /// MFP 68901
    pub const MFP: u8 = 6;
}

/// Television standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStandard {
    /// 50 Hz, 313 lines
    #[default]
    Pal,
    /// 60 Hz, 263 lines
    Ntsc,
}

impl VideoStandard {
    /// Scanlines per frame.
    pub fn lines_per_frame(self) -> u32 {
        match self {
            VideoStandard::Pal => 313,
            VideoStandard::Ntsc => 263,
        }
    }

    /// First line of the visible-plus-overscan window.
    pub fn window_start(self) -> u32 {
        match self {
            VideoStandard::Pal => 34,
            VideoStandard::Ntsc => 16,
        }
    }

    /// Last line of the visible-plus-overscan window.
    pub fn window_end(self) -> u32 {
        match self {
            VideoStandard::Pal => 279,
            VideoStandard::Ntsc => 245,
        }
    }

    /// Vertical blanking line (one past the window).
    pub fn vbl_line(self) -> u32 {
        self.window_end() + 1
    }

    /// First line of the 200-line bitmap display.
    pub fn first_display_line(self) -> u32 {
        match self {
            VideoStandard::Pal => 63,
            VideoStandard::Ntsc => 34,
        }
    }

    /// CPU cycles per frame.
    pub fn cycles_per_frame(self) -> u64 {
        u64::from(self.lines_per_frame()) * u64::from(CYCLES_PER_LINE)
    }

    /// True if `line` lies in the HBL window.
    pub fn in_window(self, line: u32) -> bool {
        (self.window_start()..=self.window_end()).contains(&line)
    }
}

/// What happened during one [`Glue::clock`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlueEvents {
    /// Scanlines completed
    pub lines: u32,
    /// HBL raised
    pub hbl: bool,
    /// VBL raised
    pub vbl: bool,
    /// MFP interrupt pending
    pub mfp: bool,
    /// Arbitrated level after this call
    pub level: u8,
}

/// Timing controller state.
pub struct Glue {
    standard: VideoStandard,
    scanline: u32,
    line_cycles: u32,
    frame_cycles: u64,
    frame_count: u64,
    hbl_pending: bool,
    vbl_pending: bool,
    current_ipl: u8,
    mfp_accum: u32,
    frame_complete: bool,
    peripheral: Option<Box<dyn PeripheralClock>>,
}

impl Glue {
    /// Controller for `standard` with no peripheral attached.
    pub fn new(standard: VideoStandard) -> Self {
        Self {
            standard,
            scanline: 0,
            line_cycles: 0,
            frame_cycles: 0,
            frame_count: 0,
            hbl_pending: false,
            vbl_pending: false,
            current_ipl: 0,
            mfp_accum: 0,
            frame_complete: false,
            peripheral: None,
        }
    }

    /// Attach the peripheral interrupt controller (MFP).
    pub fn attach_peripheral(&mut self, peripheral: Box<dyn PeripheralClock>) {
        self.peripheral = Some(peripheral);
    }

    /// Detach the peripheral.
    pub fn detach_peripheral(&mut self) -> Option<Box<dyn PeripheralClock>> {
        self.peripheral.take()
    }

    /// Zero every counter and drop the CPU interrupt level to 0.
    pub fn reset(&mut self, cpu: &mut dyn InterruptLine) {
        self.scanline = 0;
        self.line_cycles = 0;
        self.frame_cycles = 0;
        self.frame_count = 0;
        self.hbl_pending = false;
        self.vbl_pending = false;
        self.current_ipl = 0;
        self.mfp_accum = 0;
        self.frame_complete = false;
        cpu.set_vector_override(None);
        cpu.set_ipl(0);
    }

    /// Account for `cpu_cycles` executed cycles.
    pub fn clock(&mut self, cpu_cycles: u32, cpu: &mut dyn InterruptLine) -> GlueEvents {
        let mut events = GlueEvents::default();

        // Peripheral clock at 4/13 of the CPU rate, remainder carried
        self.mfp_accum += cpu_cycles * MFP_RATIO_NUM;
        let mfp_cycles = self.mfp_accum / MFP_RATIO_DEN;
        self.mfp_accum %= MFP_RATIO_DEN;
        let mfp_pending = match self.peripheral.as_mut() {
            Some(p) => {
                if mfp_cycles > 0 {
                    p.clock(mfp_cycles);
                }
                p.irq_pending()
            }
            None => false,
        };

        self.line_cycles += cpu_cycles;
        self.frame_cycles += u64::from(cpu_cycles);
        while self.line_cycles >= CYCLES_PER_LINE {
            self.line_cycles -= CYCLES_PER_LINE;
            self.advance_line();
            events.lines += 1;
        }

        events.hbl = self.hbl_pending;
        events.vbl = self.vbl_pending;
        events.mfp = mfp_pending;

        let level = if mfp_pending {
            levels::MFP
        } else if self.vbl_pending {
            levels::VBL
        } else if self.hbl_pending {
            levels::HBL
        } else {
            0
        };

        // the MFP's highest pending channel can change while level 6 is held
        if level == levels::MFP {
            let vector = self.peripheral.as_ref().map(|p| p.irq_vector());
            cpu.set_vector_override(vector);
        }
        if level != self.current_ipl {
            self.current_ipl = level;
            cpu.set_ipl(level);
        }
        events.level = level;

        self.hbl_pending = false;
        self.vbl_pending = false;
        events
    }

    /// The CPU accepted the level last pushed; the next arbitration pushes
    /// again even if the computed level is unchanged.
    pub fn interrupt_acknowledged(&mut self) {
        self.current_ipl = 0;
    }

    fn advance_line(&mut self) {
        self.scanline += 1;
        if self.scanline >= self.standard.lines_per_frame() {
            self.scanline = 0;
            self.frame_count += 1;
            self.frame_cycles = u64::from(self.line_cycles);
            self.frame_complete = true;
        }
        if self.standard.in_window(self.scanline) {
            self.hbl_pending = true;
        }
        if self.scanline == self.standard.vbl_line() {
            self.vbl_pending = true;
        }
    }

    /// Consume the end-of-frame latch.
    pub fn take_frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_complete)
    }

    /// Current scanline.
    pub fn scanline(&self) -> u32 {
        self.scanline
    }

    /// Cycles into the current scanline.
    pub fn line_cycles(&self) -> u32 {
        self.line_cycles
    }

    /// Cycles into the current frame.
    pub fn frame_cycles(&self) -> u64 {
        self.frame_cycles
    }

    /// Frames completed since reset.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Level last pushed to the CPU.
    pub fn interrupt_level(&self) -> u8 {
        self.current_ipl
    }

    /// Television standard.
    pub fn standard(&self) -> VideoStandard {
        self.standard
    }

    /// Bitmap row shown on `line`, if any.
    pub fn display_row(&self, line: u32) -> Option<u32> {
        let first = self.standard.first_display_line();
        (first..first + DISPLAY_LINES)
            .contains(&line)
            .then(|| line - first)
    }
}

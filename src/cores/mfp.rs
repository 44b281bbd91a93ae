//! MC68901 Multi-Function Peripheral.
//!
//! Four timers and the 16-channel interrupt controller of the Atari ST MFP.
//! Serial I/O is not emulated. The chip is clocked in MFP cycles
//! (2.4576 MHz) by the GLUE and answers the byte registers at odd addresses
//! of 0xFFFA00-0xFFFA3F.
//!
//! ## Register map (odd bytes only)
//!
//! | Offset | Register | Description |
//! |--------|----------|-------------|
//! | 0x01   | GPIP     | General purpose I/O |
//! | 0x03   | AER      | Active edge |
//! | 0x05   | DDR      | Data direction |
//! | 0x07   | IERA     | Interrupt enable A |
//! | 0x09   | IERB     | Interrupt enable B |
//! | 0x0B   | IPRA     | Interrupt pending A |
//! | 0x0D   | IPRB     | Interrupt pending B |
//! | 0x0F   | ISRA     | Interrupt in-service A |
//! | 0x11   | ISRB     | Interrupt in-service B |
//! | 0x13   | IMRA     | Interrupt mask A |
//! | 0x15   | IMRB     | Interrupt mask B |
//! | 0x17   | VR       | Vector register |
//! | 0x19   | TACR     | Timer A control |
//! | 0x1B   | TBCR     | Timer B control |
//! | 0x1D   | TCDCR    | Timer C/D control |
//! | 0x1F   | TADR     | Timer A data |
//! | 0x21   | TBDR     | Timer B data |
//! | 0x23   | TCDR     | Timer C data |
//! | 0x25   | TDDR     | Timer D data |
//!
//! Interrupt channels are numbered 0 (lowest priority) to 15. The A
//! registers hold channels 8-15, the B registers channels 0-7, so the pair
//! reads naturally as one 16-bit word.

use std::ops::RangeInclusive;

use log::debug;

use crate::bus::IoDevice;
use crate::component::{Component, IoComponent, MappedComponent, PeripheralClock};
use crate::error::{CoreError, Result};

/// First register address.
pub const MFP_BASE: u32 = 0xFF_FA00;
/// Last address of the MFP window.
pub const MFP_END: u32 = 0xFF_FA3F;

/// MFP input clock in Hz.
pub const MFP_CLOCK_HZ: u32 = 2_457_600;

/// Prescaler divisors by control register bits 0-2.
const PRESCALER_DIV: [u32; 8] = [0, 4, 10, 16, 50, 64, 100, 200];

const REG_GPIP: u32 = 0x01;
const REG_AER: u32 = 0x03;
const REG_DDR: u32 = 0x05;
const REG_IERA: u32 = 0x07;
const REG_IERB: u32 = 0x09;
const REG_IPRA: u32 = 0x0B;
const REG_IPRB: u32 = 0x0D;
const REG_ISRA: u32 = 0x0F;
const REG_ISRB: u32 = 0x11;
const REG_IMRA: u32 = 0x13;
const REG_IMRB: u32 = 0x15;
const REG_VR: u32 = 0x17;
const REG_TACR: u32 = 0x19;
const REG_TBCR: u32 = 0x1B;
const REG_TCDCR: u32 = 0x1D;
const REG_TADR: u32 = 0x1F;
const REG_TDDR: u32 = 0x25;

/// Interrupt channel numbers.
pub mod channels {
    /// Centronics busy
    pub const GPI0: u8 = 0;
    /// Timer D (baud rate)
    pub const TIMER_D: u8 = 4;
    /// Timer C (200 Hz system tick)
    pub const TIMER_C: u8 = 5;
    /// Keyboard / MIDI ACIA
    pub const GPI4: u8 = 6;
    /// Timer B (display enable counter)
    pub const TIMER_B: u8 = 8;
    /// Timer A
    pub const TIMER_A: u8 = 13;
    /// Monochrome detect
    pub const GPI7: u8 = 15;
}

const TIMER_CHANNELS: [u8; 4] = [
    channels::TIMER_A,
    channels::TIMER_B,
    channels::TIMER_C,
    channels::TIMER_D,
];

/// Timer selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerId {
    /// Timer A
    A = 0,
    /// Timer B
    B = 1,
    /// Timer C
    C = 2,
    /// Timer D
    D = 3,
}

#[derive(Debug, Default, Clone)]
struct Timer {
    control: u8,
    data: u8,
    counter: u8,
    prescale: u32,
    input: bool,
}

impl Timer {
    fn reset(&mut self) {
        *self = Timer::default();
    }

    fn is_event_mode(&self) -> bool {
        self.control == 0x08
    }

    /// Prescaler divisor; pulse-width modes count like delay mode.
    fn divisor(&self) -> u32 {
        if self.is_event_mode() {
            0
        } else {
            PRESCALER_DIV[(self.control & 7) as usize]
        }
    }

    fn set_control(&mut self, control: u8) {
        let was_stopped = self.control == 0;
        self.control = control;
        if was_stopped && control != 0 {
            self.prescale = 0;
        }
    }

    fn set_data(&mut self, data: u8) {
        self.data = data;
        // a stopped timer loads its counter immediately
        if self.control == 0 {
            self.counter = data;
        }
    }

    /// Decrement once; true when the counter passed through zero.
    fn count(&mut self) -> bool {
        if self.counter == 1 {
            self.counter = self.data;
            true
        } else {
            self.counter = self.counter.wrapping_sub(1);
            false
        }
    }

    /// Run for `cycles` MFP clocks and return how many times the timer fired.
    fn clock(&mut self, cycles: u32) -> u32 {
        let div = self.divisor();
        if div == 0 {
            return 0;
        }
        self.prescale += cycles;
        let mut fired = 0;
        while self.prescale >= div {
            self.prescale -= div;
            if self.count() {
                fired += 1;
            }
        }
        fired
    }

    /// Drive the timer input pin; true if an active edge fired the timer.
    fn set_input(&mut self, level: bool, rising_active: bool) -> bool {
        let last = self.input;
        self.input = level;
        let edge = if rising_active {
            !last && level
        } else {
            last && !level
        };
        edge && self.is_event_mode() && self.count()
    }
}

/// MC68901 MFP.
#[derive(Debug, Clone)]
pub struct Mfp68901 {
    timers: [Timer; 4],
    gpip: u8,
    gpio_inputs: u8,
    aer: u8,
    ddr: u8,
    ier: u16,
    ipr: u16,
    isr: u16,
    imr: u16,
    vr: u8,
}

impl Default for Mfp68901 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mfp68901 {
    /// MFP in its power-on state.
    pub fn new() -> Self {
        Self {
            timers: Default::default(),
            gpip: 0,
            gpio_inputs: 0x80,
            aer: 0,
            ddr: 0,
            ier: 0,
            ipr: 0,
            isr: 0,
            imr: 0,
            vr: 0,
        }
    }

    fn software_eoi(&self) -> bool {
        self.vr & 0x08 != 0
    }

    fn request(&mut self, channel: u8) {
        let bit = 1u16 << channel;
        if self.ier & bit != 0 {
            self.ipr |= bit;
        }
    }

    /// Highest-priority channel that is pending, unmasked and not blocked
    /// by an in-service channel of equal or higher priority.
    fn active_channel(&self) -> Option<u8> {
        let candidates = self.ipr & self.imr;
        if candidates == 0 {
            return None;
        }
        let channel = 15 - candidates.leading_zeros() as u8;
        let blocked = self.isr >> channel != 0;
        (!blocked).then_some(channel)
    }

    /// Current counter of a timer.
    pub fn timer_counter(&self, timer: TimerId) -> u8 {
        self.timers[timer as usize].counter
    }

    /// Pending register pair (A in the high byte).
    pub fn pending(&self) -> u16 {
        self.ipr
    }

    /// In-service register pair (A in the high byte).
    pub fn in_service(&self) -> u16 {
        self.isr
    }

    /// Set the level of the general purpose input lines.
    pub fn set_gpio_inputs(&mut self, inputs: u8) {
        let changed = self.gpio_inputs ^ inputs;
        self.gpio_inputs = inputs;
        for line in 0..8u8 {
            if changed & (1 << line) == 0 || self.ddr & (1 << line) != 0 {
                continue;
            }
            let rising = inputs & (1 << line) != 0;
            let active_rising = self.aer & (1 << line) != 0;
            if rising == active_rising {
                if let Some(channel) = gpio_channel(line) {
                    self.request(channel);
                }
            }
        }
    }

    /// Drive the timer A input pin (TAI).
    pub fn set_timer_a_input(&mut self, level: bool) {
        let rising = self.aer & (1 << 4) != 0;
        if self.timers[TimerId::A as usize].set_input(level, rising) {
            self.request(channels::TIMER_A);
        }
    }

    /// Drive the timer B input pin (TBI, display enable on the ST).
    pub fn set_timer_b_input(&mut self, level: bool) {
        let rising = self.aer & (1 << 3) != 0;
        if self.timers[TimerId::B as usize].set_input(level, rising) {
            self.request(channels::TIMER_B);
        }
    }

    fn read_register(&self, reg: u32) -> u8 {
        match reg {
            REG_GPIP => (self.gpip & self.ddr) | (self.gpio_inputs & !self.ddr),
            REG_AER => self.aer,
            REG_DDR => self.ddr,
            REG_IERA => (self.ier >> 8) as u8,
            REG_IERB => self.ier as u8,
            REG_IPRA => (self.ipr >> 8) as u8,
            REG_IPRB => self.ipr as u8,
            REG_ISRA => (self.isr >> 8) as u8,
            REG_ISRB => self.isr as u8,
            REG_IMRA => (self.imr >> 8) as u8,
            REG_IMRB => self.imr as u8,
            REG_VR => self.vr,
            REG_TACR => self.timers[0].control,
            REG_TBCR => self.timers[1].control,
            REG_TCDCR => (self.timers[2].control << 4) | self.timers[3].control,
            REG_TADR..=REG_TDDR => self.timers[((reg - REG_TADR) >> 1) as usize].counter,
            _ => 0xFF,
        }
    }

    fn write_register(&mut self, reg: u32, value: u8) {
        match reg {
            REG_GPIP => self.gpip = (self.gpip & !self.ddr) | (value & self.ddr),
            REG_AER => self.aer = value,
            REG_DDR => self.ddr = value,
            REG_IERA => self.set_enable((self.ier & 0x00FF) | (u16::from(value) << 8)),
            REG_IERB => self.set_enable((self.ier & 0xFF00) | u16::from(value)),
            // pending and in-service bits can only be cleared
            REG_IPRA => self.ipr &= (u16::from(value) << 8) | 0x00FF,
            REG_IPRB => self.ipr &= u16::from(value) | 0xFF00,
            REG_ISRA => self.isr &= (u16::from(value) << 8) | 0x00FF,
            REG_ISRB => self.isr &= u16::from(value) | 0xFF00,
            REG_IMRA => self.imr = (self.imr & 0x00FF) | (u16::from(value) << 8),
            REG_IMRB => self.imr = (self.imr & 0xFF00) | u16::from(value),
            REG_VR => {
                self.vr = value;
                if !self.software_eoi() {
                    self.isr = 0;
                }
            }
            REG_TACR => self.timers[0].set_control(value & 0x0F),
            REG_TBCR => self.timers[1].set_control(value & 0x0F),
            REG_TCDCR => {
                self.timers[2].set_control((value >> 4) & 7);
                self.timers[3].set_control(value & 7);
            }
            REG_TADR..=REG_TDDR => self.timers[((reg - REG_TADR) >> 1) as usize].set_data(value),
            _ => {}
        }
    }

    fn set_enable(&mut self, ier: u16) {
        self.ier = ier;
        // disabling a channel drops its pending request
        self.ipr &= ier;
    }
}

fn gpio_channel(line: u8) -> Option<u8> {
    match line {
        0..=3 => Some(line),
        4 | 5 => Some(line + 2),
        6 | 7 => Some(line + 8),
        _ => None,
    }
}

impl IoDevice for Mfp68901 {
    fn read_byte(&mut self, addr: u32) -> Option<u8> {
        let reg = addr.wrapping_sub(MFP_BASE);
        Some(if reg & 1 == 0 {
            0xFF
        } else {
            self.read_register(reg)
        })
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> bool {
        let reg = addr.wrapping_sub(MFP_BASE);
        if reg & 1 != 0 {
            self.write_register(reg, value);
        }
        true
    }

    fn reset(&mut self) {
        Component::reset(self);
    }
}

impl Component for Mfp68901 {
    fn name(&self) -> &str {
        "mfp68901"
    }

    fn reset(&mut self) {
        for timer in &mut self.timers {
            timer.reset();
        }
        self.gpip = 0;
        self.aer = 0;
        self.ddr = 0;
        self.ier = 0;
        self.ipr = 0;
        self.isr = 0;
        self.imr = 0;
        self.vr = 0;
    }

    fn save_state(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        for timer in &self.timers {
            out.extend_from_slice(&[timer.control, timer.data, timer.counter]);
        }
        out.extend_from_slice(&[self.gpip, self.gpio_inputs, self.aer, self.ddr, self.vr]);
        for reg in [self.ier, self.ipr, self.isr, self.imr] {
            out.extend_from_slice(&reg.to_be_bytes());
        }
        out
    }

    fn load_state(&mut self, state: &[u8]) -> Result<()> {
        if state.len() != 25 {
            return Err(CoreError::InvalidSize {
                what: "MFP state",
                expected: 25,
                actual: state.len(),
            });
        }
        for (timer, chunk) in self.timers.iter_mut().zip(state.chunks_exact(3)) {
            timer.control = chunk[0];
            timer.data = chunk[1];
            timer.counter = chunk[2];
            timer.prescale = 0;
        }
        self.gpip = state[12];
        self.gpio_inputs = state[13];
        self.aer = state[14];
        self.ddr = state[15];
        self.vr = state[16];
        let word = |i: usize| u16::from_be_bytes([state[17 + i * 2], state[18 + i * 2]]);
        self.ier = word(0);
        self.ipr = word(1);
        self.isr = word(2);
        self.imr = word(3);
        Ok(())
    }
}

impl MappedComponent for Mfp68901 {
    fn io_range(&self) -> Option<RangeInclusive<u32>> {
        Some(MFP_BASE..=MFP_END)
    }

    fn io(&mut self) -> &mut dyn IoDevice {
        self
    }
}

impl PeripheralClock for Mfp68901 {
    fn clock(&mut self, cycles: u32) {
        for (index, channel) in TIMER_CHANNELS.iter().enumerate() {
            if self.timers[index].clock(cycles) > 0 {
                self.request(*channel);
            }
        }
    }

    fn irq_pending(&self) -> bool {
        self.active_channel().is_some()
    }

    fn irq_vector(&self) -> u8 {
        let channel = self.active_channel().unwrap_or(0);
        (self.vr & 0xF0) | channel
    }
}

impl IoComponent for Mfp68901 {
    fn acknowledge(&mut self, vector: u8) {
        let channel = vector & 0x0F;
        let bit = 1u16 << channel;
        self.ipr &= !bit;
        if self.software_eoi() {
            self.isr |= bit;
        }
        debug!("mfp: channel {} acknowledged (vector 0x{:02X})", channel, vector);
    }

    fn line_event(&mut self) {
        // display enable falls at the end of each visible line
        self.set_timer_b_input(true);
        self.set_timer_b_input(false);
    }
}

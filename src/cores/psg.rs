//! YM2149 programmable sound generator, register level.
//!
//! The ST wires the PSG at 0xFF8800 (register select / read) and 0xFF8802
//! (register write), mirrored every 4 bytes up to 0xFF88FF. Only the even
//! (upper data bus) byte is decoded.
//!
//! Generation follows the chip's structure: three square-wave tone
//! counters, one 17-bit LFSR noise source and a 32-step envelope, all
//! stepped at the master clock divided by 8.

use std::ops::RangeInclusive;

use crate::bus::{Bus, IoDevice};
use crate::component::{AudioComponent, Component, MappedComponent};
use crate::error::{CoreError, Result};

/// First register address.
pub const PSG_BASE: u32 = 0xFF_8800;
/// Last address of the PSG window.
pub const PSG_END: u32 = 0xFF_88FF;

/// PSG master clock on the ST.
pub const PSG_CLOCK_HZ: u32 = 2_000_000;

/// Default output rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Hardware volume curve for amplitude values 0-15.
pub const VOLUME_TABLE: [u16; 16] = [
    20, 53, 88, 125, 193, 258, 385, 525, 753, 1029, 1523, 2077, 3110, 4395, 7073, 10922,
];

const REG_MASKS: [u8; 16] = [
    0xFF, 0x0F, 0xFF, 0x0F, 0xFF, 0x0F, 0x1F, 0xFF, 0x1F, 0x1F, 0x1F, 0xFF, 0xFF, 0x0F, 0xFF, 0xFF,
];

const REG_MIXER: usize = 7;
const REG_ENV_SHAPE: usize = 13;

const SHAPE_HOLD: u8 = 0x01;
const SHAPE_ALTERNATE: u8 = 0x02;
const SHAPE_ATTACK: u8 = 0x04;
const SHAPE_CONTINUE: u8 = 0x08;

#[derive(Debug, Clone, Default)]
struct Tone {
    counter: u32,
    output: bool,
}

impl Tone {
    fn tick(&mut self, period: u32) -> bool {
        self.counter += 1;
        if self.counter >= period.max(1) {
            self.counter = 0;
            self.output = !self.output;
        }
        self.output
    }
}

#[derive(Debug, Clone)]
struct Noise {
    counter: u32,
    lfsr: u32,
    output: bool,
    half: bool,
}

impl Default for Noise {
    fn default() -> Self {
        Self {
            counter: 0,
            lfsr: 1,
            output: false,
            half: false,
        }
    }
}

impl Noise {
    /// Runs at half the tone rate; 17-bit Galois LFSR, taps 13 and 16.
    fn tick(&mut self, period: u32) -> bool {
        self.half = !self.half;
        if self.half {
            self.counter += 1;
            if self.counter >= period.max(1) {
                self.counter = 0;
                let lsb = self.lfsr & 1;
                self.lfsr >>= 1;
                if lsb != 0 {
                    self.lfsr ^= 0x12000;
                }
                self.output = lsb != 0;
            }
        }
        self.output
    }
}

#[derive(Debug, Clone, Default)]
struct Envelope {
    counter: u32,
    position: u8,
    attack: bool,
    holding: bool,
}

impl Envelope {
    fn restart(&mut self, shape: u8) {
        self.counter = 0;
        self.position = 0;
        self.attack = shape & SHAPE_ATTACK != 0;
        self.holding = false;
    }

    fn level(&self) -> u8 {
        if self.attack {
            self.position
        } else {
            31 - self.position
        }
    }

    fn tick(&mut self, period: u32, shape: u8) {
        if self.holding {
            return;
        }
        self.counter += 1;
        if self.counter < period.max(1) {
            return;
        }
        self.counter = 0;
        if self.position < 31 {
            self.position += 1;
            return;
        }
        if shape & SHAPE_CONTINUE == 0 {
            self.holding = true;
            self.attack = false;
        } else if shape & SHAPE_HOLD != 0 {
            self.holding = true;
            if shape & SHAPE_ALTERNATE != 0 {
                self.attack = !self.attack;
            }
        } else {
            self.position = 0;
            if shape & SHAPE_ALTERNATE != 0 {
                self.attack = !self.attack;
            }
        }
    }
}

/// YM2149 PSG.
#[derive(Debug, Clone)]
pub struct Ym2149 {
    registers: [u8; 16],
    selected: u8,
    tones: [Tone; 3],
    noise: Noise,
    envelope: Envelope,
    sample_rate: u32,
    tick_accum: u32,
}

impl Default for Ym2149 {
    fn default() -> Self {
        Self::new()
    }
}

impl Ym2149 {
    /// Silent chip at the default sample rate.
    pub fn new() -> Self {
        Self {
            registers: [0; 16],
            selected: 0,
            tones: Default::default(),
            noise: Noise::default(),
            envelope: Envelope::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            tick_accum: 0,
        }
    }

    /// Register value.
    pub fn register(&self, index: usize) -> u8 {
        self.registers[index & 15]
    }

    /// Write a register directly.
    pub fn write_register(&mut self, index: usize, value: u8) {
        let index = index & 15;
        self.registers[index] = value & REG_MASKS[index];
        if index == REG_ENV_SHAPE {
            self.envelope.restart(self.registers[REG_ENV_SHAPE]);
        }
    }

    /// Output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn tone_period(&self, channel: usize) -> u32 {
        u32::from(self.registers[channel * 2]) | (u32::from(self.registers[channel * 2 + 1]) << 8)
    }

    fn envelope_period(&self) -> u32 {
        u32::from(self.registers[11]) | (u32::from(self.registers[12]) << 8)
    }

    /// Advance every generator by one clock/8 step.
    fn tick(&mut self) {
        for channel in 0..3 {
            let period = self.tone_period(channel);
            self.tones[channel].tick(period);
        }
        self.noise.tick(u32::from(self.registers[6]));
        self.envelope
            .tick(self.envelope_period(), self.registers[REG_ENV_SHAPE]);
    }

    /// Current mixed output level.
    fn output(&self) -> i16 {
        let mixer = self.registers[REG_MIXER];
        let mut sum = 0u32;
        for channel in 0..3 {
            let tone_off = mixer & (1 << channel) != 0;
            let noise_off = mixer & (1 << (channel + 3)) != 0;
            let gate = (self.tones[channel].output || tone_off) && (self.noise.output || noise_off);
            if !gate {
                continue;
            }
            let amplitude = self.registers[8 + channel];
            let level = if amplitude & 0x10 != 0 {
                self.envelope.level() >> 1
            } else {
                amplitude & 0x0F
            };
            sum += u32::from(VOLUME_TABLE[level as usize]);
        }
        sum.min(i16::MAX as u32) as i16
    }
}

impl IoDevice for Ym2149 {
    fn read_byte(&mut self, addr: u32) -> Option<u8> {
        let offset = addr.wrapping_sub(PSG_BASE);
        Some(if offset & 3 == 0 {
            self.registers[usize::from(self.selected)]
        } else {
            0xFF
        })
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> bool {
        match addr.wrapping_sub(PSG_BASE) & 3 {
            0 => self.selected = value & 0x0F,
            2 => self.write_register(usize::from(self.selected), value),
            _ => {}
        }
        true
    }

    fn reset(&mut self) {
        Component::reset(self);
    }
}

impl Component for Ym2149 {
    fn name(&self) -> &str {
        "ym2149"
    }

    fn reset(&mut self) {
        let rate = self.sample_rate;
        *self = Ym2149::new();
        self.sample_rate = rate;
    }

    fn save_state(&self) -> Vec<u8> {
        let mut out = self.registers.to_vec();
        out.push(self.selected);
        out
    }

    fn load_state(&mut self, state: &[u8]) -> Result<()> {
        if state.len() != 17 {
            return Err(CoreError::InvalidSize {
                what: "PSG state",
                expected: 17,
                actual: state.len(),
            });
        }
        for (index, value) in state[..16].iter().enumerate() {
            self.write_register(index, *value);
        }
        self.selected = state[16] & 0x0F;
        Ok(())
    }
}

impl MappedComponent for Ym2149 {
    fn io_range(&self) -> Option<RangeInclusive<u32>> {
        Some(PSG_BASE..=PSG_END)
    }

    fn io(&mut self) -> &mut dyn IoDevice {
        self
    }
}

impl AudioComponent for Ym2149 {
    fn set_sample_rate(&mut self, hz: u32) {
        self.sample_rate = hz.max(1);
        self.tick_accum = 0;
    }

    fn generate(&mut self, _bus: &mut dyn Bus, out: &mut [i16]) {
        let step_rate = PSG_CLOCK_HZ / 8;
        for sample in out.iter_mut() {
            self.tick_accum += step_rate;
            while self.tick_accum >= self.sample_rate {
                self.tick_accum -= self.sample_rate;
                self.tick();
            }
            *sample = self.output();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryMap;

    fn write(psg: &mut Ym2149, reg: u8, value: u8) {
        psg.write_byte(PSG_BASE, reg);
        psg.write_byte(PSG_BASE + 2, value);
    }

    #[test]
    fn select_then_write_and_read_back() {
        let mut psg = Ym2149::new();
        write(&mut psg, 1, 0xFF);
        assert_eq!(psg.register(1), 0x0F);
        psg.write_byte(PSG_BASE + 0x40, 1);
        assert_eq!(psg.read_byte(PSG_BASE + 0x40), Some(0x0F));
        assert_eq!(psg.read_byte(PSG_BASE + 2), Some(0xFF));
    }

    #[test]
    fn silent_when_all_channels_muted() {
        let mut bus = MemoryMap::new(1024).unwrap();
        let mut psg = Ym2149::new();
        write(&mut psg, 7, 0x3F);
        let mut out = [1i16; 64];
        psg.generate(&mut bus, &mut out);
        // all gates open at volume 0: constant floor
        assert!(out.iter().all(|&s| s == 3 * VOLUME_TABLE[0] as i16));
    }

    #[test]
    fn square_wave_toggles() {
        let mut bus = MemoryMap::new(1024).unwrap();
        let mut psg = Ym2149::new();
        psg.set_sample_rate(250_000);
        write(&mut psg, 0, 4);
        write(&mut psg, 7, 0x3E);
        write(&mut psg, 8, 15);
        let mut out = [0i16; 16];
        psg.generate(&mut bus, &mut out);
        let high = out.iter().filter(|&&s| s > 10_000).count();
        assert_eq!(high, 8);
    }

    #[test]
    fn envelope_decay_then_hold() {
        let mut env = Envelope::default();
        env.restart(0x00);
        assert_eq!(env.level(), 31);
        for _ in 0..31 {
            env.tick(1, 0x00);
        }
        assert_eq!(env.level(), 0);
        env.tick(1, 0x00);
        assert!(env.holding);
        assert_eq!(env.level(), 0);

        env.restart(0x0D);
        for _ in 0..32 {
            env.tick(1, 0x0D);
        }
        assert_eq!(env.level(), 31);
        assert!(env.holding);
    }

    #[test]
    fn state_restores_registers() {
        let mut psg = Ym2149::new();
        write(&mut psg, 8, 12);
        let state = psg.save_state();
        let mut other = Ym2149::new();
        other.load_state(&state).unwrap();
        assert_eq!(other.register(8), 12);
        assert_eq!(other.register(8 + 16), 12);
    }
}

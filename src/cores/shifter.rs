//! ST video shifter.
//!
//! Holds the video base address, palette and resolution registers and
//! decodes planar bitmap lines from RAM into an RGB [`FrameBuffer`]. The
//! base address is latched into the video address counter at vertical
//! blank; each rendered row then fetches one line of words through the bus.

use std::ops::RangeInclusive;

use crate::bus::{Bus, IoDevice, IO_BASE};
use crate::component::{Component, FrameBuffer, MappedComponent, VideoComponent};
use crate::error::{CoreError, Result};
use crate::glue::DISPLAY_LINES;

/// First register address.
pub const SHIFTER_BASE: u32 = 0xFF_8200;
/// Last address of the shifter window.
pub const SHIFTER_END: u32 = 0xFF_827F;

const REG_BASE_HI: u32 = 0x01;
const REG_BASE_MID: u32 = 0x03;
const REG_COUNTER_HI: u32 = 0x05;
const REG_COUNTER_MID: u32 = 0x07;
const REG_COUNTER_LO: u32 = 0x09;
const REG_SYNC: u32 = 0x0A;
const REG_PALETTE: u32 = 0x40;
const REG_PALETTE_END: u32 = 0x5F;
const REG_RESOLUTION: u32 = 0x60;

/// Bytes of bitmap per line, identical in every resolution.
pub const LINE_BYTES: u32 = 160;

/// Display resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 320x200, 4 planes
    Low,
    /// 640x200, 2 planes
    Medium,
    /// 640x400, 1 plane (only the first 200 lines are shown)
    High,
}

impl Resolution {
    fn from_register(value: u8) -> Self {
        match value & 3 {
            0 => Resolution::Low,
            1 => Resolution::Medium,
            _ => Resolution::High,
        }
    }

    fn register(self) -> u8 {
        match self {
            Resolution::Low => 0,
            Resolution::Medium => 1,
            Resolution::High => 2,
        }
    }

    /// Bit planes.
    pub fn planes(self) -> usize {
        match self {
            Resolution::Low => 4,
            Resolution::Medium => 2,
            Resolution::High => 1,
        }
    }

    /// Pixels per line.
    pub fn width(self) -> usize {
        match self {
            Resolution::Low => 320,
            Resolution::Medium | Resolution::High => 640,
        }
    }
}

/// Expand a 9-bit ST colour (0x0RGB, 3 bits per gun) to 0x00RRGGBB.
pub fn st_color_to_rgb(color: u16) -> u32 {
    let expand = |c: u16| -> u32 {
        let c = u32::from(c & 7);
        (c << 5) | (c << 2) | (c >> 1)
    };
    (expand(color >> 8) << 16) | (expand(color >> 4) << 8) | expand(color)
}

/// ST shifter.
#[derive(Debug, Clone)]
pub struct Shifter {
    base: u32,
    counter: u32,
    sync: u8,
    palette: [u16; 16],
    resolution: Resolution,
    frame: FrameBuffer,
}

impl Default for Shifter {
    fn default() -> Self {
        Self::new()
    }
}

impl Shifter {
    /// Shifter in low resolution with a black palette.
    pub fn new() -> Self {
        Self {
            base: 0,
            counter: 0,
            sync: 0,
            palette: [0; 16],
            resolution: Resolution::Low,
            frame: FrameBuffer::new(Resolution::Low.width(), DISPLAY_LINES as usize),
        }
    }

    /// Video base address (latched at the next frame start).
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Video address counter.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Current resolution.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Palette entry `index` (0x0RGB).
    pub fn palette(&self, index: usize) -> u16 {
        self.palette[index & 15]
    }

    fn decode_line(&mut self, words: &[u16], row: usize) {
        let planes = self.resolution.planes();
        let width = self.frame.width;
        let out = &mut self.frame.pixels[row * width..(row + 1) * width];
        for (group, chunk) in words.chunks_exact(planes).enumerate() {
            for bit in 0..16 {
                let shift = 15 - bit;
                let mut index = 0usize;
                for (plane, word) in chunk.iter().enumerate() {
                    index |= usize::from((word >> shift) & 1) << plane;
                }
                let color = match self.resolution {
                    // mono: palette entry 0 bit 0 set means clear pixels are white
                    Resolution::High => {
                        let white = (index == 0) == (self.palette[0] & 1 != 0);
                        if white {
                            0x00FF_FFFF
                        } else {
                            0
                        }
                    }
                    _ => st_color_to_rgb(self.palette[index]),
                };
                if let Some(px) = out.get_mut(group * 16 + bit) {
                    *px = color;
                }
            }
        }
    }
}

impl IoDevice for Shifter {
    fn read_byte(&mut self, addr: u32) -> Option<u8> {
        let reg = addr.wrapping_sub(SHIFTER_BASE);
        let value = match reg {
            REG_BASE_HI => (self.base >> 16) as u8,
            REG_BASE_MID => (self.base >> 8) as u8,
            REG_COUNTER_HI => (self.counter >> 16) as u8,
            REG_COUNTER_MID => (self.counter >> 8) as u8,
            REG_COUNTER_LO => self.counter as u8,
            REG_SYNC => self.sync,
            REG_PALETTE..=REG_PALETTE_END => {
                let entry = self.palette[((reg - REG_PALETTE) >> 1) as usize];
                if reg & 1 == 0 {
                    (entry >> 8) as u8
                } else {
                    entry as u8
                }
            }
            REG_RESOLUTION => self.resolution.register(),
            _ => 0xFF,
        };
        Some(value)
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> bool {
        let reg = addr.wrapping_sub(SHIFTER_BASE);
        match reg {
            REG_BASE_HI => self.base = (self.base & 0x00_FF00) | (u32::from(value) << 16),
            REG_BASE_MID => self.base = (self.base & 0xFF_0000) | (u32::from(value) << 8),
            REG_SYNC => self.sync = value & 0x03,
            REG_PALETTE..=REG_PALETTE_END => {
                let slot = &mut self.palette[((reg - REG_PALETTE) >> 1) as usize];
                let merged = if reg & 1 == 0 {
                    (*slot & 0x00FF) | (u16::from(value) << 8)
                } else {
                    (*slot & 0xFF00) | u16::from(value)
                };
                *slot = merged & 0x0777;
            }
            REG_RESOLUTION => self.resolution = Resolution::from_register(value),
            _ => {}
        }
        true
    }

    fn reset(&mut self) {
        Component::reset(self);
    }
}

impl Component for Shifter {
    fn name(&self) -> &str {
        "shifter"
    }

    fn reset(&mut self) {
        *self = Shifter::new();
    }

    fn save_state(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(40);
        out.extend_from_slice(&self.base.to_be_bytes());
        out.extend_from_slice(&self.counter.to_be_bytes());
        out.push(self.sync);
        out.push(self.resolution.register());
        for entry in &self.palette {
            out.extend_from_slice(&entry.to_be_bytes());
        }
        out
    }

    fn load_state(&mut self, state: &[u8]) -> Result<()> {
        if state.len() != 42 {
            return Err(CoreError::InvalidSize {
                what: "shifter state",
                expected: 42,
                actual: state.len(),
            });
        }
        self.base = u32::from_be_bytes([state[0], state[1], state[2], state[3]]);
        self.counter = u32::from_be_bytes([state[4], state[5], state[6], state[7]]);
        self.sync = state[8];
        self.resolution = Resolution::from_register(state[9]);
        for (entry, pair) in self.palette.iter_mut().zip(state[10..].chunks_exact(2)) {
            *entry = u16::from_be_bytes([pair[0], pair[1]]);
        }
        Ok(())
    }
}

impl MappedComponent for Shifter {
    fn io_range(&self) -> Option<RangeInclusive<u32>> {
        Some(SHIFTER_BASE..=SHIFTER_END)
    }

    fn io(&mut self) -> &mut dyn IoDevice {
        self
    }
}

impl VideoComponent for Shifter {
    fn start_frame(&mut self) {
        self.counter = self.base;
        let width = self.resolution.width();
        if self.frame.width != width {
            self.frame = FrameBuffer::new(width, DISPLAY_LINES as usize);
        }
    }

    fn render_line(&mut self, bus: &mut dyn Bus, row: u32) {
        let row = row as usize;
        if row >= self.frame.height {
            return;
        }
        let mut words = [0u16; (LINE_BYTES / 2) as usize];
        for (i, word) in words.iter_mut().enumerate() {
            let addr = self.counter + (i as u32) * 2;
            // the I/O page is never fetched as screen memory
            *word = if addr >= IO_BASE {
                0xFFFF
            } else {
                bus.read_word(addr)
            };
        }
        self.counter = (self.counter + LINE_BYTES) & 0x00FF_FFFF;
        self.decode_line(&words, row);
    }

    fn frame(&self) -> &FrameBuffer {
        &self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryMap;

    #[test]
    fn colour_expansion() {
        assert_eq!(st_color_to_rgb(0x0000), 0x0000_0000);
        assert_eq!(st_color_to_rgb(0x0777), 0x00FF_FFFF);
        assert_eq!(st_color_to_rgb(0x0700), 0x00FF_0000);
        assert_eq!(st_color_to_rgb(0x0004), 0x0000_0092);
    }

    #[test]
    fn base_register_and_latch() {
        let mut shifter = Shifter::new();
        shifter.write_byte(SHIFTER_BASE + REG_BASE_HI, 0x07);
        shifter.write_byte(SHIFTER_BASE + REG_BASE_MID, 0x80);
        assert_eq!(shifter.base(), 0x07_8000);
        assert_eq!(shifter.counter(), 0);
        shifter.start_frame();
        assert_eq!(shifter.counter(), 0x07_8000);
        assert_eq!(shifter.read_byte(SHIFTER_BASE + REG_COUNTER_MID), Some(0x80));
    }

    #[test]
    fn palette_word_access_masks_to_nine_bits() {
        let mut shifter = Shifter::new();
        shifter.write_byte(SHIFTER_BASE + REG_PALETTE + 2, 0xFF);
        shifter.write_byte(SHIFTER_BASE + REG_PALETTE + 3, 0xFF);
        assert_eq!(shifter.palette(1), 0x0777);
    }

    #[test]
    fn low_res_line_decodes_planes() {
        let mut bus = MemoryMap::new(64 * 1024).unwrap();
        let mut shifter = Shifter::new();
        shifter.palette[1] = 0x0700;
        shifter.palette[2] = 0x0070;
        shifter.palette[3] = 0x0007;
        // first 16 pixels: plane 0 = 0xF000, plane 1 = 0x3C00
        bus.upload(0x8000, &[0xF0, 0x00, 0x3C, 0x00, 0x00, 0x00, 0x00, 0x00])
            .unwrap();
        shifter.base = 0x8000;
        shifter.start_frame();
        shifter.render_line(&mut bus, 0);

        let row = shifter.frame().row(0);
        assert_eq!(row[0], st_color_to_rgb(0x0700));
        assert_eq!(row[2], st_color_to_rgb(0x0007));
        assert_eq!(row[4], st_color_to_rgb(0x0070));
        assert_eq!(row[6], 0);
        assert_eq!(shifter.counter(), 0x8000 + LINE_BYTES);
    }

    #[test]
    fn resolution_change_resizes_frame() {
        let mut shifter = Shifter::new();
        shifter.write_byte(SHIFTER_BASE + REG_RESOLUTION, 1);
        shifter.start_frame();
        assert_eq!(shifter.frame().width, 640);
        assert_eq!(shifter.resolution(), Resolution::Medium);
    }
}

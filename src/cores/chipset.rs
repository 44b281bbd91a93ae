//! The `st-chipset` unified module: CPU, shifter, PSG and MFP in one bundle.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Mfp68901, Shifter, Ym2149};
use crate::component::{
    AudioComponent, SharedAudio, SharedCpu, SharedIo, SharedVideo, SystemBundle,
};
use crate::cpu::Cpu68000;

/// Bundle name.
pub const CHIPSET_NAME: &str = "st-chipset";

/// A complete ST chipset, every member in its power-on state.
pub fn st_chipset(sample_rate: Option<u32>) -> SystemBundle {
    let cpu: SharedCpu = Arc::new(Mutex::new(Cpu68000::new()));
    let video: SharedVideo = Arc::new(Mutex::new(Shifter::new()));
    let mut psg = Ym2149::new();
    if let Some(rate) = sample_rate {
        psg.set_sample_rate(rate);
    }
    let audio: SharedAudio = Arc::new(Mutex::new(psg));
    let io: SharedIo = Arc::new(Mutex::new(Mfp68901::new()));
    SystemBundle::new(CHIPSET_NAME)
        .with_cpu(cpu)
        .with_video(video)
        .with_audio(audio)
        .with_io(io)
}

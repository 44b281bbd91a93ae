//! Whole machines assembled from modules on disk and run frame by frame.

use std::path::Path;

use st_core::{
    Bus, Component, ComponentKind, Loader, Machine, MachineProfile, ModuleBuilder, SlotConfig,
};

const STACK: u32 = 0x8000;
const START: u32 = 0x400;
const VBL_HANDLER: u32 = 0x600;
const TIMER_HANDLER: u32 = 0x610;

fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

fn data_register(machine: &Machine, n: usize) -> u32 {
    let state = machine.cpu().lock().save_state();
    u32::from_be_bytes([state[n * 4], state[n * 4 + 1], state[n * 4 + 2], state[n * 4 + 3]])
}

fn write_module(dir: &Path, file: &str, kind: ComponentKind, entry: &str) -> anyhow::Result<()> {
    let image = ModuleBuilder::new(kind)
        .code(vec![0x4E, 0x71, 0x4E, 0x75])
        .entry(entry, 0)
        .build()?;
    std::fs::write(dir.join(file), image)?;
    Ok(())
}

/// Writes the four discrete modules and a profile that names them with
/// relative paths.
fn st_profile(dir: &Path) -> anyhow::Result<MachineProfile> {
    write_module(dir, "cpu.ebin", ComponentKind::Cpu, "mc68000")?;
    write_module(dir, "shifter.ebin", ComponentKind::Video, "shifter")?;
    write_module(dir, "psg.ebin", ComponentKind::Audio, "ym2149")?;
    write_module(dir, "mfp.ebin", ComponentKind::Io, "mfp68901")?;
    let json = r#"{
        "name": "test-st",
        "video_standard": "pal",
        "cpu": { "module": "cpu.ebin" },
        "video": { "module": "shifter.ebin" },
        "audio": [{ "module": "psg.ebin", "role": "psg" }],
        "io": [{ "module": "mfp.ebin", "role": "mfp" }]
    }"#;
    let path = dir.join("st.json");
    std::fs::write(&path, json)?;
    Ok(MachineProfile::from_path(&path)?)
}

/// Main program enables level 3 and up, then spins. The VBL handler counts
/// in D7 and the timer A handler counts in D6.
fn boot(machine: &mut Machine) -> anyhow::Result<()> {
    let bus = machine.bus_mut();
    bus.upload(0, &STACK.to_be_bytes())?;
    bus.upload(4, &START.to_be_bytes())?;
    bus.upload(0x70, &VBL_HANDLER.to_be_bytes())?;
    bus.upload(0x4D * 4, &TIMER_HANDLER.to_be_bytes())?;
    // MOVE #$2300,SR ; BRA.S *
    bus.upload(START, &words_to_bytes(&[0x46FC, 0x2300, 0x60FE]))?;
    // ADDQ.L #1,D7 ; RTE
    bus.upload(VBL_HANDLER, &words_to_bytes(&[0x5287, 0x4E73]))?;
    // ADDQ.L #1,D6 ; RTE
    bus.upload(TIMER_HANDLER, &words_to_bytes(&[0x5286, 0x4E73]))?;
    machine.warm_reset();
    Ok(())
}

#[test]
fn profile_assembles_every_slot() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let machine = Machine::assemble(st_profile(dir.path())?, Loader::default())?;
    assert_eq!(machine.registry().len(), 4);
    for role in ["cpu", "video", "psg", "mfp"] {
        assert!(machine.component(role).is_some(), "missing role {role}");
    }
    let names: Vec<&str> = machine.bus().handlers().iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"mfp"));
    assert!((machine.frame_rate() - 49.92).abs() < 0.01);
    Ok(())
}

#[test]
fn vbl_interrupt_fires_once_per_frame() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut machine = Machine::assemble(st_profile(dir.path())?, Loader::default())?;
    boot(&mut machine)?;

    for n in 1..=3u32 {
        let report = machine.run_frame()?;
        assert_eq!(report.frame, u64::from(n));
        assert_eq!(report.rows, 200);
        assert!(report.interrupts >= 1);
        assert!((160_000..=160_600).contains(&report.cycles), "{} cycles", report.cycles);
        assert!(!report.cpu_stopped);
    }
    assert_eq!(data_register(&machine, 7), 3);
    Ok(())
}

#[test]
fn palette_write_reaches_the_frame() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut machine = Machine::assemble(st_profile(dir.path())?, Loader::default())?;
    boot(&mut machine)?;

    let bus = machine.bus_mut();
    // screen at 0x10000, colour 0 bright red
    bus.write_byte(0xFF_8201, 0x01);
    bus.write_byte(0xFF_8203, 0x00);
    bus.write_word(0xFF_8240, 0x0700);

    machine.run_frame()?;
    machine.run_frame()?;
    let frame = machine.frame().expect("video slot");
    assert_eq!(frame.row(0).len(), 320);
    assert!(frame.row(0).iter().all(|&px| px == 0x00FF_0000));
    assert!(frame.row(199).iter().all(|&px| px == 0x00FF_0000));
    Ok(())
}

#[test]
fn psg_tone_produces_a_frame_of_samples() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut machine = Machine::assemble(st_profile(dir.path())?, Loader::default())?;
    boot(&mut machine)?;

    let bus = machine.bus_mut();
    for (reg, value) in [(7u8, 0x3Eu8), (8, 15), (0, 0x40), (1, 0)] {
        bus.write_byte(0xFF_8800, reg);
        bus.write_byte(0xFF_8802, value);
    }

    let report = machine.run_frame()?;
    // 44100 Hz over 313 lines of 512 cycles at 8 MHz
    assert!((880..=886).contains(&report.samples), "{} samples", report.samples);
    let samples = machine.audio_samples();
    assert_eq!(samples.len(), report.samples);
    let (lo, hi) = samples
        .iter()
        .fold((i16::MAX, i16::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    assert!(hi > lo, "flat output {lo}..{hi}");
    Ok(())
}

#[test]
fn mfp_timer_a_interrupts_through_the_glue() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut machine = Machine::assemble(st_profile(dir.path())?, Loader::default())?;
    boot(&mut machine)?;

    let bus = machine.bus_mut();
    bus.write_byte(0xFF_FA17, 0x40); // vectors 0x40-0x4F, automatic end of interrupt
    bus.write_byte(0xFF_FA07, 0x20); // enable timer A
    bus.write_byte(0xFF_FA13, 0x20); // unmask timer A
    bus.write_byte(0xFF_FA1F, 100);
    bus.write_byte(0xFF_FA19, 0x01); // delay mode, divide by 4

    let report = machine.run_frame()?;
    let d6 = data_register(&machine, 6);
    // 2.4576 MHz / 400 over one frame is about 123
    assert!((100..=140).contains(&d6), "{d6} timer interrupts");
    assert!(report.interrupts >= d6);
    Ok(())
}

#[test]
fn shutdown_unmaps_and_unloads_everything() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut machine = Machine::assemble(st_profile(dir.path())?, Loader::default())?;
    machine.run_frame()?;
    machine.shutdown();
    machine.shutdown();
    assert!(machine.bus().handlers().is_empty());
    assert_eq!(machine.loader().loaded().count(), 0);
    assert!(machine.registry().is_empty());
    assert!(machine.run_frame().is_err());
    Ok(())
}

#[test]
fn chipset_bundle_fills_every_role() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let image = ModuleBuilder::new(ComponentKind::System)
        .code(vec![0x4E, 0x75])
        .entry("st-chipset", 0)
        .build()?;
    let path = dir.path().join("chipset.ebin");
    std::fs::write(&path, image)?;

    let mut profile = MachineProfile::new("bundled");
    profile.system = Some(SlotConfig::new(&path));
    let mut machine = Machine::assemble(profile, Loader::default())?;
    assert_eq!(machine.registry().len(), 1);
    assert_eq!(machine.bus().handlers().len(), 3);
    boot(&mut machine)?;
    let report = machine.run_frame()?;
    assert_eq!(report.rows, 200);
    assert!(report.samples > 0);
    Ok(())
}

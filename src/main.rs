//! Command-line front end: run a machine profile, inspect and pack EBIN
//! modules.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use st_core::loader::format::{parse_relocations, parse_symbols};
use st_core::loader::{CoreCatalog, InterfaceVersion, ModuleBuilder, ModuleHeader, RelocKind};
use st_core::{ComponentKind, Loader, Machine, MachineControl, MachineProfile};

#[derive(Parser)]
#[command(name = "st-core")]
#[command(about = "Atari ST emulation core: run machines and manage EBIN modules")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a machine from a JSON profile and run it
    Run {
        /// Machine profile
        #[arg(short, long)]
        profile: PathBuf,

        /// Frames to run
        #[arg(short, long, default_value_t = 50)]
        frames: u64,
    },

    /// Print the header, relocations and symbols of a module
    Inspect {
        /// Module file
        module: PathBuf,
    },

    /// Write a minimal module that selects a built-in core
    Pack {
        /// Component kind (cpu, video, audio, io, system)
        #[arg(short, long)]
        kind: ComponentKind,

        /// Catalog entry name
        #[arg(short, long)]
        entry: String,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,

        /// Audio rate stored in the data section
        #[arg(long)]
        sample_rate: Option<u32>,
    },

    /// List the built-in cores
    Cores,
}

fn run(profile: PathBuf, frames: u64) -> Result<()> {
    let profile = MachineProfile::from_path(&profile)
        .with_context(|| format!("loading profile {}", profile.display()))?;
    let mut machine = Machine::assemble(profile, Loader::default())?;
    println!(
        "{}: {} components, {:.2} frames/s at {} Hz",
        machine.profile().name,
        machine.registry().len(),
        machine.frame_rate(),
        machine.cpu_clock_hz()
    );

    let control = MachineControl::new();
    let started = Instant::now();
    let ran = machine.run(&control, Some(frames))?;
    let elapsed = started.elapsed();

    let cpu = machine.cpu().lock();
    println!(
        "{} frames in {:.2?} ({:.1}x real time), PC 0x{:06X}, {} cycles{}",
        ran,
        elapsed,
        ran as f64 / machine.frame_rate() / elapsed.as_secs_f64().max(f64::EPSILON),
        cpu.pc(),
        cpu.total_cycles(),
        if cpu.is_stopped() { ", CPU stopped" } else { "" }
    );
    drop(cpu);

    let stats = machine.bus().stats();
    println!(
        "bus: {} reads, {} writes, {} bus faults, {} address faults",
        stats.reads, stats.writes, stats.bus_faults, stats.address_faults
    );
    machine.shutdown();
    Ok(())
}

fn inspect(path: PathBuf) -> Result<()> {
    let data = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let header = ModuleHeader::parse(&data)?;
    header.validate(data.len())?;

    let kind = header
        .component_kind()
        .map(|k| k.to_string())
        .unwrap_or_else(|| format!("unknown ({})", header.kind));
    println!("{}", path.display());
    println!("  format version   {}", header.version);
    println!("  kind             {}", kind);
    println!("  flags            {:?}", header.flags());
    println!(
        "  interface        {}",
        InterfaceVersion::from_packed(header.interface_version)
    );
    println!(
        "  code/data/bss    {} / {} / {} bytes",
        header.code_size, header.data_size, header.bss_size
    );
    println!("  entry offset     0x{:X}", header.entry_offset);
    println!("  min memory       {} bytes", header.min_memory);

    let relocs = parse_relocations(&data, &header)?;
    println!("  relocations      {}", relocs.len());
    for r in &relocs {
        let kind = RelocKind::from_raw(r.kind)
            .map(|k| format!("{k:?}"))
            .unwrap_or_else(|| format!("raw {}", r.kind));
        println!("    section {} +0x{:06X}  {}", r.section, r.offset, kind);
    }

    let symbols = parse_symbols(&data, &header)?;
    println!("  symbols          {}", symbols.len());
    for s in &symbols {
        println!("    section {} +0x{:06X}  {}", s.section, s.offset, s.name);
    }
    Ok(())
}

fn pack(kind: ComponentKind, entry: String, out: PathBuf, sample_rate: Option<u32>) -> Result<()> {
    let catalog = CoreCatalog::with_builtin_cores();
    match catalog.get(&entry) {
        Some(core) if core.kind() == kind => {}
        Some(core) => bail!("core '{}' is a {} core, not {}", entry, core.kind(), kind),
        None => bail!("no built-in core named '{}'", entry),
    }

    // NOP ; RTS as a token entry point
    let mut builder = ModuleBuilder::new(kind)
        .code(vec![0x4E, 0x71, 0x4E, 0x75])
        .entry(entry.as_str(), 0);
    if let Some(rate) = sample_rate {
        builder = builder.data(rate.to_le_bytes().to_vec());
    }
    let image = builder.build()?;
    fs::write(&out, &image).with_context(|| format!("writing {}", out.display()))?;
    info!("packed '{}' into {} ({} bytes)", entry, out.display(), image.len());
    println!("{} ({} bytes)", out.display(), image.len());
    Ok(())
}

fn cores() {
    let catalog = CoreCatalog::with_builtin_cores();
    for core in catalog.entries() {
        println!("{:<12} {:<7} {}", core.name(), core.kind(), core.description());
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    match args.command {
        Command::Run { profile, frames } => run(profile, frames),
        Command::Inspect { module } => inspect(module),
        Command::Pack {
            kind,
            entry,
            out,
            sample_rate,
        } => pack(kind, entry, out, sample_rate),
        Command::Cores => {
            cores();
            Ok(())
        }
    }
}

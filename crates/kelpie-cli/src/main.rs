//! `kelpie` — command-line interface for Kelpie fabric switches.
//!
//! ```text
//! USAGE:
//!   kelpie enumerate                 List all switches on the PCI bus
//!   kelpie info <index>              Identity and BAR layout for one switch
//!   kelpie peek <index> <address>    Read a chip-space register
//!   kelpie poke <index> <address> <value>   Write a chip-space register
//! ```
//!
//! Register access goes through the Chime-to-AXI bridge and needs root (for
//! `/dev/mem`). SMP phy operations need a SCSI passthrough path and live in
//! the management daemon, not here.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kelpie_driver::{DevMem, DeviceRegistry, SysfsConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kelpie", about = "Kelpie fabric switch CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List all Kelpie switches and their identities.
    Enumerate,
    /// Print identity and BAR layout for one switch.
    Info {
        /// Device index from `kelpie enumerate`.
        index: usize,
    },
    /// Read a 32-bit chip-space register through the bridge.
    Peek {
        /// Device index from `kelpie enumerate`.
        index: usize,
        /// Chip-space address (hex accepted, e.g. 0xf0000040).
        address: String,
    },
    /// Write a 32-bit chip-space register through the bridge.
    Poke {
        /// Device index from `kelpie enumerate`.
        index: usize,
        /// Chip-space address (hex accepted).
        address: String,
        /// Value to write (hex accepted).
        value: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Enumerate => cmd_enumerate(),
        Cmd::Info { index } => cmd_info(index),
        Cmd::Peek { index, address } => cmd_peek(index, &address),
        Cmd::Poke {
            index,
            address,
            value,
        } => cmd_poke(index, &address, &value),
    }
}

fn scan() -> Result<DeviceRegistry> {
    let config = SysfsConfig::new();
    let mapper = DevMem::new();
    DeviceRegistry::scan(&config, &mapper).context("scanning for Kelpie switches")
}

fn parse_u32(s: &str) -> Result<u32> {
    let trimmed = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(trimmed, 16).with_context(|| format!("`{s}` is not a hex value"))
}

fn cmd_enumerate() -> Result<()> {
    let registry = scan()?;

    println!("Kelpie switches: {}", registry.device_count());
    for (i, dev) in registry.devices().iter().enumerate() {
        println!(
            "  [{i}] {}  {:04x}:{:04x}  {:?} rev {}",
            dev.address(),
            dev.vendor_id(),
            dev.device_id(),
            dev.variant(),
            dev.revision()
        );
    }
    Ok(())
}

fn cmd_info(index: usize) -> Result<()> {
    let registry = scan()?;
    let dev = registry.device(index)?;

    println!("Address:  {}", dev.address());
    println!("Identity: {:04x}:{:04x}", dev.vendor_id(), dev.device_id());
    println!("Variant:  {:?}", dev.variant());
    println!("Revision: {}", dev.revision());
    println!(
        "Phys:     {} (nominal)",
        dev.variant().nominal_phy_count()
    );
    for bar in dev.bars() {
        println!(
            "BAR{}:     base {:#012x}  size {:#x}  {}{}{}",
            bar.index(),
            bar.base(),
            bar.size(),
            if bar.is_memory() { "mem" } else { "io" },
            if bar.is_64bit() { " 64-bit" } else { "" },
            if bar.is_mapped() { " mapped" } else { "" },
        );
    }
    Ok(())
}

fn cmd_peek(index: usize, address: &str) -> Result<()> {
    let address = parse_u32(address)?;
    let mut registry = scan()?;
    let dev = registry.device_mut(index)?;

    let value = dev.chime_read_register(address)?;
    println!("{address:#010x} = {value:#010x}");
    Ok(())
}

fn cmd_poke(index: usize, address: &str, value: &str) -> Result<()> {
    let address = parse_u32(address)?;
    let value = parse_u32(value)?;
    let mut registry = scan()?;
    let dev = registry.device_mut(index)?;

    dev.chime_write_register(address, value)?;
    println!("{address:#010x} <- {value:#010x}");
    Ok(())
}

use std::path::Path;

use anyhow::{Context, Result};
use crossterm::style::{self, Stylize};

use super::format_bytes;
use crate::manifest::Manifest;

pub fn run(path: &Path, json: bool) -> Result<()> {
    let manifest = Manifest::from_file(path)
        .with_context(|| format!("Failed to load manifest {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    print_summary(&manifest);
    Ok(())
}

fn print_summary(m: &Manifest) {
    println!("{}:{}", m.name, m.version);
    println!("  {} {}", "media type".dim(), m.media_type);
    if !m.metadata.platform.arch.is_empty() {
        let uefi = if m.metadata.platform.uefi { " (uefi)" } else { "" };
        println!("  {} {}{uefi}", "arch".dim(), m.metadata.platform.arch);
    }
    if !m.metadata.author.is_empty() {
        println!("  {} {}", "author".dim(), m.metadata.author);
    }
    if !m.metadata.created.is_empty() {
        println!("  {} {}", "created".dim(), m.metadata.created);
    }
    println!();

    println!("{}", "kernel".bold());
    println!("  {}", m.kernel.reference);
    if !m.kernel.args.is_empty() {
        println!("  args: {}", m.kernel.args);
    }
    if let Some(initrd) = &m.initrd {
        println!("{}", "initrd".bold());
        println!("  {}", initrd.reference);
    }
    println!();

    println!(
        "{} ({} total)",
        "disk layers".bold(),
        format_bytes(m.total_disk_size())
    );
    for layer in &m.disk_layers {
        println!("  {}", layer.reference);
        println!("    {} {}", style::style(&layer.format).cyan(), format_bytes(layer.size));
    }

    if let Some(snap) = &m.ram_snapshot {
        println!();
        println!("{}", "ram snapshot".bold());
        println!("  {}", snap.reference);
        println!(
            "  compression: {}, preload: {}, mlock: {}",
            snap.compression, snap.preload_hint, snap.mlock_required
        );
    }

    if !m.devices.is_empty() {
        println!();
        println!("{}", "devices".bold());
        for dev in &m.devices {
            println!("  {} {} @ {}", dev.kind, dev.name, dev.mmio_addr);
        }
    }

    if !m.runtime_hints.preferred_runtime.is_empty() {
        println!();
        println!(
            "{} {} (cold start target {} ms)",
            "runtimes".bold(),
            m.runtime_hints.preferred_runtime.join(", "),
            m.runtime_hints.cold_start_target_ms
        );
    }
}

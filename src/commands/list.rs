//! List commands implementation

use super::progress::format_size;
use crate::backends;
use bdmflash_core::flash::default_algorithms;

/// List flash algorithm families in probe order, with their parts
pub fn list_algorithms() {
    let mut algorithms = default_algorithms();
    algorithms.sort_by_key(|a| a.min_chip_width());

    for algorithm in &algorithms {
        println!(
            "{:<10} {} (chips from {} bits)",
            algorithm.family(),
            algorithm.description(),
            algorithm.min_chip_width()
        );
        println!("  {:<12} {:<16} {:>8} {:>6} {:>10}", "Vendor", "Name", "Size", "Width", "ID");
        for chip in algorithm.chips() {
            println!(
                "  {:<12} {:<16} {:>8} {:>6} {:>10}",
                chip.vendor,
                chip.name,
                format_size(chip.total_size as u64),
                chip.width.bits(),
                format!("{:04X}:{:04X}", chip.manufacturer, chip.device)
            );
        }
        println!();
    }
}

/// List port backends compiled into this binary
pub fn list_backends() {
    println!("Available backends:");
    println!();
    for backend in backends::available_backends() {
        println!("  {:8} - {}", backend.name, backend.description);
    }
}

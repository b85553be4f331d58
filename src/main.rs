//! Radix scan sort benchmark
//!
//! Sorts a generated array of `u32` keys with the sequential reference sort
//! and with the 32-pass radix pipeline, prints both timings and checks that
//! the results are identical.

use clap::Parser;

use radix_scan_sort::bench;
use radix_scan_sort::cli::Args;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().to_config();
    match bench::run_on(&config) {
        Ok(report) => {
            println!(
                "{} vs reference: {:.2}x",
                report.device_name,
                report.speedup()
            );
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

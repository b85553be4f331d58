use clap::Parser;

use crate::bench::{BenchConfig, DEFAULT_ITERATIONS, DEFAULT_SIZE};
use crate::checker::CheckLevel;
use crate::device::DeviceKind;
use crate::kernel::DEFAULT_GROUP_SIZE;

/// Bit-by-bit radix sort benchmark against a sequential reference sort
#[derive(Parser, Debug)]
#[command(name = "radix-scan-sort", version, about)]
pub struct Args {
    /// Number of keys to sort
    #[arg(short = 'n', long, default_value_t = DEFAULT_SIZE)]
    pub size: usize,

    /// Measured repetitions per path
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    pub iters: usize,

    /// Parallel group size of the scan kernels (power of two)
    #[arg(long, default_value_t = DEFAULT_GROUP_SIZE)]
    pub group_size: usize,

    /// Generator seed (defaults to the number of keys)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Largest generated key
    #[arg(long, default_value_t = i32::MAX as u32)]
    pub max_value: u32,

    /// Compute backend
    #[arg(long, value_enum, default_value_t = DeviceKind::Auto)]
    pub device: DeviceKind,

    /// Host backend worker threads (0 = one per core)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Mid-pipeline consistency checks
    #[arg(long, value_enum, default_value_t = CheckLevel::Off)]
    pub check: CheckLevel,
}

impl Args {
    pub fn to_config(&self) -> BenchConfig {
        BenchConfig {
            size: self.size,
            iterations: self.iters,
            group_size: self.group_size,
            seed: self.seed.unwrap_or(self.size as u64),
            max_value: self.max_value,
            device: self.device,
            threads: self.threads,
            check: self.check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_config_defaults() {
        let args = Args::parse_from(["radix-scan-sort"]);
        assert_eq!(args.to_config(), BenchConfig::default());
    }

    #[test]
    fn test_seed_follows_size() {
        let args = Args::parse_from(["radix-scan-sort", "-n", "1000"]);
        let config = args.to_config();
        assert_eq!(config.size, 1000);
        assert_eq!(config.seed, 1000);

        let args = Args::parse_from(["radix-scan-sort", "-n", "1000", "--seed", "7"]);
        assert_eq!(args.to_config().seed, 7);
    }

    #[test]
    fn test_value_enums() {
        let args = Args::parse_from([
            "radix-scan-sort",
            "--device",
            "host",
            "--check",
            "verify",
            "--group-size",
            "64",
            "--iters",
            "3",
        ]);
        let config = args.to_config();
        assert_eq!(config.device, DeviceKind::Host);
        assert_eq!(config.check, CheckLevel::Verify);
        assert_eq!(config.group_size, 64);
        assert_eq!(config.iterations, 3);
    }

    #[test]
    fn test_rejects_unknown_device() {
        assert!(Args::try_parse_from(["radix-scan-sort", "--device", "cuda"]).is_err());
    }
}

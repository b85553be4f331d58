//! Benchmark harness: reference sort vs. the radix pipeline on one input.
//!
//! Both paths sort the same generated keys `iterations` times. Device laps
//! start after the upload and end before the readback, so transfers are not
//! measured. The last results of both paths must agree element by element.

use crate::checker::{self, CheckLevel};
use crate::cpu_sort;
use crate::data_gen::DataGenerator;
use crate::device::host::HostDevice;
use crate::device::{ComputeDevice, DeviceKind};
use crate::error::{Result, SortError};
use crate::kernel::{KernelOptions, DEFAULT_GROUP_SIZE};
use crate::pipeline::RadixPipeline;
use crate::stats::{LapTimer, Stats};

/// Default number of keys, 32Mi.
pub const DEFAULT_SIZE: usize = 32 * 1024 * 1024;
/// Default repetitions per path.
pub const DEFAULT_ITERATIONS: usize = 10;

/// Everything one benchmark run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    pub size: usize,
    pub iterations: usize,
    pub group_size: usize,
    pub seed: u64,
    pub max_value: u32,
    pub device: DeviceKind,
    /// Host backend workers, 0 = rayon default.
    pub threads: usize,
    pub check: CheckLevel,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            iterations: DEFAULT_ITERATIONS,
            group_size: DEFAULT_GROUP_SIZE,
            seed: DEFAULT_SIZE as u64,
            max_value: i32::MAX as u32,
            device: DeviceKind::Auto,
            threads: 0,
            check: CheckLevel::Off,
        }
    }
}

impl BenchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(SortError::InvalidConfig(
                "at least one iteration is required".to_string(),
            ));
        }
        KernelOptions::with_group_size(self.group_size).map(|_| ())
    }
}

/// Timings of both paths.
#[derive(Debug, Clone)]
pub struct BenchReport {
    pub size: usize,
    pub device_name: String,
    pub reference: Stats,
    pub device: Stats,
}

impl BenchReport {
    pub fn speedup(&self) -> f64 {
        if self.device.mean > 0.0 {
            self.reference.mean / self.device.mean
        } else {
            0.0
        }
    }
}

fn timing_lines(label: &str, stats: &Stats, n: usize) -> [String; 3] {
    [
        format!("{}: {:.5}+-{:.5} s", label, stats.mean, stats.stddev),
        format!(
            "{}: min {:.5} s, max {:.5} s over {} runs",
            label, stats.min, stats.max, stats.count
        ),
        format!("{}: {:.2} millions/s", label, stats.millions_per_sec(n)),
    ]
}

fn print_timing(label: &str, stats: &Stats, n: usize) {
    for line in timing_lines(label, stats, n) {
        println!("{}", line);
    }
}

/// Time the sequential reference sort; returns the stats and the last result.
pub fn run_reference(input: &[u32], iterations: usize) -> (Stats, Vec<u32>) {
    let mut sorted = Vec::new();
    let mut timer = LapTimer::new();
    for _ in 0..iterations {
        timer.restart();
        sorted = input.to_vec();
        cpu_sort::reference_sort(&mut sorted);
        timer.next_lap();
    }
    (timer.stats(), sorted)
}

/// Time the radix pipeline; returns the stats and the last result.
pub fn run_device<D: ComputeDevice>(
    pipeline: &mut RadixPipeline<D>,
    input: &[u32],
    iterations: usize,
) -> Result<(Stats, Vec<u32>)> {
    let mut timer = LapTimer::new();
    for iter in 0..iterations {
        pipeline.upload(input)?;
        timer.restart();
        pipeline.run()?;
        let lap = timer.next_lap();
        log::debug!("iteration {}: {:.5} s", iter, lap.as_secs_f64());
    }
    let mut sorted = vec![0u32; input.len()];
    pipeline.download(&mut sorted)?;
    Ok((timer.stats(), sorted))
}

/// Generate the input, run both paths, print the timings and compare.
pub fn run<D: ComputeDevice>(device: D, label: &str, config: &BenchConfig) -> Result<BenchReport> {
    config.validate()?;
    let n = config.size;
    let mut pipeline = RadixPipeline::new(device)?.with_check_level(config.check);
    let device_name = pipeline.device().name();
    log::info!(
        "device: {}, group size {}, n = {}, {} iterations",
        device_name,
        pipeline.device().group_size(),
        n,
        config.iterations
    );

    let input = DataGenerator::new(config.seed).up_to(n, config.max_value);
    println!("Data generated for n={}!", n);
    if config.check.previews() {
        println!("{}", checker::preview(&input, "Input:"));
    }

    let (reference, expected) = run_reference(&input, config.iterations);
    print_timing("CPU", &reference, n);
    if config.check.previews() {
        println!("{}", checker::preview(&expected, "CPU sorted:"));
    }

    let (timings, actual) = run_device(&mut pipeline, &input, config.iterations)?;
    print_timing(label, &timings, n);
    if config.check.previews() {
        println!("{}", checker::preview(&actual, &format!("{} sorted:", label)));
    }

    checker::verify_equal(&actual, &expected)?;
    log::info!("results match");

    Ok(BenchReport {
        size: n,
        device_name,
        reference,
        device: timings,
    })
}

/// Run the benchmark on the backend selected by `config.device`.
pub fn run_on(config: &BenchConfig) -> Result<BenchReport> {
    let options = KernelOptions::with_group_size(config.group_size)?;
    match config.device.resolve() {
        DeviceKind::Metal => run_metal(options, config),
        _ => {
            let device = HostDevice::with_threads(options, config.threads)?;
            run(device, "Host", config)
        }
    }
}

#[cfg(target_os = "macos")]
fn run_metal(options: KernelOptions, config: &BenchConfig) -> Result<BenchReport> {
    let device = crate::device::metal::MetalDevice::new(options)?;
    run(device, "GPU", config)
}

#[cfg(not(target_os = "macos"))]
fn run_metal(_options: KernelOptions, _config: &BenchConfig) -> Result<BenchReport> {
    Err(SortError::DeviceUnavailable(
        "Metal is only available on macOS".to_string(),
    ))
}

//! LSB-first radix sort for `u32` keys, one bit per pass.
//!
//! Every pass computes the bit predicate of each key, turns it into an
//! exclusive prefix sum with a multi-level parallel scan and scatters the keys
//! into a stable zeros/ones partition. 32 passes sort the array. Passes run on
//! a [`device::ComputeDevice`]: rayon on any host, or Metal on macOS.
//!
//! ```no_run
//! use radix_scan_sort::device::host::HostDevice;
//! use radix_scan_sort::kernel::KernelOptions;
//! use radix_scan_sort::pipeline::RadixPipeline;
//!
//! let device = HostDevice::new(KernelOptions::default())?;
//! let mut pipeline = RadixPipeline::new(device)?;
//! let mut data = vec![5, 3, 8, 1];
//! pipeline.sort(&mut data)?;
//! assert_eq!(data, vec![1, 3, 5, 8]);
//! # Ok::<(), radix_scan_sort::SortError>(())
//! ```

pub mod bench;
pub mod checker;
pub mod cli;
pub mod cpu_sort;
pub mod data_gen;
pub mod device;
pub mod double_buffer;
pub mod error;
pub mod kernel;
pub mod pass;
pub mod pipeline;
pub mod scan;
pub mod stats;

pub use error::{Result, SortError};
pub use pipeline::{RadixPipeline, KEY_BITS};

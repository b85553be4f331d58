//! Compute device abstraction.
//!
//! The radix core only ever talks to a device through two traits:
//! [`DeviceBuffer`] for typed storage and host transfers, and
//! [`ComputeDevice`] for allocation and the four kernel launches. Each launch
//! returns only after its output is fully materialized, so consecutive
//! launches never overlap.
//!
//! Backends:
//! - [`host::HostDevice`]: rayon parallel-for, available everywhere
//! - `metal::MetalDevice`: Apple GPUs via Metal (macOS only)

pub mod host;
#[cfg(target_os = "macos")]
pub mod metal;

use crate::error::Result;
use crate::kernel::{KernelOptions, WorkSize};

/// Scalar types that can live in device buffers.
pub trait Element: Copy + Default + Send + Sync + std::fmt::Debug + 'static {}

impl Element for u32 {}
impl Element for u64 {}

/// Typed device storage with a logical length.
pub trait DeviceBuffer<T: Element> {
    /// Number of elements currently addressable.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the logical length. Growing past the allocation reallocates and
    /// does not preserve contents.
    fn resize(&mut self, len: usize) -> Result<()>;

    /// Write `src.len()` elements from the host into the front of the buffer.
    fn write(&mut self, src: &[T]) -> Result<()>;

    /// Read `dst.len()` elements from the front of the buffer to the host.
    fn read(&self, dst: &mut [T]) -> Result<()>;

    /// Copy the first `count` elements into `dst`.
    fn copy_to(&self, dst: &mut Self, count: usize) -> Result<()>;

    /// Read the whole buffer into a new vector.
    fn to_vec(&self) -> Result<Vec<T>> {
        let mut out = vec![T::default(); self.len()];
        self.read(&mut out)?;
        Ok(out)
    }
}

/// A compute device with compiled radix kernels.
///
/// The launch methods mirror the kernel entry points in [`crate::kernel`];
/// their positional arguments are the same on every backend.
pub trait ComputeDevice {
    type Buffer<T: Element>: DeviceBuffer<T>;

    /// Human readable device name.
    fn name(&self) -> String;

    /// Options the kernels were compiled with.
    fn options(&self) -> &KernelOptions;

    fn group_size(&self) -> usize {
        self.options().group_size
    }

    /// Allocate a zero-filled buffer of `len` elements.
    fn alloc<T: Element>(&self, len: usize) -> Result<Self::Buffer<T>>;

    /// `counts[0] = 0`, `counts[i + 1] = (keys[i] >> bit) & 1` for `i < n`.
    fn setup(
        &self,
        work: WorkSize,
        keys: &Self::Buffer<u32>,
        n: usize,
        counts: &mut Self::Buffer<u64>,
        bit: u32,
    ) -> Result<()>;

    /// In-group inclusive scan over the counters `k * step + step - 1 < len`.
    fn gather(
        &self,
        work: WorkSize,
        counts: &mut Self::Buffer<u64>,
        len: usize,
        step: usize,
    ) -> Result<()>;

    /// Write every level element at `step` into `out`, adding the total of
    /// the preceding groups to all but the last element of each group.
    fn propagate(
        &self,
        work: WorkSize,
        counts: &Self::Buffer<u64>,
        len: usize,
        step: usize,
        out: &mut Self::Buffer<u64>,
    ) -> Result<()>;

    /// Scatter `keys[i]` into `out` at its stable one-bit partition slot,
    /// taking the predicate from `counts[i + 1] - counts[i]`.
    fn reorder(
        &self,
        work: WorkSize,
        keys: &Self::Buffer<u32>,
        n: usize,
        counts: &Self::Buffer<u64>,
        out: &mut Self::Buffer<u32>,
    ) -> Result<()>;
}

/// Which backend to run the pipeline on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DeviceKind {
    /// Metal when a GPU is present, otherwise the host backend.
    #[default]
    Auto,
    /// rayon parallel-for on the CPU.
    Host,
    /// Apple GPU via Metal.
    Metal,
}

/// Whether a Metal device can be opened on this machine.
pub fn metal_available() -> bool {
    #[cfg(target_os = "macos")]
    {
        ::metal::Device::system_default().is_some()
    }
    #[cfg(not(target_os = "macos"))]
    {
        false
    }
}

impl DeviceKind {
    /// Resolve `Auto` to a concrete backend.
    pub fn resolve(self) -> DeviceKind {
        match self {
            DeviceKind::Auto if metal_available() => DeviceKind::Metal,
            DeviceKind::Auto => DeviceKind::Host,
            other => other,
        }
    }
}

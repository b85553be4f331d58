//! Metal backend for Apple GPUs.
//!
//! The four radix kernels are written in Metal Shading Language and compiled
//! at runtime with `LOCAL_SIZE` defined from [`KernelOptions`]. Every launch
//! gets its own command buffer and the host waits for it to complete, so a
//! launch's output is fully visible to the next one. Buffers use shared
//! storage, which makes host reads and writes plain memory copies.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem;

use metal::{
    Buffer, CommandQueue, CompileOptions, ComputeCommandEncoderRef, ComputePipelineState, Device,
    MTLCommandBufferStatus, MTLResourceOptions, MTLSize,
};

use super::{ComputeDevice, DeviceBuffer, Element};
use crate::error::{Result, SortError};
use crate::kernel::{
    KernelOptions, WorkSize, ENTRY_POINTS, GATHER_ENTRY, MOVE_ENTRY, PROPAGATE_ENTRY,
    SETUP_ENTRY,
};

/// Metal shader source for the radix kernels. `LOCAL_SIZE` is prepended as a
/// `#define` before compilation.
const SHADER_SOURCE: &str = r#"
#include <metal_stdlib>
using namespace metal;

/// counts[0] = 0, counts[i + 1] = bit `bit` of keys[i].
kernel void radix_setup(
    device const uint *keys [[buffer(0)]],
    constant uint &n [[buffer(1)]],
    device ulong *counts [[buffer(2)]],
    constant uint &bit [[buffer(3)]],
    uint gid [[thread_position_in_grid]])
{
    if (gid == 0) {
        counts[0] = 0;
    }
    if (gid < n) {
        counts[gid + 1] = (keys[gid] >> bit) & 1u;
    }
}

/// In-group inclusive scan over the counters at gid * step + step - 1.
/// Workers past the end contribute zero but still reach every barrier.
kernel void radix_gather(
    device ulong *counts [[buffer(0)]],
    constant uint &len [[buffer(1)]],
    constant uint &step [[buffer(2)]],
    uint gid [[thread_position_in_grid]],
    uint lid [[thread_position_in_threadgroup]])
{
    threadgroup ulong sums[LOCAL_SIZE];

    const ulong idx = (ulong)gid * step + step - 1;
    const bool active = idx < len;
    sums[lid] = active ? counts[idx] : 0;
    threadgroup_barrier(mem_flags::mem_threadgroup);

    for (uint offset = 1; offset < LOCAL_SIZE; offset <<= 1) {
        const ulong addend = lid >= offset ? sums[lid - offset] : 0;
        threadgroup_barrier(mem_flags::mem_threadgroup);
        sums[lid] += addend;
        threadgroup_barrier(mem_flags::mem_threadgroup);
    }

    if (active) {
        counts[idx] = sums[lid];
    }
}

/// Adds the total of all preceding groups, which the coarser level left at
/// index group * LOCAL_SIZE * step - 1. The last lane of a group already
/// holds a global total and is copied unchanged.
kernel void radix_propagate(
    device const ulong *counts [[buffer(0)]],
    constant uint &len [[buffer(1)]],
    constant uint &step [[buffer(2)]],
    device ulong *counts_next [[buffer(3)]],
    uint gid [[thread_position_in_grid]])
{
    const ulong idx = (ulong)gid * step + step - 1;
    if (idx >= len) {
        return;
    }
    const uint group = gid / LOCAL_SIZE;
    const uint lane = gid % LOCAL_SIZE;

    ulong value = counts[idx];
    if (group > 0 && lane != LOCAL_SIZE - 1) {
        value += counts[(ulong)group * LOCAL_SIZE * step - 1];
    }
    counts_next[idx] = value;
}

/// Stable one-bit partition: zeros keep their rank among zeros, ones are
/// placed after all zeros in their rank among ones.
/// A destination outside [0, n) means the counts are inconsistent: the
/// worker raises `fault` instead of writing.
kernel void radix_move(
    device const uint *keys [[buffer(0)]],
    constant uint &n [[buffer(1)]],
    device const ulong *counts [[buffer(2)]],
    device uint *keys_next [[buffer(3)]],
    device atomic_uint *fault [[buffer(4)]],
    uint gid [[thread_position_in_grid]])
{
    if (gid >= n) {
        return;
    }
    const ulong ones_before = counts[gid];
    const ulong total_zeros = (ulong)n - counts[n];

    ulong dest;
    if (counts[gid + 1] != ones_before) {
        dest = total_zeros + ones_before;
    } else {
        dest = (ulong)gid - ones_before;
    }
    if (dest >= n) {
        atomic_store_explicit(fault, 1u, memory_order_relaxed);
        return;
    }
    keys_next[dest] = keys[gid];
}
"#;

/// Shared-storage Metal buffer with a typed logical length.
pub struct MetalBuffer<T> {
    raw: Buffer,
    len: usize,
    device: Device,
    queue: CommandQueue,
    _marker: PhantomData<T>,
}

impl<T: Element> MetalBuffer<T> {
    fn allocate(device: &Device, len: usize) -> Buffer {
        // Zero-length Metal buffers are not allowed.
        let bytes = (len.max(1) * mem::size_of::<T>()) as u64;
        let raw = device.new_buffer(bytes, MTLResourceOptions::StorageModeShared);
        unsafe {
            std::ptr::write_bytes(raw.contents() as *mut u8, 0, bytes as usize);
        }
        raw
    }

    fn capacity(&self) -> usize {
        self.raw.length() as usize / mem::size_of::<T>()
    }

    fn check_len(&self, requested: usize) -> Result<()> {
        if requested > self.len {
            return Err(SortError::OutOfBounds {
                requested,
                capacity: self.len,
            });
        }
        Ok(())
    }
}

impl<T: Element> DeviceBuffer<T> for MetalBuffer<T> {
    fn len(&self) -> usize {
        self.len
    }

    fn resize(&mut self, len: usize) -> Result<()> {
        if len > self.capacity() {
            self.raw = Self::allocate(&self.device, len);
        }
        self.len = len;
        Ok(())
    }

    fn write(&mut self, src: &[T]) -> Result<()> {
        self.check_len(src.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.raw.contents() as *mut T, src.len());
        }
        Ok(())
    }

    fn read(&self, dst: &mut [T]) -> Result<()> {
        self.check_len(dst.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.raw.contents() as *const T,
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
        Ok(())
    }

    fn copy_to(&self, dst: &mut Self, count: usize) -> Result<()> {
        self.check_len(count)?;
        dst.check_len(count)?;
        if count == 0 {
            return Ok(());
        }
        let command_buffer = self.queue.new_command_buffer();
        let blit = command_buffer.new_blit_command_encoder();
        blit.copy_from_buffer(
            &self.raw,
            0,
            &dst.raw,
            0,
            (count * mem::size_of::<T>()) as u64,
        );
        blit.end_encoding();
        command_buffer.commit();
        command_buffer.wait_until_completed();
        if matches!(command_buffer.status(), MTLCommandBufferStatus::Error) {
            return Err(SortError::Launch {
                entry: "copy",
                message: "blit command buffer failed".to_string(),
            });
        }
        Ok(())
    }
}

/// Metal device with compiled radix pipelines.
pub struct MetalDevice {
    device: Device,
    command_queue: CommandQueue,
    setup_pipeline: ComputePipelineState,
    gather_pipeline: ComputePipelineState,
    propagate_pipeline: ComputePipelineState,
    move_pipeline: ComputePipelineState,
    /// One `uint` raised by `radix_move` on an out-of-range destination.
    move_fault: Buffer,
    options: KernelOptions,
}

impl MetalDevice {
    /// Open the system default GPU and compile the radix kernels.
    pub fn new(options: KernelOptions) -> Result<Self> {
        options.validate()?;
        let device = Device::system_default().ok_or_else(|| {
            SortError::DeviceUnavailable("no Metal device found".to_string())
        })?;
        let command_queue = device.new_command_queue();

        let source = options.apply_to(SHADER_SOURCE);
        let library = device
            .new_library_with_source(&source, &CompileOptions::new())
            .map_err(|message| SortError::KernelCompilation {
                entry: "radix".to_string(),
                message,
            })?;

        let pipeline = |entry: &str| -> Result<ComputePipelineState> {
            let function =
                library
                    .get_function(entry, None)
                    .map_err(|message| SortError::KernelCompilation {
                        entry: entry.to_string(),
                        message,
                    })?;
            device
                .new_compute_pipeline_state_with_function(&function)
                .map_err(|message| SortError::KernelCompilation {
                    entry: entry.to_string(),
                    message,
                })
        };

        let [setup, gather, propagate, radix_move] = ENTRY_POINTS.map(&pipeline);
        let setup_pipeline = setup?;
        let gather_pipeline = gather?;
        let propagate_pipeline = propagate?;
        let move_pipeline = radix_move?;

        let max_threads = gather_pipeline.max_total_threads_per_threadgroup() as usize;
        if options.group_size > max_threads {
            return Err(SortError::InvalidConfig(format!(
                "group size {} exceeds the device limit of {} threads per threadgroup",
                options.group_size, max_threads
            )));
        }

        log::debug!(
            "compiled radix kernels for {} with LOCAL_SIZE={}",
            device.name(),
            options.group_size
        );

        let move_fault = MetalBuffer::<u32>::allocate(&device, 1);

        Ok(Self {
            device,
            command_queue,
            setup_pipeline,
            gather_pipeline,
            propagate_pipeline,
            move_pipeline,
            move_fault,
            options,
        })
    }

    /// Encode one dispatch, submit it and wait for completion.
    fn launch(
        &self,
        entry: &'static str,
        pipeline: &ComputePipelineState,
        work: WorkSize,
        bind: impl FnOnce(&ComputeCommandEncoderRef),
    ) -> Result<()> {
        if work.is_empty() {
            return Ok(());
        }
        let command_buffer = self.command_queue.new_command_buffer();
        let encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(pipeline);
        bind(encoder);
        encoder.dispatch_thread_groups(
            MTLSize::new(work.groups() as u64, 1, 1),
            MTLSize::new(work.group as u64, 1, 1),
        );
        encoder.end_encoding();

        command_buffer.commit();
        command_buffer.wait_until_completed();

        if matches!(command_buffer.status(), MTLCommandBufferStatus::Error) {
            return Err(SortError::Launch {
                entry,
                message: "command buffer completed with an error".to_string(),
            });
        }
        Ok(())
    }
}

fn scalar(entry: &'static str, value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        SortError::InvalidConfig(format!("{}: {} does not fit in 32 bits", entry, value))
    })
}

fn set_scalar(encoder: &ComputeCommandEncoderRef, index: u64, value: &u32) {
    encoder.set_bytes(
        index,
        mem::size_of::<u32>() as u64,
        value as *const u32 as *const c_void,
    );
}

impl ComputeDevice for MetalDevice {
    type Buffer<T: Element> = MetalBuffer<T>;

    fn name(&self) -> String {
        self.device.name().to_string()
    }

    fn options(&self) -> &KernelOptions {
        &self.options
    }

    fn alloc<T: Element>(&self, len: usize) -> Result<MetalBuffer<T>> {
        Ok(MetalBuffer {
            raw: MetalBuffer::<T>::allocate(&self.device, len),
            len,
            device: self.device.clone(),
            queue: self.command_queue.clone(),
            _marker: PhantomData,
        })
    }

    fn setup(
        &self,
        work: WorkSize,
        keys: &MetalBuffer<u32>,
        n: usize,
        counts: &mut MetalBuffer<u64>,
        bit: u32,
    ) -> Result<()> {
        keys.check_len(n)?;
        counts.check_len(n + 1)?;
        // `n + 1` counters are addressed with 32-bit indices.
        scalar(SETUP_ENTRY, n + 1)?;
        let n32 = n as u32;
        self.launch(SETUP_ENTRY, &self.setup_pipeline, work, |encoder| {
            encoder.set_buffer(0, Some(&keys.raw), 0);
            set_scalar(encoder, 1, &n32);
            encoder.set_buffer(2, Some(&counts.raw), 0);
            set_scalar(encoder, 3, &bit);
        })
    }

    fn gather(
        &self,
        work: WorkSize,
        counts: &mut MetalBuffer<u64>,
        len: usize,
        step: usize,
    ) -> Result<()> {
        counts.check_len(len)?;
        let len32 = scalar(GATHER_ENTRY, len)?;
        let step32 = scalar(GATHER_ENTRY, step)?;
        self.launch(GATHER_ENTRY, &self.gather_pipeline, work, |encoder| {
            encoder.set_buffer(0, Some(&counts.raw), 0);
            set_scalar(encoder, 1, &len32);
            set_scalar(encoder, 2, &step32);
        })
    }

    fn propagate(
        &self,
        work: WorkSize,
        counts: &MetalBuffer<u64>,
        len: usize,
        step: usize,
        out: &mut MetalBuffer<u64>,
    ) -> Result<()> {
        counts.check_len(len)?;
        out.check_len(len)?;
        let len32 = scalar(PROPAGATE_ENTRY, len)?;
        let step32 = scalar(PROPAGATE_ENTRY, step)?;
        self.launch(PROPAGATE_ENTRY, &self.propagate_pipeline, work, |encoder| {
            encoder.set_buffer(0, Some(&counts.raw), 0);
            set_scalar(encoder, 1, &len32);
            set_scalar(encoder, 2, &step32);
            encoder.set_buffer(3, Some(&out.raw), 0);
        })
    }

    fn reorder(
        &self,
        work: WorkSize,
        keys: &MetalBuffer<u32>,
        n: usize,
        counts: &MetalBuffer<u64>,
        out: &mut MetalBuffer<u32>,
    ) -> Result<()> {
        keys.check_len(n)?;
        counts.check_len(n + 1)?;
        out.check_len(n)?;
        scalar(MOVE_ENTRY, n + 1)?;
        let n32 = n as u32;
        let fault = self.move_fault.contents() as *mut u32;
        unsafe {
            fault.write_volatile(0);
        }
        self.launch(MOVE_ENTRY, &self.move_pipeline, work, |encoder| {
            encoder.set_buffer(0, Some(&keys.raw), 0);
            set_scalar(encoder, 1, &n32);
            encoder.set_buffer(2, Some(&counts.raw), 0);
            encoder.set_buffer(3, Some(&out.raw), 0);
            encoder.set_buffer(4, Some(&self.move_fault), 0);
        })?;
        if unsafe { fault.read_volatile() } != 0 {
            return Err(SortError::Launch {
                entry: MOVE_ENTRY,
                message: format!("destination out of range for n = {}: counts are inconsistent", n),
            });
        }
        Ok(())
    }
}

#[cfg(all(test, target_os = "macos"))]
mod tests {
    use super::*;
    use crate::double_buffer::DoubleBuffer;
    use crate::pipeline::{RadixPipeline, KEY_BITS};
    use crate::scan::{bit_counts_host, exclusive_scan_host, inclusive_scan, level_steps};

    fn open() -> Option<MetalDevice> {
        match MetalDevice::new(KernelOptions { group_size: 4 }) {
            Ok(device) => Some(device),
            Err(_) => {
                println!("Skipping GPU test: Metal not available");
                None
            }
        }
    }

    #[test]
    fn test_metal_buffer_round_trip() {
        let Some(dev) = open() else { return };
        let mut buf: MetalBuffer<u64> = dev.alloc(3).unwrap();
        buf.write(&[7, 8, 9]).unwrap();
        let mut other: MetalBuffer<u64> = dev.alloc(3).unwrap();
        buf.copy_to(&mut other, 3).unwrap();
        assert_eq!(other.to_vec().unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn test_metal_gather_and_propagate() {
        let Some(dev) = open() else { return };
        let mut counts: MetalBuffer<u64> = dev.alloc(10).unwrap();
        counts.write(&[1; 10]).unwrap();
        dev.gather(WorkSize::covering(4, 10), &mut counts, 10, 1)
            .unwrap();
        dev.gather(WorkSize::covering(4, 2), &mut counts, 10, 4)
            .unwrap();
        assert_eq!(counts.to_vec().unwrap(), vec![1, 2, 3, 4, 1, 2, 3, 8, 1, 2]);

        let mut out: MetalBuffer<u64> = dev.alloc(10).unwrap();
        dev.propagate(WorkSize::covering(4, 10), &counts, 10, 1, &mut out)
            .unwrap();
        assert_eq!(out.to_vec().unwrap(), (1..=10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_metal_setup_and_move() {
        let Some(dev) = open() else { return };
        let mut keys: MetalBuffer<u32> = dev.alloc(4).unwrap();
        keys.write(&[5, 3, 8, 1]).unwrap();
        let mut counts: MetalBuffer<u64> = dev.alloc(5).unwrap();
        dev.setup(WorkSize::covering(4, 4), &keys, 4, &mut counts, 0)
            .unwrap();
        assert_eq!(counts.to_vec().unwrap(), vec![0, 1, 1, 0, 1]);

        counts.write(&[0, 1, 2, 2, 3]).unwrap();
        let mut out: MetalBuffer<u32> = dev.alloc(4).unwrap();
        dev.reorder(WorkSize::covering(4, 4), &keys, 4, &counts, &mut out)
            .unwrap();
        assert_eq!(out.to_vec().unwrap(), vec![8, 5, 3, 1]);
    }

    #[test]
    fn test_metal_move_reports_inconsistent_counts() {
        let Some(dev) = open() else { return };
        let mut keys: MetalBuffer<u32> = dev.alloc(4).unwrap();
        keys.write(&[5, 3, 8, 1]).unwrap();
        let mut counts: MetalBuffer<u64> = dev.alloc(5).unwrap();
        counts.write(&[0, 1, 2, 2, 9]).unwrap();
        let mut out: MetalBuffer<u32> = dev.alloc(4).unwrap();
        let err = dev
            .reorder(WorkSize::covering(4, 4), &keys, 4, &counts, &mut out)
            .unwrap_err();
        assert!(matches!(err, SortError::Launch { entry: MOVE_ENTRY, .. }));

        // The fault flag is cleared for the next launch.
        counts.write(&[0, 1, 2, 2, 3]).unwrap();
        dev.reorder(WorkSize::covering(4, 4), &keys, 4, &counts, &mut out)
            .unwrap();
        assert_eq!(out.to_vec().unwrap(), vec![8, 5, 3, 1]);
    }

    #[test]
    fn test_metal_multi_level_scan() {
        let Some(dev) = open() else { return };
        let values: Vec<u64> = (0..1001u64).map(|i| (i * 7 + i / 3) % 2).collect();
        assert_eq!(level_steps(values.len(), 4).len(), 5);

        let mut current: MetalBuffer<u64> = dev.alloc(values.len()).unwrap();
        current.write(&values).unwrap();
        let mut counts = DoubleBuffer::new(current, dev.alloc(values.len()).unwrap());
        inclusive_scan(&dev, &mut counts, values.len()).unwrap();
        assert_eq!(
            counts.current().to_vec().unwrap(),
            exclusive_scan_host(&values)[1..].to_vec()
        );
    }

    #[test]
    fn test_metal_pipeline_sort() {
        let Some(dev) = open() else { return };
        let input: Vec<u32> = (0..1000u32)
            .map(|i| i.wrapping_mul(0x9e37_79b9) ^ 0x5bd1)
            .collect();
        let mut pipeline = RadixPipeline::new(dev).unwrap();
        pipeline.upload(&input).unwrap();
        for bit in 0..KEY_BITS {
            let before = pipeline.keys_snapshot().unwrap();
            pipeline.run_pass(bit).unwrap();
            assert_eq!(
                pipeline.counts_snapshot().unwrap(),
                bit_counts_host(&before, bit),
                "bit {}",
                bit
            );
        }
        let mut expected = input.clone();
        expected.sort_unstable();
        assert_eq!(pipeline.keys_snapshot().unwrap(), expected);

        let mut data = input;
        pipeline.sort(&mut data).unwrap();
        assert_eq!(data, expected);
    }

    #[test]
    fn test_shader_defines_every_entry_point() {
        for entry in ENTRY_POINTS {
            assert!(
                SHADER_SOURCE.contains(&format!("kernel void {}(", entry)),
                "missing {}",
                entry
            );
        }
    }
}

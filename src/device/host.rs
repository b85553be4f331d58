//! Host backend: the radix kernels as rayon parallel-for loops.
//!
//! Each launch runs inside the device's own thread pool and returns once every
//! worker has finished, which gives the same phase ordering as a blocking GPU
//! dispatch. Scan groups map to `par_chunks_mut` over `group_size * step`
//! counters, so every worker owns a disjoint slice of the output.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{ComputeDevice, DeviceBuffer, Element};
use crate::error::{Result, SortError};
use crate::kernel::{KernelOptions, WorkSize, GATHER_ENTRY, MOVE_ENTRY, PROPAGATE_ENTRY, SETUP_ENTRY};

/// Buffer in host memory.
#[derive(Debug, Clone, Default)]
pub struct HostBuffer<T> {
    data: Vec<T>,
}

#[cfg(test)]
impl<T: Element> HostBuffer<T> {
    fn as_slice(&self) -> &[T] {
        &self.data
    }
}

fn check_len(requested: usize, capacity: usize) -> Result<()> {
    if requested > capacity {
        return Err(SortError::OutOfBounds {
            requested,
            capacity,
        });
    }
    Ok(())
}

impl<T: Element> DeviceBuffer<T> for HostBuffer<T> {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn resize(&mut self, len: usize) -> Result<()> {
        self.data.resize(len, T::default());
        Ok(())
    }

    fn write(&mut self, src: &[T]) -> Result<()> {
        check_len(src.len(), self.data.len())?;
        self.data[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn read(&self, dst: &mut [T]) -> Result<()> {
        check_len(dst.len(), self.data.len())?;
        dst.copy_from_slice(&self.data[..dst.len()]);
        Ok(())
    }

    fn copy_to(&self, dst: &mut Self, count: usize) -> Result<()> {
        check_len(count, self.data.len())?;
        check_len(count, dst.data.len())?;
        dst.data[..count].copy_from_slice(&self.data[..count]);
        Ok(())
    }
}

/// CPU "device" backed by a dedicated rayon pool.
pub struct HostDevice {
    pool: ThreadPool,
    options: KernelOptions,
}

impl HostDevice {
    /// Create a host device using rayon's default worker count.
    pub fn new(options: KernelOptions) -> Result<Self> {
        Self::with_threads(options, 0)
    }

    /// Create a host device with `threads` workers (0 = rayon default).
    pub fn with_threads(options: KernelOptions, threads: usize) -> Result<Self> {
        options.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("radix-worker-{}", i))
            .build()
            .map_err(|e| SortError::DeviceUnavailable(format!("rayon pool: {}", e)))?;
        log::debug!(
            "host device ready: {} workers, group size {}",
            pool.current_num_threads(),
            options.group_size
        );
        Ok(Self { pool, options })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Counters covered by one scan group at `step`.
    fn group_span(&self, step: usize, len: usize) -> usize {
        self.options.group_size.saturating_mul(step).min(len).max(1)
    }
}

fn check_work(entry: &'static str, work: WorkSize, items: usize) -> Result<()> {
    if work.global < items {
        return Err(SortError::Launch {
            entry,
            message: format!("work size {} does not cover {} items", work.global, items),
        });
    }
    Ok(())
}

impl ComputeDevice for HostDevice {
    type Buffer<T: Element> = HostBuffer<T>;

    fn name(&self) -> String {
        format!("host ({} threads)", self.threads())
    }

    fn options(&self) -> &KernelOptions {
        &self.options
    }

    fn alloc<T: Element>(&self, len: usize) -> Result<HostBuffer<T>> {
        Ok(HostBuffer {
            data: vec![T::default(); len],
        })
    }

    fn setup(
        &self,
        work: WorkSize,
        keys: &HostBuffer<u32>,
        n: usize,
        counts: &mut HostBuffer<u64>,
        bit: u32,
    ) -> Result<()> {
        check_work(SETUP_ENTRY, work, n)?;
        check_len(n, keys.data.len())?;
        check_len(n + 1, counts.data.len())?;

        let keys = &keys.data[..n];
        let counts = &mut counts.data[..n + 1];
        let min_len = work.group.max(1);
        self.pool.install(|| {
            counts[0] = 0;
            counts[1..]
                .par_iter_mut()
                .zip(keys.par_iter())
                .with_min_len(min_len)
                .for_each(|(count, &key)| *count = u64::from((key >> bit) & 1));
        });
        Ok(())
    }

    fn gather(
        &self,
        work: WorkSize,
        counts: &mut HostBuffer<u64>,
        len: usize,
        step: usize,
    ) -> Result<()> {
        check_len(len, counts.data.len())?;
        check_work(GATHER_ENTRY, work, len / step)?;
        let span = self.group_span(step, len);

        self.pool.install(|| {
            counts.data[..len].par_chunks_mut(span).for_each(|group| {
                let mut sum = 0u64;
                let mut idx = step - 1;
                while idx < group.len() {
                    sum += group[idx];
                    group[idx] = sum;
                    idx += step;
                }
            });
        });
        Ok(())
    }

    fn propagate(
        &self,
        work: WorkSize,
        counts: &HostBuffer<u64>,
        len: usize,
        step: usize,
        out: &mut HostBuffer<u64>,
    ) -> Result<()> {
        check_len(len, counts.data.len())?;
        check_len(len, out.data.len())?;
        check_work(PROPAGATE_ENTRY, work, len / step)?;
        let group_size = self.options.group_size;
        let span = group_size.saturating_mul(step);
        let src = &counts.data[..len];

        self.pool.install(|| {
            out.data[..len]
                .par_chunks_mut(span.min(len).max(1))
                .enumerate()
                .for_each(|(group, dst)| {
                    let base = group * span;
                    let carry = if group > 0 { src[base - 1] } else { 0 };
                    let mut lane = 0;
                    let mut idx = step - 1;
                    while idx < dst.len() {
                        let value = src[base + idx];
                        dst[idx] = if lane == group_size - 1 {
                            value
                        } else {
                            value + carry
                        };
                        lane += 1;
                        idx += step;
                    }
                });
        });
        Ok(())
    }

    fn reorder(
        &self,
        work: WorkSize,
        keys: &HostBuffer<u32>,
        n: usize,
        counts: &HostBuffer<u64>,
        out: &mut HostBuffer<u32>,
    ) -> Result<()> {
        check_work(MOVE_ENTRY, work, n)?;
        check_len(n, keys.data.len())?;
        check_len(n + 1, counts.data.len())?;
        check_len(n, out.data.len())?;

        let keys = &keys.data[..n];
        let counts = &counts.data[..n + 1];
        let corrupt = |message: String| SortError::Launch {
            entry: MOVE_ENTRY,
            message,
        };

        let total_ones = usize::try_from(counts[n])
            .ok()
            .filter(|&ones| ones <= n)
            .ok_or_else(|| corrupt(format!("total ones {} exceeds n = {}", counts[n], n)))?;
        let total_zeros = n - total_ones;

        // Zeros land in out[..total_zeros] and ones in out[total_zeros..], both
        // in input order, so each block of inputs owns one contiguous run in
        // each half.
        let (mut zeros_rest, mut ones_rest) = out.data[..n].split_at_mut(total_zeros);
        let block = work.group.max(1);
        let mut blocks = Vec::with_capacity(n.div_ceil(block));
        for start in (0..n).step_by(block) {
            let end = (start + block).min(n);
            let block_ones = counts[end]
                .checked_sub(counts[start])
                .map(|ones| ones as usize)
                .filter(|&ones| ones <= end - start && ones <= ones_rest.len())
                .ok_or_else(|| corrupt(format!("counts decrease or overflow in [{}, {})", start, end)))?;
            let block_zeros = end - start - block_ones;
            if block_zeros > zeros_rest.len() {
                return Err(corrupt(format!("zero bucket overflow in [{}, {})", start, end)));
            }
            let (zeros, rest) = std::mem::take(&mut zeros_rest).split_at_mut(block_zeros);
            zeros_rest = rest;
            let (ones, rest) = std::mem::take(&mut ones_rest).split_at_mut(block_ones);
            ones_rest = rest;
            blocks.push((start, end, zeros, ones));
        }

        self.pool.install(|| {
            blocks
                .into_par_iter()
                .try_for_each(|(start, end, zeros, ones)| {
                    let ones_before_block = counts[start] as usize;
                    let zeros_before_block = start - ones_before_block;
                    for i in start..end {
                        let before = counts[i] as usize;
                        let slot = match counts[i + 1].wrapping_sub(counts[i]) {
                            0 => i
                                .checked_sub(before)
                                .and_then(|dest| dest.checked_sub(zeros_before_block))
                                .and_then(|local| zeros.get_mut(local)),
                            1 => before
                                .checked_sub(ones_before_block)
                                .and_then(|local| ones.get_mut(local)),
                            _ => None,
                        };
                        *slot.ok_or_else(|| corrupt(format!("no destination for element {}", i)))? =
                            keys[i];
                    }
                    Ok(())
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(group_size: usize) -> HostDevice {
        HostDevice::with_threads(KernelOptions { group_size }, 2).unwrap()
    }

    fn buffer<T: Element>(dev: &HostDevice, values: &[T]) -> HostBuffer<T> {
        let mut buf = dev.alloc(values.len()).unwrap();
        buf.write(values).unwrap();
        buf
    }

    #[test]
    fn test_buffer_transfers() {
        let dev = device(4);
        let mut buf: HostBuffer<u32> = dev.alloc(4).unwrap();
        buf.write(&[1, 2, 3]).unwrap();
        assert_eq!(buf.to_vec().unwrap(), vec![1, 2, 3, 0]);

        let mut head = [0u32; 2];
        buf.read(&mut head).unwrap();
        assert_eq!(head, [1, 2]);

        let mut other: HostBuffer<u32> = dev.alloc(4).unwrap();
        buf.copy_to(&mut other, 3).unwrap();
        assert_eq!(other.as_slice(), &[1, 2, 3, 0]);

        assert!(buf.write(&[0; 5]).is_err());
        assert!(buf.copy_to(&mut other, 5).is_err());
    }

    #[test]
    fn test_setup_writes_shifted_predicates() {
        let dev = device(4);
        let keys = buffer(&dev, &[5u32, 3, 8, 1]);
        let mut counts: HostBuffer<u64> = dev.alloc(5).unwrap();
        counts.write(&[9, 9, 9, 9, 9]).unwrap();

        dev.setup(WorkSize::covering(4, 4), &keys, 4, &mut counts, 0)
            .unwrap();
        assert_eq!(counts.as_slice(), &[0, 1, 1, 0, 1]);

        dev.setup(WorkSize::covering(4, 4), &keys, 4, &mut counts, 3)
            .unwrap();
        assert_eq!(counts.as_slice(), &[0, 0, 0, 1, 0]);
    }

    #[test]
    fn test_gather_scans_within_groups() {
        let dev = device(4);
        let mut counts = buffer(&dev, &[1u64; 10]);
        dev.gather(WorkSize::covering(4, 10), &mut counts, 10, 1)
            .unwrap();
        assert_eq!(counts.as_slice(), &[1, 2, 3, 4, 1, 2, 3, 4, 1, 2]);

        // Level 4 sees indices 3 and 7 only.
        dev.gather(WorkSize::covering(4, 2), &mut counts, 10, 4)
            .unwrap();
        assert_eq!(counts.as_slice(), &[1, 2, 3, 4, 1, 2, 3, 8, 1, 2]);
    }

    #[test]
    fn test_propagate_adds_preceding_group_totals() {
        let dev = device(4);
        let counts = buffer(&dev, &[1u64, 2, 3, 4, 1, 2, 3, 8, 1, 2]);
        let mut out = buffer(&dev, &[0u64; 10]);
        dev.propagate(WorkSize::covering(4, 10), &counts, 10, 1, &mut out)
            .unwrap();
        assert_eq!(out.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_reorder_partitions_stably() {
        let dev = device(2);
        let keys = buffer(&dev, &[5u32, 3, 8, 1]);
        let counts = buffer(&dev, &[0u64, 1, 2, 2, 3]);
        let mut out: HostBuffer<u32> = dev.alloc(4).unwrap();
        dev.reorder(WorkSize::covering(2, 4), &keys, 4, &counts, &mut out)
            .unwrap();
        assert_eq!(out.as_slice(), &[8, 5, 3, 1]);
    }

    #[test]
    fn test_reorder_rejects_inconsistent_counts() {
        let dev = device(2);
        let keys = buffer(&dev, &[1u32, 2, 3]);
        let counts = buffer(&dev, &[0u64, 2, 2, 9]);
        let mut out: HostBuffer<u32> = dev.alloc(3).unwrap();
        let err = dev
            .reorder(WorkSize::covering(2, 3), &keys, 3, &counts, &mut out)
            .unwrap_err();
        assert!(matches!(err, SortError::Launch { entry: MOVE_ENTRY, .. }));
    }

    #[test]
    fn test_undersized_work_is_rejected() {
        let dev = device(4);
        let keys = buffer(&dev, &[1u32; 8]);
        let mut counts: HostBuffer<u64> = dev.alloc(9).unwrap();
        let err = dev
            .setup(WorkSize::covering(4, 4), &keys, 8, &mut counts, 0)
            .unwrap_err();
        assert!(matches!(err, SortError::Launch { .. }));
    }
}

//! One radix pass: stable partition of the keys by a single bit.
//!
//! setup → scan → reorder, each a blocking launch on the device. The pass
//! reads `keys.current()` and writes `keys.next()`; swapping the key buffers
//! is left to the caller so the pre-pass keys stay readable for checks.

use crate::device::ComputeDevice;
use crate::double_buffer::DoubleBuffer;
use crate::error::Result;
use crate::kernel::WorkSize;
use crate::scan;

/// Value of bit `bit` of `key`.
#[inline]
pub fn predicate(key: u32, bit: u32) -> u64 {
    u64::from((key >> bit) & 1)
}

/// Destination of element `i` in a stable one-bit partition.
///
/// `ones_before` is the exclusive prefix count at `i`, `total_ones` the count
/// at `n`. Zeros keep their rank among zeros, ones follow all zeros.
#[inline]
pub fn destination(i: usize, bit_set: bool, ones_before: u64, n: usize, total_ones: u64) -> usize {
    if bit_set {
        (n as u64 - total_ones + ones_before) as usize
    } else {
        i - ones_before as usize
    }
}

/// Run one pass over the first `n` keys for `bit`.
///
/// After it returns, `counts.current()[..=n]` holds the exclusive prefix sum
/// of the bit over the pre-pass keys and `keys.next()[..n]` holds the
/// partitioned keys.
pub fn radix_pass<D: ComputeDevice>(
    device: &D,
    keys: &mut DoubleBuffer<D::Buffer<u32>>,
    counts: &mut DoubleBuffer<D::Buffer<u64>>,
    n: usize,
    bit: u32,
) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    let work = WorkSize::covering(device.group_size(), n);

    log::trace!("bit {}: setup", bit);
    device.setup(work, keys.current(), n, counts.current_mut(), bit)?;

    scan::inclusive_scan(device, counts, n + 1)?;

    log::trace!("bit {}: reorder", bit);
    let (current, next) = keys.split();
    device.reorder(work, current, n, counts.current(), next)
}

/// Sequential reference for one pass.
pub fn radix_pass_host(keys: &[u32], bit: u32) -> Vec<u32> {
    let counts = scan::bit_counts_host(keys, bit);
    let n = keys.len();
    let total_ones = counts[n];
    let mut out = vec![0u32; n];
    for (i, &key) in keys.iter().enumerate() {
        let dest = destination(i, predicate(key, bit) == 1, counts[i], n, total_ones);
        out[dest] = key;
    }
    out
}

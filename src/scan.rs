//! Multi-level parallel prefix sum over the Count Array.
//!
//! The scan runs on counters grouped `G` at a time (`G` = device group size):
//!
//! 1. **Gather** at stride `step`: in-group inclusive scan over the counters
//!    `k * step + step - 1`. The last counter of each group then holds the
//!    group total and becomes an element of the next level, `step * G`.
//! 2. Repeat until one group covers the whole array (`step * G >= len`).
//! 3. **Propagate** back down, coarsest level first: every level element picks
//!    up the total of all preceding groups, which the level above has already
//!    made globally correct.
//!
//! Both sweeps are plain loops over the list of strides, so the recursion
//! depth never reaches the call stack. Propagation is double-buffered: it reads
//! the current Count Array, writes the next one and the two swap.

use crate::device::{ComputeDevice, DeviceBuffer};
use crate::double_buffer::DoubleBuffer;
use crate::error::Result;
use crate::kernel::WorkSize;

/// Strides of every scan level for `len` counters, finest first.
///
/// Always starts at 1; the last stride is the first one whose group covers
/// the whole array.
pub fn level_steps(len: usize, group_size: usize) -> Vec<usize> {
    debug_assert!(group_size >= 2);
    let mut steps = vec![1];
    let mut step = 1usize;
    loop {
        match step.checked_mul(group_size) {
            Some(next) if next < len => {
                steps.push(next);
                step = next;
            }
            _ => break,
        }
    }
    steps
}

/// In-place inclusive scan of the first `len` counters of `counts.current()`.
///
/// On return the current buffer holds `sum(counts[..=i])` at every `i < len`.
/// With the setup layout (`counts[0] = 0`, `counts[i + 1] = predicate(i)`)
/// that is exactly the exclusive prefix sum of the predicates.
pub fn inclusive_scan<D: ComputeDevice>(
    device: &D,
    counts: &mut DoubleBuffer<D::Buffer<u64>>,
    len: usize,
) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let group = device.group_size();
    let steps = level_steps(len, group);

    for &step in &steps {
        log::trace!("\tgather step {}", step);
        let work = WorkSize::covering(group, len / step);
        device.gather(work, counts.current_mut(), len, step)?;
    }

    // The next buffer must also carry the gathered values of every finer
    // level, which propagation does not rewrite at the coarser strides.
    let (current, next) = counts.split();
    current.copy_to(next, len)?;

    for &step in steps.iter().rev() {
        log::trace!("\tpropagate step {}", step);
        let work = WorkSize::covering(group, len / step);
        let (current, next) = counts.split();
        device.propagate(work, current, len, step, next)?;
        counts.swap();
    }
    Ok(())
}

/// Sequential exclusive prefix sum; `out.len() == values.len() + 1`.
pub fn exclusive_scan_host(values: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(values.len() + 1);
    let mut sum = 0u64;
    out.push(sum);
    for &value in values {
        sum += value;
        out.push(sum);
    }
    out
}

/// Expected Count Array for `keys` at `bit`, computed on the host.
pub fn bit_counts_host(keys: &[u32], bit: u32) -> Vec<u64> {
    let predicates: Vec<u64> = keys.iter().map(|&k| u64::from((k >> bit) & 1)).collect();
    exclusive_scan_host(&predicates)
}

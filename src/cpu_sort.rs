//! Sequential reference sort.
//!
//! Single-threaded ground truth for the benchmark: std's unstable sort on a
//! copy of the input. Keys are plain integers, so stability is irrelevant
//! for equal values.

/// Sort `data` ascending on the calling thread.
#[inline]
pub fn reference_sort(data: &mut [u32]) {
    data.sort_unstable();
}

/// Return a sorted copy of `input`.
pub fn sorted_copy(input: &[u32]) -> Vec<u32> {
    let mut out = input.to_vec();
    reference_sort(&mut out);
    out
}

/// Check if a slice is in non-decreasing order.
#[inline]
pub fn is_sorted(data: &[u32]) -> bool {
    data.windows(2).all(|w| w[0] <= w[1])
}

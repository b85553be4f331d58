//! Debug-only consistency checks and array previews.
//!
//! Disabled by default: with [`CheckLevel::Off`] nothing is read back from the
//! device between passes.

use std::fmt::Display;

use crate::error::{Result, SortError};
use crate::pass::predicate;

/// Number of leading elements shown by [`preview`].
pub const PREVIEW_LEN: usize = 16;

/// How much mid-pipeline diagnostics to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, clap::ValueEnum)]
pub enum CheckLevel {
    /// No readback between passes.
    #[default]
    Off,
    /// Validate the prefix sums of every pass against the pre-pass keys.
    Verify,
    /// `Verify`, plus print the head of intermediate arrays.
    Preview,
}

impl CheckLevel {
    pub fn verifies(self) -> bool {
        self >= CheckLevel::Verify
    }

    pub fn previews(self) -> bool {
        self >= CheckLevel::Preview
    }
}

/// Fail with both values and the index when `left != right`.
pub fn expect_same(index: usize, left: u64, right: u64, context: &'static str) -> Result<()> {
    if left != right {
        return Err(SortError::Mismatch {
            context,
            index,
            left,
            right,
        });
    }
    Ok(())
}

/// Check that `counts` is the exclusive prefix sum of bit `bit` over `keys`.
///
/// `counts` must hold `keys.len() + 1` entries.
pub fn verify_prefix_sums(keys: &[u32], counts: &[u64], bit: u32) -> Result<()> {
    const CONTEXT: &str = "partial sums should be correct!";
    expect_same(keys.len() + 1, counts.len() as u64, keys.len() as u64 + 1, "count array length")?;
    expect_same(0, counts[0], 0, CONTEXT)?;
    for (i, &key) in keys.iter().enumerate() {
        // counts[i] <= i here: counts[0] is 0 and every earlier step matched.
        expect_same(i, counts[i + 1], counts[i] + predicate(key, bit), CONTEXT)?;
    }
    Ok(())
}

/// Check that the device result equals the reference result element by element.
pub fn verify_equal(actual: &[u32], expected: &[u32]) -> Result<()> {
    const CONTEXT: &str = "GPU results should be equal to CPU results!";
    expect_same(
        actual.len().min(expected.len()),
        actual.len() as u64,
        expected.len() as u64,
        "result lengths should be equal!",
    )?;
    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        expect_same(i, u64::from(a), u64::from(e), CONTEXT)?;
    }
    Ok(())
}

/// Space-separated head of `values`, prefixed by `prefix`.
pub fn preview<T: Display>(values: &[T], prefix: &str) -> String {
    let mut out = String::new();
    if !prefix.is_empty() {
        out.push_str(prefix);
        out.push(' ');
    }
    for value in values.iter().take(PREVIEW_LEN) {
        out.push_str(&value.to_string());
        out.push(' ');
    }
    out
}

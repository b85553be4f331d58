//! Kernel entry points, compile-time definitions and launch geometry.
//!
//! Every backend exposes the same four data-parallel entry points. Their
//! per-element contracts are:
//!
//! - `radix_setup`: `counts[0] = 0`, `counts[i + 1] = (keys[i] >> bit) & 1`
//! - `radix_gather`: in-group inclusive scan over the level elements at `step`
//! - `radix_propagate`: add the preceding groups' total into every level element
//! - `radix_move`: scatter `keys[i]` to its stable one-bit partition slot

use crate::error::{Result, SortError};

pub const SETUP_ENTRY: &str = "radix_setup";
pub const GATHER_ENTRY: &str = "radix_gather";
pub const PROPAGATE_ENTRY: &str = "radix_propagate";
pub const MOVE_ENTRY: &str = "radix_move";

/// All entry points a backend must compile before it can run a pass.
pub const ENTRY_POINTS: [&str; 4] = [SETUP_ENTRY, GATHER_ENTRY, PROPAGATE_ENTRY, MOVE_ENTRY];

/// Default parallel group size (threads cooperating in one local scan).
pub const DEFAULT_GROUP_SIZE: usize = 256;

/// Options baked into the kernels when they are compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelOptions {
    /// Parallel group size `G`, exposed to kernel source as `LOCAL_SIZE`.
    pub group_size: usize,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
        }
    }
}

impl KernelOptions {
    pub fn with_group_size(group_size: usize) -> Result<Self> {
        let options = Self { group_size };
        options.validate()?;
        Ok(options)
    }

    /// The scan needs at least two counters per group to make progress, and
    /// the device kernels step their in-group offsets by powers of two.
    pub fn validate(&self) -> Result<()> {
        if self.group_size < 2 || !self.group_size.is_power_of_two() {
            return Err(SortError::InvalidConfig(format!(
                "group size must be a power of two >= 2, got {}",
                self.group_size
            )));
        }
        Ok(())
    }

    /// Preprocessor definitions as `(name, value)` pairs.
    pub fn defines(&self) -> Vec<(&'static str, String)> {
        vec![("LOCAL_SIZE", self.group_size.to_string())]
    }

    /// Prepend the definitions to kernel source as `#define` lines.
    pub fn apply_to(&self, source: &str) -> String {
        let mut out = String::with_capacity(source.len() + 64);
        for (name, value) in self.defines() {
            out.push_str("#define ");
            out.push_str(name);
            out.push(' ');
            out.push_str(&value);
            out.push('\n');
        }
        out.push_str(source);
        out
    }
}

/// Launch geometry: the group size and the total number of workers.
///
/// `global` is always a multiple of `group`; workers past the real item
/// count must do nothing (or contribute zero to group-wide operations).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    pub group: usize,
    pub global: usize,
}

impl WorkSize {
    /// Smallest geometry with at least `items` workers.
    pub fn covering(group: usize, items: usize) -> Self {
        Self {
            group,
            global: items.div_ceil(group) * group,
        }
    }

    pub fn groups(&self) -> usize {
        self.global / self.group
    }

    pub fn is_empty(&self) -> bool {
        self.global == 0
    }
}

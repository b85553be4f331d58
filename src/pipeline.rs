//! Radix Pipeline: 32 dependent one-bit passes, least significant bit first.
//!
//! The pipeline owns both Key Array buffers and both Count Array buffers for
//! the whole run. After every pass the key buffers swap roles, so the pass
//! output becomes the next pass input without any copy.

use crate::checker::{self, CheckLevel};
use crate::device::{ComputeDevice, DeviceBuffer};
use crate::double_buffer::DoubleBuffer;
use crate::error::{Result, SortError};
use crate::pass::radix_pass;

/// Number of passes, one per key bit.
pub const KEY_BITS: u32 = u32::BITS;

pub struct RadixPipeline<D: ComputeDevice> {
    device: D,
    keys: DoubleBuffer<D::Buffer<u32>>,
    counts: DoubleBuffer<D::Buffer<u64>>,
    len: usize,
    check: CheckLevel,
}

impl<D: ComputeDevice> RadixPipeline<D> {
    pub fn new(device: D) -> Result<Self> {
        let keys = DoubleBuffer::new(device.alloc(0)?, device.alloc(0)?);
        let counts = DoubleBuffer::new(device.alloc(1)?, device.alloc(1)?);
        Ok(Self {
            device,
            keys,
            counts,
            len: 0,
            check: CheckLevel::Off,
        })
    }

    pub fn with_check_level(mut self, check: CheckLevel) -> Self {
        self.check = check;
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Number of keys currently loaded.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size the buffers for `input` and load it as the current Key Array.
    pub fn upload(&mut self, input: &[u32]) -> Result<()> {
        let n = input.len();
        self.keys.for_each_mut(|buffer| buffer.resize(n))?;
        self.counts.for_each_mut(|buffer| buffer.resize(n + 1))?;
        self.keys.current_mut().write(input)?;
        self.len = n;
        Ok(())
    }

    /// Run one pass for `bit` and swap the key buffers.
    pub fn run_pass(&mut self, bit: u32) -> Result<()> {
        if bit >= KEY_BITS {
            return Err(SortError::InvalidConfig(format!(
                "bit index {} out of range [0, {})",
                bit, KEY_BITS
            )));
        }
        let n = self.len;
        radix_pass(&self.device, &mut self.keys, &mut self.counts, n, bit)?;
        if n > 0 && self.check.verifies() {
            self.check_pass(n, bit)?;
        }
        self.keys.swap();
        Ok(())
    }

    /// Sort the loaded keys in place on the device.
    pub fn run(&mut self) -> Result<()> {
        if self.len == 0 {
            return Ok(());
        }
        for bit in 0..KEY_BITS {
            log::trace!("pass {} of {}", bit + 1, KEY_BITS);
            self.run_pass(bit)?;
        }
        Ok(())
    }

    /// Read the current Key Array into `dst`.
    pub fn download(&self, dst: &mut [u32]) -> Result<()> {
        self.keys.current().read(dst)
    }

    /// Upload, run all passes and read back into the same slice.
    pub fn sort(&mut self, data: &mut [u32]) -> Result<()> {
        self.upload(data)?;
        self.run()?;
        self.download(data)
    }

    /// Copy of the current Key Array.
    pub fn keys_snapshot(&self) -> Result<Vec<u32>> {
        let mut out = vec![0u32; self.len];
        self.download(&mut out)?;
        Ok(out)
    }

    /// Copy of the Count Array produced by the last pass.
    pub fn counts_snapshot(&self) -> Result<Vec<u64>> {
        let mut out = vec![0u64; self.len + 1];
        self.counts.current().read(&mut out)?;
        Ok(out)
    }

    /// Cross-check the counts of the pass just run against the pre-pass keys,
    /// which are still in the current key buffer.
    fn check_pass(&self, n: usize, bit: u32) -> Result<()> {
        let mut keys = vec![0u32; n];
        self.keys.current().read(&mut keys)?;
        let mut counts = vec![0u64; n + 1];
        self.counts.current().read(&mut counts)?;

        if self.check.previews() {
            for line in pass_preview(&keys, &counts, bit) {
                println!("{}", line);
            }
        }
        checker::verify_prefix_sums(&keys, &counts, bit)
    }
}

/// Preview lines for one pass: the keys the pass consumed and the prefix
/// sums it produced from them.
fn pass_preview(keys_before: &[u32], counts: &[u64], bit: u32) -> [String; 2] {
    [
        checker::preview(keys_before, &format!("Keys before pass (bit {}):", bit)),
        checker::preview(counts, &format!("Prefix sums (bit {}):", bit)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::host::HostDevice;
    use crate::kernel::KernelOptions;
    use crate::scan::bit_counts_host;

    fn pipeline(group_size: usize) -> RadixPipeline<HostDevice> {
        let device = HostDevice::with_threads(KernelOptions { group_size }, 2).unwrap();
        RadixPipeline::new(device).unwrap()
    }

    #[test]
    fn test_sort_small_scenario() {
        let mut data = vec![5u32, 3, 8, 1];
        let mut pipeline = pipeline(2);
        pipeline.sort(&mut data).unwrap();
        assert_eq!(data, vec![1, 3, 5, 8]);
    }

    #[test]
    fn test_bit_zero_counts() {
        let mut pipeline = pipeline(4);
        pipeline.upload(&[5, 3, 8, 1]).unwrap();
        pipeline.run_pass(0).unwrap();
        assert_eq!(pipeline.counts_snapshot().unwrap(), vec![0, 1, 2, 2, 3]);
        assert_eq!(pipeline.keys_snapshot().unwrap(), vec![8, 5, 3, 1]);
    }

    #[test]
    fn test_each_pass_counts_match_pre_pass_keys() {
        let input: Vec<u32> = (0..777u32).map(|i| i.wrapping_mul(0x9e37_79b9) ^ 0x5bd1).collect();
        let mut pipeline = pipeline(8).with_check_level(CheckLevel::Verify);
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
    }

    #[test]
    fn test_empty_and_single() {
        let mut pipeline = pipeline(4);
        let mut empty: Vec<u32> = Vec::new();
        pipeline.sort(&mut empty).unwrap();
        assert!(empty.is_empty());
        assert!(pipeline.is_empty());

        let mut single = vec![u32::MAX];
        pipeline.sort(&mut single).unwrap();
        assert_eq!(single, vec![u32::MAX]);
    }

    #[test]
    fn test_pipeline_is_reusable_across_sizes() {
        let mut pipeline = pipeline(16);
        for n in [100usize, 10, 1000, 0, 3] {
            let mut data: Vec<u32> = (0..n as u32).rev().collect();
            pipeline.sort(&mut data).unwrap();
            assert_eq!(data, (0..n as u32).collect::<Vec<_>>(), "n = {}", n);
        }
    }

    #[test]
    fn test_equal_keys_unchanged() {
        let mut data = vec![42u32; 1000];
        pipeline(256).sort(&mut data).unwrap();
        assert_eq!(data, vec![42u32; 1000]);
    }

    #[test]
    fn test_pass_preview_shows_pre_pass_keys() {
        let [keys, counts] = pass_preview(&[5, 3, 8, 1], &[0, 1, 2, 2, 3], 0);
        assert_eq!(keys, "Keys before pass (bit 0): 5 3 8 1 ");
        assert_eq!(counts, "Prefix sums (bit 0): 0 1 2 2 3 ");
    }

    #[test]
    fn test_preview_level_sorts() {
        let mut data = vec![9u32, 2, 7, 2];
        let mut pipeline = pipeline(2).with_check_level(CheckLevel::Preview);
        pipeline.sort(&mut data).unwrap();
        assert_eq!(data, vec![2, 2, 7, 9]);
    }

    #[test]
    fn test_bit_out_of_range() {
        let mut pipeline = pipeline(4);
        pipeline.upload(&[1, 2]).unwrap();
        assert!(matches!(
            pipeline.run_pass(KEY_BITS),
            Err(SortError::InvalidConfig(_))
        ));
    }
}

//! Ping-pong storage: two slots and the index of the current one.
//!
//! Swapping only toggles the index, so the output of one phase becomes the
//! input of the next without moving any data.

#[derive(Debug)]
pub struct DoubleBuffer<B> {
    slots: [B; 2],
    current: usize,
}

impl<B> DoubleBuffer<B> {
    /// `current` starts as the first slot.
    pub fn new(current: B, next: B) -> Self {
        Self {
            slots: [current, next],
            current: 0,
        }
    }

    pub fn current(&self) -> &B {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut B {
        &mut self.slots[self.current]
    }

    pub fn next(&self) -> &B {
        &self.slots[self.current ^ 1]
    }

    /// Borrow the current slot for reading and the next slot for writing.
    pub fn split(&mut self) -> (&B, &mut B) {
        let (first, second) = self.slots.split_at_mut(1);
        if self.current == 0 {
            (&first[0], &mut second[0])
        } else {
            (&second[0], &mut first[0])
        }
    }

    /// Exchange the roles of the two slots.
    pub fn swap(&mut self) {
        self.current ^= 1;
    }

    /// Apply `f` to both slots.
    pub fn for_each_mut<E>(&mut self, mut f: impl FnMut(&mut B) -> Result<(), E>) -> Result<(), E> {
        for slot in &mut self.slots {
            f(slot)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_toggles_roles() {
        let mut buffers = DoubleBuffer::new(vec![1], vec![2]);
        assert_eq!(buffers.current(), &vec![1]);
        assert_eq!(buffers.next(), &vec![2]);

        buffers.swap();
        assert_eq!(buffers.current(), &vec![2]);
        assert_eq!(buffers.next(), &vec![1]);

        buffers.swap();
        assert_eq!(buffers.current(), &vec![1]);
    }

    #[test]
    fn test_split_writes_into_next() {
        let mut buffers = DoubleBuffer::new(vec![0u32; 3], vec![0u32; 3]);
        buffers.current_mut().copy_from_slice(&[1, 2, 3]);

        let (src, dst) = buffers.split();
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s * 10;
        }
        buffers.swap();
        assert_eq!(buffers.current(), &vec![10, 20, 30]);

        let (src, dst) = buffers.split();
        dst.copy_from_slice(src);
        assert_eq!(buffers.next(), &vec![10, 20, 30]);
    }

    #[test]
    fn test_for_each_mut_visits_both() {
        let mut buffers = DoubleBuffer::new(vec![0u8; 1], vec![0u8; 2]);
        buffers
            .for_each_mut(|slot| -> Result<(), ()> {
                slot.resize(4, 7);
                Ok(())
            })
            .unwrap();
        assert_eq!(buffers.current().len(), 4);
        assert_eq!(buffers.next(), &vec![0, 0, 7, 7]);
    }
}

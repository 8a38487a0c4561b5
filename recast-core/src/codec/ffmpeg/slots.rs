//! Fixed pool of input buffers handed out by index

use std::collections::VecDeque;

use crate::codec::{BufferInfo, CodecError, CodecResult};

#[derive(Default)]
pub(crate) struct InputSlots {
    buffers: Vec<Vec<u8>>,
    free: VecDeque<usize>,
    dequeued: Vec<bool>,
}

impl InputSlots {
    pub(crate) fn new(count: usize, len: usize) -> Self {
        Self {
            buffers: vec![vec![0; len]; count],
            free: (0..count).collect(),
            dequeued: vec![false; count],
        }
    }

    pub(crate) fn dequeue(&mut self) -> Option<usize> {
        let index = self.free.pop_front()?;
        self.dequeued[index] = true;
        Some(index)
    }

    pub(crate) fn buffer_mut(&mut self, index: usize) -> CodecResult<&mut [u8]> {
        if !self.is_dequeued(index) {
            return Err(CodecError::InvalidBuffer { index });
        }
        Ok(&mut self.buffers[index])
    }

    /// Valid bytes of a dequeued slot described by `info`. The slot stays
    /// dequeued until `recycle`.
    pub(crate) fn payload(&self, index: usize, info: &BufferInfo) -> CodecResult<&[u8]> {
        if !self.is_dequeued(index) {
            return Err(CodecError::InvalidBuffer { index });
        }
        let buffer = &self.buffers[index];
        let end = info.offset.saturating_add(info.size);
        if end > buffer.len() {
            return Err(CodecError::BufferTooSmall {
                needed: end,
                available: buffer.len(),
            });
        }
        Ok(&buffer[info.offset..end])
    }

    pub(crate) fn recycle(&mut self, index: usize) {
        if self.is_dequeued(index) {
            self.dequeued[index] = false;
            self.free.push_back(index);
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    fn is_dequeued(&self, index: usize) -> bool {
        self.dequeued.get(index).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_cycle_through_free_list() {
        let mut slots = InputSlots::new(2, 8);
        let first = slots.dequeue().unwrap();
        let second = slots.dequeue().unwrap();
        assert_eq!(slots.dequeue(), None);

        slots.buffer_mut(first).unwrap()[..3].copy_from_slice(b"abc");
        let info = BufferInfo::new(0, 3, 0, Default::default());
        assert_eq!(slots.payload(first, &info).unwrap(), b"abc");

        slots.recycle(first);
        assert!(slots.buffer_mut(first).is_err());
        assert_eq!(slots.dequeue(), Some(first));
        assert!(slots.payload(second, &BufferInfo::new(0, 9, 0, Default::default())).is_err());
    }
}

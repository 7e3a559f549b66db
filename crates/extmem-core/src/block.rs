//! Typed blocks
//!
//! A [`Block`] views one device-sized aligned buffer as a fixed-capacity
//! array of plain-old-data values. The view is raw: a block does not know
//! which logical positions it holds, and fresh blocks carry zero bytes,
//! not meaningful values. Blocks are move-only handles; their backing
//! buffer transfers into a request while a read or write is in flight.

use bytemuck::Pod;
use extmem_io::AlignedBuf;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Fixed-capacity typed view over an aligned device block
pub struct Block<V> {
    buf: AlignedBuf,
    capacity: usize,
    _values: PhantomData<V>,
}

impl<V: Pod> Block<V> {
    /// Allocate a zeroed block of `block_bytes` raw bytes.
    ///
    /// Panics if the block cannot hold a single value.
    #[must_use]
    pub fn new(block_bytes: usize) -> Self {
        assert!(
            block_bytes >= std::mem::size_of::<V>(),
            "block of {} bytes cannot hold a {}-byte value",
            block_bytes,
            std::mem::size_of::<V>()
        );
        Self::from_buf(AlignedBuf::new(block_bytes))
    }

    /// Reinterpret an existing buffer as a typed block
    #[must_use]
    pub fn from_buf(buf: AlignedBuf) -> Self {
        let capacity = buf.len() / std::mem::size_of::<V>();
        Self {
            buf,
            capacity,
            _values: PhantomData,
        }
    }

    /// A zero-capacity placeholder; never holds values
    #[must_use]
    pub fn detached() -> Self {
        Self::from_buf(AlignedBuf::empty())
    }

    /// Give up the typed view and return the raw buffer
    #[must_use]
    pub fn into_buf(self) -> AlignedBuf {
        self.buf
    }

    /// Number of values the block holds
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The block's values as a slice
    #[must_use]
    pub fn as_slice(&self) -> &[V] {
        if self.capacity == 0 {
            return &[];
        }
        let bytes = self.capacity * std::mem::size_of::<V>();
        bytemuck::cast_slice(&self.buf.as_slice()[..bytes])
    }

    /// The block's values as a mutable slice
    pub fn as_mut_slice(&mut self) -> &mut [V] {
        if self.capacity == 0 {
            return &mut [];
        }
        let bytes = self.capacity * std::mem::size_of::<V>();
        bytemuck::cast_slice_mut(&mut self.buf.as_mut_slice()[..bytes])
    }
}

impl<V: Pod> Index<usize> for Block<V> {
    type Output = V;

    fn index(&self, index: usize) -> &V {
        &self.as_slice()[index]
    }
}

impl<V: Pod> IndexMut<usize> for Block<V> {
    fn index_mut(&mut self, index: usize) -> &mut V {
        &mut self.as_mut_slice()[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity() {
        let block: Block<u32> = Block::new(16);
        assert_eq!(block.capacity(), 4);

        // Trailing bytes that do not fit a value are ignored.
        let block: Block<u32> = Block::from_buf(AlignedBuf::new(15));
        assert_eq!(block.capacity(), 3);
    }

    #[test]
    fn test_index_roundtrip() {
        let mut block: Block<u64> = Block::new(64);
        for i in 0..block.capacity() {
            block[i] = (i as u64) * 7;
        }
        assert_eq!(block.as_slice(), &[0, 7, 14, 21, 28, 35, 42, 49]);
    }

    #[test]
    fn test_buf_roundtrip_preserves_values() {
        let mut block: Block<i32> = Block::new(16);
        block[0] = -5;
        block[3] = 99;
        let block: Block<i32> = Block::from_buf(block.into_buf());
        assert_eq!(block[0], -5);
        assert_eq!(block[3], 99);
    }

    #[test]
    fn test_fresh_block_is_zeroed() {
        let block: Block<i64> = Block::new(32);
        assert!(block.as_slice().iter().all(|&v| v == 0));
    }

    #[test]
    #[should_panic]
    fn test_too_small_for_one_value() {
        let _: Block<u64> = Block::new(4);
    }
}

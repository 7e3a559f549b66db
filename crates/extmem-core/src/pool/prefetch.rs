//! Prefetch pool
//!
//! Owns a bounded set of blocks used to read ahead. A hint starts an
//! asynchronous read of a bid into a free block; a later read for the
//! same bid picks up the in-flight request instead of touching the
//! device again. At most one read per bid is ever outstanding.

use crate::block::Block;
use bytemuck::Pod;
use extmem_common::{Bid, Error, Result};
use extmem_io::{BlockIo, Request};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Bounded pool of blocks with asynchronous read-ahead
pub struct PrefetchPool<V> {
    io: Arc<dyn BlockIo>,
    free: Vec<Block<V>>,
    pending: HashMap<Bid, Request>,
}

impl<V: Pod> PrefetchPool<V> {
    /// Create a pool holding `blocks` free blocks
    pub fn new(io: Arc<dyn BlockIo>, blocks: usize) -> Self {
        let block_bytes = io.block_bytes();
        Self {
            io,
            free: (0..blocks).map(|_| Block::new(block_bytes)).collect(),
            pending: HashMap::new(),
        }
    }

    /// Number of blocks owned by the pool (free or in a pending read)
    pub fn size_prefetch(&self) -> usize {
        self.free.len() + self.pending.len()
    }

    /// Number of reads currently outstanding
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Whether a read of `bid` is outstanding
    pub fn is_hinted(&self, bid: Bid) -> bool {
        self.pending.contains_key(&bid)
    }

    /// Advise the pool that `bid` will be read soon.
    ///
    /// Starts an asynchronous read into a free block. Idempotent: a bid
    /// with an outstanding read is left alone. With no free block the
    /// hint is ignored; returns whether the bid is now (or already was)
    /// being prefetched.
    pub fn hint(&mut self, bid: Bid) -> bool {
        if self.pending.contains_key(&bid) {
            return true;
        }
        let Some(block) = self.free.pop() else {
            trace!("prefetch hint for {bid} dropped, no free block");
            return false;
        };
        trace!("prefetching {bid}");
        let request = self.io.read(block.into_buf(), bid);
        self.pending.insert(bid, request);
        true
    }

    /// Obtain the read of `bid`, reusing an outstanding prefetch if one
    /// exists.
    ///
    /// `block` is the caller's donation: on a prefetch hit it joins the
    /// free list and the in-flight request (whose buffer will hold the
    /// data) is returned; on a miss a fresh read into `block` is
    /// submitted. Either way the caller waits on the returned request and
    /// reclaims the filled buffer from it.
    pub fn read(&mut self, block: Block<V>, bid: Bid) -> Request {
        if let Some(request) = self.pending.remove(&bid) {
            trace!("prefetch hit for {bid}");
            self.free.push(block);
            request
        } else {
            trace!("prefetch miss for {bid}");
            self.io.read(block.into_buf(), bid)
        }
    }

    /// Contribute a block to the free list
    pub fn add(&mut self, block: Block<V>) {
        self.free.push(block);
    }

    /// Drop an outstanding read of `bid`, reclaiming its block.
    ///
    /// Call before releasing a hinted bid back to the allocator, so the
    /// stale read cannot be mistaken for a prefetch of the slot's next
    /// owner. Returns whether a read was outstanding.
    pub fn invalidate(&mut self, bid: Bid) -> bool {
        let Some(request) = self.pending.remove(&bid) else {
            return false;
        };
        request.cancel();
        let _ = request.wait();
        self.free.push(Block::from_buf(
            request
                .take_buffer()
                .expect("settled read returns its buffer"),
        ));
        true
    }

    /// Take a free block out of the pool.
    ///
    /// Pending reads are not raided: their blocks are promised to a bid.
    pub fn steal(&mut self) -> Result<Block<V>> {
        self.free.pop().ok_or(Error::PoolExhausted { capacity: 0 })
    }

    /// Grow or shrink the pool to `blocks`.
    ///
    /// Shrinking drops free blocks first, then cancels and awaits
    /// outstanding reads it cannot keep.
    pub fn resize(&mut self, blocks: usize) -> Result<()> {
        while self.size_prefetch() > blocks {
            if self.free.pop().is_some() {
                continue;
            }
            let bid = *self.pending.keys().next().expect("size counted a pending read");
            let request = self.pending.remove(&bid).expect("key just observed");
            request.cancel();
            match request.wait() {
                Ok(()) | Err(Error::Cancelled) => {}
                Err(e) => return Err(e),
            }
            let _ = request.take_buffer();
        }
        let block_bytes = self.io.block_bytes();
        while self.size_prefetch() < blocks {
            self.free.push(Block::new(block_bytes));
        }
        Ok(())
    }
}

impl<V> Drop for PrefetchPool<V> {
    fn drop(&mut self) {
        // Outstanding reads are cancelled best-effort and awaited so no
        // worker is left writing into a released buffer.
        for request in self.pending.values() {
            request.cancel();
        }
        for (_, request) in self.pending.drain() {
            let _ = request.wait();
            let _ = request.take_buffer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extmem_io::{AlignedBuf, MemIo};

    fn io_with_block(bid: Bid, fill: u8) -> Arc<MemIo> {
        let io = Arc::new(MemIo::new(1, 16));
        let mut buf = AlignedBuf::new(16);
        buf.as_mut_slice().fill(fill);
        io.write(buf, bid).wait().unwrap();
        io
    }

    #[test]
    fn test_hint_then_read_hits() {
        let bid = Bid::new(0, 5);
        let io = io_with_block(bid, 7);
        let mut pool: PrefetchPool<u8> = PrefetchPool::new(io, 2);

        assert!(pool.hint(bid));
        assert!(pool.is_hinted(bid));
        assert_eq!(pool.in_flight(), 1);

        let donation = pool.steal().unwrap();
        let request = pool.read(donation, bid);
        assert!(!pool.is_hinted(bid));
        // The donation joined the free list; the prefetched block rides in
        // the request until the caller reclaims it.
        assert_eq!(pool.size_prefetch(), 1);

        request.wait().unwrap();
        let block: Block<u8> = Block::from_buf(request.take_buffer().unwrap());
        assert!(block.as_slice().iter().all(|&v| v == 7));
    }

    #[test]
    fn test_hint_is_idempotent() {
        let bid = Bid::new(0, 1);
        let mut pool: PrefetchPool<u8> = PrefetchPool::new(io_with_block(bid, 1), 2);
        assert!(pool.hint(bid));
        assert!(pool.hint(bid));
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(pool.size_prefetch(), 2);
    }

    #[test]
    fn test_hint_without_free_block_is_ignored() {
        let io = Arc::new(MemIo::new(1, 16));
        let mut pool: PrefetchPool<u8> = PrefetchPool::new(io, 1);
        assert!(pool.hint(Bid::new(0, 1)));
        assert!(!pool.hint(Bid::new(0, 2)));
        assert_eq!(pool.in_flight(), 1);
    }

    #[test]
    fn test_read_miss_goes_to_device() {
        let bid = Bid::new(0, 3);
        let io = io_with_block(bid, 9);
        let mut pool: PrefetchPool<u8> = PrefetchPool::new(io, 1);

        let donation = pool.steal().unwrap();
        let request = pool.read(donation, bid);
        request.wait().unwrap();
        let block: Block<u8> = Block::from_buf(request.take_buffer().unwrap());
        assert!(block.as_slice().iter().all(|&v| v == 9));
        // The donated block went to the device, not back to the pool.
        assert_eq!(pool.size_prefetch(), 0);
        pool.add(block);
        assert_eq!(pool.size_prefetch(), 1);
    }

    #[test]
    fn test_invalidate_reclaims_pending_block() {
        let bid = Bid::new(0, 6);
        let mut pool: PrefetchPool<u8> = PrefetchPool::new(io_with_block(bid, 3), 2);
        pool.hint(bid);
        assert_eq!(pool.in_flight(), 1);

        assert!(pool.invalidate(bid));
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.size_prefetch(), 2);
        assert!(!pool.invalidate(bid));
    }

    #[test]
    fn test_resize_shrinks_through_pending() {
        let bid = Bid::new(0, 4);
        let mut pool: PrefetchPool<u8> = PrefetchPool::new(io_with_block(bid, 2), 3);
        pool.hint(bid);
        pool.resize(1).unwrap();
        assert_eq!(pool.size_prefetch(), 1);
        pool.resize(5).unwrap();
        assert_eq!(pool.size_prefetch(), 5);
    }
}

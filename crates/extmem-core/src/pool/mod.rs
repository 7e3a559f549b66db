//! Block pools
//!
//! The write pool absorbs eviction latency (write-behind), the prefetch
//! pool absorbs rehydration latency (read-ahead); [`ReadWritePool`]
//! bundles one of each for containers that do both. A pool may be shared
//! across containers through [`SharedPool`]; the sharing party is
//! responsible for serialising access.

mod prefetch;
mod write;

pub use prefetch::PrefetchPool;
pub use write::WritePool;

use crate::block::Block;
use bytemuck::Pod;
use extmem_common::{Bid, Result};
use extmem_io::{BlockIo, Request};
use parking_lot::Mutex;
use std::sync::Arc;

/// A read/write pool shared between containers and their streams
pub type SharedPool<V> = Arc<Mutex<ReadWritePool<V>>>;

/// Combined write-behind and read-ahead pool
pub struct ReadWritePool<V> {
    write: WritePool<V>,
    prefetch: PrefetchPool<V>,
}

impl<V: Pod> ReadWritePool<V> {
    /// Create a pool with `write_blocks` blocks for writing and
    /// `prefetch_blocks` blocks for read-ahead
    pub fn new(io: Arc<dyn BlockIo>, write_blocks: usize, prefetch_blocks: usize) -> Self {
        Self {
            write: WritePool::new(Arc::clone(&io), write_blocks),
            prefetch: PrefetchPool::new(io, prefetch_blocks),
        }
    }

    /// Take a free block (from the write side)
    pub fn steal(&mut self) -> Result<Block<V>> {
        self.write.steal()
    }

    /// Return a block (to the write side)
    pub fn add(&mut self, block: Block<V>) {
        self.write.add(block);
    }

    /// Submit an asynchronous write of `block` to `bid`
    pub fn write(&mut self, block: Block<V>, bid: Bid) -> Request {
        self.write.write(block, bid)
    }

    /// Advise that `bid` will be read soon
    pub fn hint(&mut self, bid: Bid) -> bool {
        self.prefetch.hint(bid)
    }

    /// Obtain the read of `bid`, reusing an outstanding prefetch
    pub fn read(&mut self, block: Block<V>, bid: Bid) -> Request {
        self.prefetch.read(block, bid)
    }

    /// Drop an outstanding prefetch of `bid`, reclaiming its block
    pub fn invalidate(&mut self, bid: Bid) -> bool {
        self.prefetch.invalidate(bid)
    }

    /// Number of blocks on the write side
    pub fn size_write(&self) -> usize {
        self.write.size()
    }

    /// Number of blocks on the prefetch side
    pub fn size_prefetch(&self) -> usize {
        self.prefetch.size_prefetch()
    }

    /// Grow or shrink the write side
    pub fn resize_write(&mut self, blocks: usize) -> Result<()> {
        self.write.resize(blocks)
    }

    /// Grow or shrink the prefetch side
    pub fn resize_prefetch(&mut self, blocks: usize) -> Result<()> {
        self.prefetch.resize(blocks)
    }

    /// Wait for every in-flight write to complete
    pub fn drain_writes(&mut self) -> Result<()> {
        self.write.drain()
    }
}

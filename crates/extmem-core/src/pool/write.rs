//! Write pool
//!
//! Owns a bounded set of blocks destined for writing. A block handed to
//! [`WritePool::write`] stays reachable from the pool (inside its pending
//! request) until the write completes, at which point it becomes free
//! again. Conservation invariant: every block is either in the free list,
//! riding in a pending write, or stolen by a caller.

use crate::block::Block;
use bytemuck::Pod;
use extmem_common::{Bid, Error, Result};
use extmem_io::{BlockIo, Request};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

/// Bounded pool of blocks with asynchronous write-behind
pub struct WritePool<V> {
    io: Arc<dyn BlockIo>,
    free: Vec<Block<V>>,
    busy: VecDeque<(Bid, Request)>,
}

impl<V: Pod> WritePool<V> {
    /// Create a pool holding `blocks` free blocks
    pub fn new(io: Arc<dyn BlockIo>, blocks: usize) -> Self {
        let block_bytes = io.block_bytes();
        Self {
            io,
            free: (0..blocks).map(|_| Block::new(block_bytes)).collect(),
            busy: VecDeque::new(),
        }
    }

    /// Number of blocks owned by the pool (free or in a pending write)
    pub fn size(&self) -> usize {
        self.free.len() + self.busy.len()
    }

    /// Number of writes currently in flight
    pub fn in_flight(&self) -> usize {
        self.busy.len()
    }

    /// Take a free block out of the pool.
    ///
    /// Reaps completed writes first; if none are free, blocks on the
    /// oldest in-flight write. Fails only when the pool owns no blocks at
    /// all.
    pub fn steal(&mut self) -> Result<Block<V>> {
        if let Some(block) = self.free.pop() {
            return Ok(block);
        }
        self.reap()?;
        if let Some(block) = self.free.pop() {
            return Ok(block);
        }
        let Some((bid, request)) = self.busy.pop_front() else {
            return Err(Error::PoolExhausted { capacity: 0 });
        };
        trace!("write pool empty, waiting for write of {bid}");
        let result = request.wait();
        let block = Self::reclaim(&request);
        match result {
            Ok(()) => Ok(block),
            Err(e) => {
                self.free.push(block);
                Err(e)
            }
        }
    }

    /// Transfer `block` into the pool and submit its write.
    ///
    /// The pool retains the block until the write completes. Writes
    /// against one disk start in submission order; completion order is
    /// unspecified.
    pub fn write(&mut self, block: Block<V>, bid: Bid) -> Request {
        let request = self.io.write(block.into_buf(), bid);
        self.busy.push_back((bid, request.clone()));
        request
    }

    /// Contribute a block to the free list
    pub fn add(&mut self, block: Block<V>) {
        self.free.push(block);
    }

    /// Grow or shrink the pool to `blocks`.
    ///
    /// Shrinking drops free blocks first and then waits out in-flight
    /// writes it cannot keep.
    pub fn resize(&mut self, blocks: usize) -> Result<()> {
        while self.size() > blocks {
            if self.free.pop().is_some() {
                continue;
            }
            let (_, request) = self.busy.pop_front().expect("size() counted a busy entry");
            request.wait()?;
            drop(Self::reclaim(&request));
        }
        let block_bytes = self.io.block_bytes();
        while self.size() < blocks {
            self.free.push(Block::new(block_bytes));
        }
        Ok(())
    }

    /// Wait for every in-flight write to complete
    pub fn drain(&mut self) -> Result<()> {
        let mut result = Ok(());
        while let Some((_, request)) = self.busy.pop_front() {
            if let Err(e) = request.wait() {
                result = Err(e);
            }
            self.free.push(Self::reclaim(&request));
        }
        result
    }

    /// Move completed writes back to the free list without blocking
    fn reap(&mut self) -> Result<()> {
        let mut result = Ok(());
        let mut i = 0;
        while i < self.busy.len() {
            if !self.busy[i].1.poll() {
                i += 1;
                continue;
            }
            let (_, request) = self.busy.remove(i).expect("index checked");
            if let Err(e) = request.wait() {
                result = Err(e);
            }
            self.free.push(Self::reclaim(&request));
        }
        result
    }

    fn reclaim(request: &Request) -> Block<V> {
        Block::from_buf(
            request
                .take_buffer()
                .expect("completed write returns its buffer"),
        )
    }
}

impl<V> Drop for WritePool<V> {
    fn drop(&mut self) {
        // In-flight writes must complete before their buffers are released.
        while let Some((_, request)) = self.busy.pop_front() {
            let _ = request.wait();
            let _ = request.take_buffer();
        }
    }
}

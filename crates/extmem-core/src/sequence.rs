//! Block-backed sequence
//!
//! A deque-like container whose elements live in fixed-size blocks on a
//! block device. Only two blocks are ever resident: the front block and
//! the back block (one shared block while the sequence is small). Evicted
//! middle blocks are tracked front-to-back in a bid deque; that order is
//! the only ordering that matters for correctness.
//!
//! Pushes evict full blocks through the write pool without blocking; pops
//! that cross into a middle block rehydrate it through the prefetch pool,
//! hinting the following bids so later pops find their data already in
//! flight. There is no random access: the contents are reached from the
//! two ends, or scanned with [`SeqStream`] / [`RevStream`].

use crate::block::Block;
use crate::pool::{ReadWritePool, SharedPool};
use bytemuck::Pod;
use extmem_common::{Bid, Error, Result};
use extmem_io::{BlockManager, Request};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use tracing::{debug, warn};

/// External-memory sequence with deque-style access at both ends
pub struct Sequence<V: Pod> {
    mgr: Arc<BlockManager>,
    pool: SharedPool<V>,
    /// Always resident; holds the logically first elements
    front_block: Block<V>,
    /// Always resident when present; `None` while front and back share
    /// one block
    back_block: Option<Block<V>>,
    /// Index of the front element in the front block
    front_idx: usize,
    /// One past the back element in the back block; equals `front_idx`
    /// when the sequence is empty
    back_next: usize,
    size: u64,
    /// Bids of the evicted middle blocks, front-to-back
    bids: VecDeque<Bid>,
    /// Stripes the allocator placement; monotone over the sequence's life
    alloc_count: u64,
    /// How many bids around the active end get prefetch hints
    blocks2prefetch: usize,
    /// Elements per block
    elems: usize,
}

impl<V: Pod> Sequence<V> {
    /// Create an empty sequence with its own pools sized for the
    /// device's disk count `D`: a write pool of `max(D, 3)` blocks and a
    /// prefetch pool of `D + 2` blocks.
    pub fn new(mgr: Arc<BlockManager>) -> Result<Self> {
        let disks = mgr.disks();
        Self::with_pool_sizes(mgr, disks.max(3), disks + 2, None)
    }

    /// Create an empty sequence with explicit pool capacities.
    ///
    /// `blocks2prefetch` is the number of bids hinted around the active
    /// end; `None` uses the prefetch pool size.
    pub fn with_pool_sizes(
        mgr: Arc<BlockManager>,
        write_blocks: usize,
        prefetch_blocks: usize,
        blocks2prefetch: Option<usize>,
    ) -> Result<Self> {
        let pool = ReadWritePool::new(mgr.io(), write_blocks, prefetch_blocks);
        Self::with_pool(mgr, Arc::new(Mutex::new(pool)), blocks2prefetch)
    }

    /// Create an empty sequence over an externally owned pool.
    ///
    /// The caller is responsible for serialising access when the pool is
    /// shared with other containers.
    pub fn with_pool(
        mgr: Arc<BlockManager>,
        pool: SharedPool<V>,
        blocks2prefetch: Option<usize>,
    ) -> Result<Self> {
        let elems = mgr.block_bytes() / mem::size_of::<V>();
        if elems == 0 {
            return Err(Error::configuration(format!(
                "{}-byte blocks cannot hold a {}-byte value",
                mgr.block_bytes(),
                mem::size_of::<V>()
            )));
        }

        let (front_block, prefetch_size) = {
            let mut p = pool.lock();
            if p.size_write() < 2 {
                warn!(
                    "sequence: write pool of {} block(s) is too small, resizing to 3",
                    p.size_write()
                );
                p.resize_write(3)?;
            } else if p.size_write() < 3 {
                debug!("sequence: no spare block for buffered writing");
            }
            if p.size_prefetch() < 1 {
                warn!("sequence: prefetch pool is empty, reads will not overlap");
            }
            (p.steal()?, p.size_prefetch())
        };

        Ok(Self {
            mgr,
            pool,
            front_block,
            back_block: None,
            front_idx: 0,
            back_next: 0,
            size: 0,
            bids: VecDeque::new(),
            alloc_count: 0,
            blocks2prefetch: blocks2prefetch.unwrap_or(prefetch_size),
            elems,
        })
    }

    /// Number of elements
    pub fn len(&self) -> u64 {
        self.size
    }

    /// Check if the sequence is empty
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Elements per block
    pub fn block_len(&self) -> usize {
        self.elems
    }

    /// Set the number of bids hinted around the active end.
    ///
    /// Call this after resizing the prefetch pool; `None` uses the
    /// current prefetch pool size.
    pub fn set_prefetch_aggr(&mut self, blocks2prefetch: Option<usize>) {
        self.blocks2prefetch =
            blocks2prefetch.unwrap_or_else(|| self.pool.lock().size_prefetch());
    }

    /// Number of bids hinted around the active end
    pub fn prefetch_aggr(&self) -> usize {
        self.blocks2prefetch
    }

    /// Exchange the contents of two sequences; constant time
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// The back block, resolving the shared-block case
    fn back_ref(&self) -> &Block<V> {
        self.back_block.as_ref().unwrap_or(&self.front_block)
    }

    fn back_block_mut(&mut self) -> &mut Block<V> {
        match &mut self.back_block {
            Some(block) => block,
            None => &mut self.front_block,
        }
    }

    fn take_front(&mut self) -> Block<V> {
        mem::replace(&mut self.front_block, Block::detached())
    }

    /// Reference to the front element.
    ///
    /// Panics when the sequence is empty.
    pub fn front(&self) -> &V {
        assert!(!self.is_empty(), "front() on empty sequence");
        &self.front_block[self.front_idx]
    }

    /// Mutable reference to the front element.
    ///
    /// Panics when the sequence is empty.
    pub fn front_mut(&mut self) -> &mut V {
        assert!(!self.is_empty(), "front_mut() on empty sequence");
        let idx = self.front_idx;
        &mut self.front_block[idx]
    }

    /// Reference to the back element.
    ///
    /// Panics when the sequence is empty.
    pub fn back(&self) -> &V {
        assert!(!self.is_empty(), "back() on empty sequence");
        &self.back_ref()[self.back_next - 1]
    }

    /// Mutable reference to the back element.
    ///
    /// Panics when the sequence is empty.
    pub fn back_mut(&mut self) -> &mut V {
        assert!(!self.is_empty(), "back_mut() on empty sequence");
        let idx = self.back_next - 1;
        &mut self.back_block_mut()[idx]
    }

    /// Add an element at the front
    pub fn push_front(&mut self, value: V) -> Result<()> {
        if self.front_idx != 0 {
            self.front_idx -= 1;
            self.front_block[self.front_idx] = value;
            self.size += 1;
            return Ok(());
        }

        // The front block has no room at its beginning.
        if self.size == 0 {
            debug!("push_front: storing into the last cell of the empty block");
            debug_assert!(self.back_block.is_none());
            self.front_idx = self.elems - 1;
            self.back_next = self.elems;
            let idx = self.front_idx;
            self.front_block[idx] = value;
            self.size = 1;
            return Ok(());
        }

        if self.back_block.is_none() {
            // The single resident block is shared with the back and has to
            // stay in memory; it becomes the back block and a fresh block
            // becomes the front.
            debug!("push_front: shared resident block, growing a fresh front");
            let old = self.take_front();
            self.back_block = Some(old);
        } else if self.size < (2 * self.elems) as u64 {
            // Two resident blocks with a gap at the back block's end and
            // nothing on disk: shift everything towards the back instead
            // of touching the device.
            debug!("push_front: closing the in-memory gap, no I/O");
            debug_assert!(self.bids.is_empty());
            let gap = self.elems - self.back_next;
            debug_assert!(gap > 0);
            let elems = self.elems;
            let back = self.back_block.as_mut().expect("two resident blocks");
            back.as_mut_slice().copy_within(0..self.back_next, gap);
            back.as_mut_slice()[..gap]
                .copy_from_slice(&self.front_block.as_slice()[elems - gap..]);
            self.front_block.as_mut_slice().copy_within(0..elems - gap, gap);
            self.front_idx += gap;
            self.back_next += gap;
            debug_assert_eq!(self.back_next, self.elems);

            self.front_idx -= 1;
            let idx = self.front_idx;
            self.front_block[idx] = value;
            self.size += 1;
            return Ok(());
        } else {
            // Evict the full front block.
            let bid = self.mgr.new_block(self.alloc_count);
            self.alloc_count += 1;
            debug!("push_front: writing front block to {bid}");
            self.bids.push_front(bid);
            let old = self.take_front();
            let mut pool = self.pool.lock();
            pool.write(old, bid);
            if self.bids.len() <= self.blocks2prefetch {
                // The written block is near the front; pops will want it
                // back soon.
                pool.hint(bid);
            }
        }

        self.front_block = self.pool.lock().steal()?;
        self.front_idx = self.elems - 1;
        let idx = self.front_idx;
        self.front_block[idx] = value;
        self.size += 1;
        Ok(())
    }

    /// Add an element at the back
    pub fn push_back(&mut self, value: V) -> Result<()> {
        if self.back_next != self.elems {
            let idx = self.back_next;
            self.back_block_mut()[idx] = value;
            self.back_next += 1;
            self.size += 1;
            return Ok(());
        }

        // The back block is full.
        if self.back_block.is_none() {
            // Shared with the front; keep it in memory and grow a fresh
            // back block.
            debug!("push_back: shared resident block, growing a fresh back");
        } else if self.size < (2 * self.elems) as u64 {
            // Two resident blocks with a gap at the front block's
            // beginning and nothing on disk: shift everything towards the
            // front.
            debug!("push_back: closing the in-memory gap, no I/O");
            debug_assert!(self.bids.is_empty());
            let gap = self.front_idx;
            debug_assert!(gap > 0);
            let elems = self.elems;
            let back = self.back_block.as_mut().expect("two resident blocks");
            self.front_block.as_mut_slice().copy_within(gap..elems, 0);
            self.front_block.as_mut_slice()[elems - gap..]
                .copy_from_slice(&back.as_slice()[..gap]);
            back.as_mut_slice().copy_within(gap..elems, 0);
            self.front_idx = 0;
            self.back_next -= gap;

            let idx = self.back_next;
            back[idx] = value;
            self.back_next += 1;
            self.size += 1;
            return Ok(());
        } else {
            // Evict the full back block.
            let bid = self.mgr.new_block(self.alloc_count);
            self.alloc_count += 1;
            debug!("push_back: writing back block to {bid}");
            self.bids.push_back(bid);
            let old = self.back_block.take().expect("two resident blocks");
            let mut pool = self.pool.lock();
            pool.write(old, bid);
            if self.bids.len() <= self.blocks2prefetch {
                pool.hint(bid);
            }
        }

        let fresh = self.pool.lock().steal()?;
        self.back_block = Some(fresh);
        self.back_block_mut()[0] = value;
        self.back_next = 1;
        self.size += 1;
        Ok(())
    }

    /// Remove the front element.
    ///
    /// Panics when the sequence is empty. May block on a read when the
    /// next middle block has to be rehydrated.
    pub fn pop_front(&mut self) -> Result<()> {
        assert!(!self.is_empty(), "pop_front() on empty sequence");

        if self.front_idx != self.elems - 1 {
            self.front_idx += 1;
            self.size -= 1;
            return Ok(());
        }

        // Consuming the last element of the front block.
        if self.back_block.is_none() {
            debug!("pop_front: sequence emptied, keeping the block for reuse");
            debug_assert_eq!(self.size, 1);
            debug_assert_eq!(self.back_next, self.elems);
            debug_assert!(self.bids.is_empty());
            self.front_idx = 0;
            self.back_next = 0;
            self.size = 0;
            return Ok(());
        }

        self.size -= 1;
        if self.size <= self.elems as u64 {
            debug!("pop_front: back block becomes the front");
            debug_assert!(self.bids.is_empty());
            let back = self.back_block.take().expect("two resident blocks");
            let old = mem::replace(&mut self.front_block, back);
            self.pool.lock().add(old);
            self.front_idx = 0;
            return Ok(());
        }

        // Rehydrate the first middle block.
        debug_assert!(!self.bids.is_empty());
        let bid = self.bids[0];
        debug!("pop_front: reading middle block {bid}");
        let old = self.take_front();
        let request = {
            let mut pool = self.pool.lock();
            let request = pool.read(old, bid);
            for i in 1..self.bids.len() {
                if i > self.blocks2prefetch {
                    break;
                }
                pool.hint(self.bids[i]);
            }
            request
        };
        request.wait()?;
        self.front_block = reclaim(&request);
        self.front_idx = 0;
        self.mgr.delete_block(bid);
        self.bids.pop_front();
        Ok(())
    }

    /// Remove the back element.
    ///
    /// Panics when the sequence is empty. May block on a read when the
    /// previous middle block has to be rehydrated.
    pub fn pop_back(&mut self) -> Result<()> {
        assert!(!self.is_empty(), "pop_back() on empty sequence");

        if self.back_next != 1 {
            self.back_next -= 1;
            self.size -= 1;
            return Ok(());
        }

        // Consuming the only element of the back block.
        if self.back_block.is_none() {
            debug!("pop_back: sequence emptied, keeping the block for reuse");
            debug_assert_eq!(self.size, 1);
            debug_assert_eq!(self.front_idx, 0);
            debug_assert!(self.bids.is_empty());
            self.front_idx = 0;
            self.back_next = 0;
            self.size = 0;
            return Ok(());
        }

        self.size -= 1;
        if self.size <= self.elems as u64 {
            debug!("pop_back: front block becomes the back");
            debug_assert!(self.bids.is_empty());
            let old = self.back_block.take().expect("two resident blocks");
            self.pool.lock().add(old);
            self.back_next = self.elems;
            return Ok(());
        }

        // Rehydrate the last middle block.
        debug_assert!(!self.bids.is_empty());
        let bid = *self.bids.back().expect("bids checked non-empty");
        debug!("pop_back: reading middle block {bid}");
        let old = self.back_block.take().expect("two resident blocks");
        let request = {
            let mut pool = self.pool.lock();
            let request = pool.read(old, bid);
            let last = self.bids.len() - 1;
            for i in 1..self.bids.len() {
                if i > self.blocks2prefetch {
                    break;
                }
                pool.hint(self.bids[last - i]);
            }
            request
        };
        request.wait()?;
        self.back_block = Some(reclaim(&request));
        self.back_next = self.elems;
        self.mgr.delete_block(bid);
        self.bids.pop_back();
        Ok(())
    }

    /// Forward stream over the whole sequence
    pub fn stream(&self) -> SeqStream<'_, V> {
        SeqStream {
            seq: self,
            remaining: self.size,
            cursor: Cursor::Front,
            idx: self.front_idx,
            next_bid: 0,
        }
    }

    /// Forward stream skipping the first `offset` elements.
    ///
    /// Positions in the front or back block without I/O; landing in a
    /// middle block costs one synchronous read.
    pub fn stream_at(&self, offset: u64) -> Result<SeqStream<'_, V>> {
        assert!(offset <= self.size, "stream offset {offset} beyond the end");
        let remaining = self.size - offset;
        if remaining == 0 {
            return Ok(SeqStream {
                seq: self,
                remaining: 0,
                cursor: Cursor::Front,
                idx: self.front_idx,
                next_bid: self.bids.len(),
            });
        }

        let elems = self.elems as u64;
        let front_fill = (self.elems - self.front_idx) as u64;
        if offset < front_fill {
            // Lands in the front block.
            return Ok(SeqStream {
                seq: self,
                remaining,
                cursor: Cursor::Front,
                idx: self.front_idx + offset as usize,
                next_bid: 0,
            });
        }
        let mid_offset = offset - front_fill;
        if remaining <= self.back_next as u64 {
            // Lands in the back block.
            return Ok(SeqStream {
                seq: self,
                remaining,
                cursor: Cursor::Back,
                idx: (mid_offset % elems) as usize,
                next_bid: self.bids.len(),
            });
        }

        // Lands in a middle block: whole blocks are skipped by advancing
        // the bid cursor, the offset within the fetched block positions
        // the element cursor.
        let block_shift = (mid_offset / elems) as usize;
        let block_offset = (mid_offset % elems) as usize;
        let donation = self.pool.lock().steal()?;
        let bid = self.bids[block_shift];
        debug!("stream_at: reading middle block {bid}");
        let request = {
            let mut pool = self.pool.lock();
            let request = pool.read(donation, bid);
            for i in (block_shift + 1)..self.bids.len() {
                if i - block_shift > self.blocks2prefetch {
                    break;
                }
                pool.hint(self.bids[i]);
            }
            request
        };
        request.wait()?;
        Ok(SeqStream {
            seq: self,
            remaining,
            cursor: Cursor::Owned(reclaim(&request)),
            idx: block_offset,
            next_bid: block_shift + 1,
        })
    }

    /// Reverse stream over the whole sequence
    pub fn rev_stream(&self) -> RevStream<'_, V> {
        RevStream {
            seq: self,
            remaining: self.size,
            cursor: Cursor::Back,
            idx: self.back_next.saturating_sub(1),
            consumed_bids: 0,
        }
    }
}

impl<V: Pod> Drop for Sequence<V> {
    fn drop(&mut self) {
        {
            let mut pool = self.pool.lock();
            if let Some(back) = self.back_block.take() {
                pool.add(back);
            }
            let front = mem::replace(&mut self.front_block, Block::detached());
            if front.capacity() > 0 {
                pool.add(front);
            }
            // A shared pool may still be prefetching bids this sequence is
            // about to release; those reads must not leak to a future
            // owner of the slots.
            for &bid in &self.bids {
                pool.invalidate(bid);
            }
        }
        // An owned pool is destroyed here through the Arc; its write pool
        // waits out in-flight writes before buffers are released.
        if !self.bids.is_empty() {
            self.mgr.delete_blocks(self.bids.drain(..));
        }
    }
}

fn reclaim<V: Pod>(request: &Request) -> Block<V> {
    Block::from_buf(
        request
            .take_buffer()
            .expect("completed read returns its buffer"),
    )
}

/// Where a stream's current element lives
enum Cursor<V: Pod> {
    /// The sequence's resident front block
    Front,
    /// The sequence's resident back block
    Back,
    /// A scratch block the stream fetched from the pool
    Owned(Block<V>),
}

/// Lazy forward iteration over a [`Sequence`] with read-ahead.
///
/// Borrows the sequence for its lifetime, so the sequence cannot be
/// mutated while a stream is live. Middle blocks move through the
/// sequence's prefetch pool; the stream returns its scratch block on
/// drop.
pub struct SeqStream<'a, V: Pod> {
    seq: &'a Sequence<V>,
    remaining: u64,
    cursor: Cursor<V>,
    idx: usize,
    next_bid: usize,
}

impl<V: Pod> SeqStream<'_, V> {
    /// Elements left until end-of-stream
    pub fn len(&self) -> u64 {
        self.remaining
    }

    /// Check if the stream is exhausted
    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// The current element.
    ///
    /// Panics when the stream is exhausted.
    pub fn value(&self) -> &V {
        assert!(!self.is_empty(), "value() on exhausted stream");
        match &self.cursor {
            Cursor::Front => &self.seq.front_block[self.idx],
            Cursor::Back => &self.seq.back_ref()[self.idx],
            Cursor::Owned(block) => &block[self.idx],
        }
    }

    /// Step to the next element.
    ///
    /// Panics when the stream is exhausted. May block on a read at a
    /// block boundary.
    pub fn advance(&mut self) -> Result<()> {
        assert!(!self.is_empty(), "advance() on exhausted stream");
        let elems = self.seq.elems;

        if self.idx != elems - 1 {
            self.idx += 1;
            self.remaining -= 1;
            return Ok(());
        }

        // Past the end of the current block.
        self.remaining -= 1;
        if self.remaining == 0 {
            return Ok(());
        }

        if self.remaining <= elems as u64 {
            // The resident back block holds everything that is left.
            debug_assert_eq!(self.next_bid, self.seq.bids.len());
            if let Cursor::Owned(block) = mem::replace(&mut self.cursor, Cursor::Back) {
                self.seq.pool.lock().add(block);
            }
            self.idx = 0;
            return Ok(());
        }

        // Fetch the next middle block. Leaving the front block for the
        // first time costs one scratch block from the pool.
        let donation = match mem::replace(&mut self.cursor, Cursor::Back) {
            Cursor::Owned(block) => block,
            _ => self.seq.pool.lock().steal()?,
        };
        let bid = self.seq.bids[self.next_bid];
        let request = {
            let mut pool = self.seq.pool.lock();
            let request = pool.read(donation, bid);
            for i in (self.next_bid + 1)..self.seq.bids.len() {
                if i - self.next_bid > self.seq.blocks2prefetch {
                    break;
                }
                pool.hint(self.seq.bids[i]);
            }
            request
        };
        request.wait()?;
        self.cursor = Cursor::Owned(reclaim(&request));
        self.idx = 0;
        self.next_bid += 1;
        Ok(())
    }

    /// Read the current element and step past it
    pub fn read_value(&mut self) -> Result<V> {
        let value = *self.value();
        self.advance()?;
        Ok(value)
    }
}

impl<V: Pod> Drop for SeqStream<'_, V> {
    fn drop(&mut self) {
        if let Cursor::Owned(block) = mem::replace(&mut self.cursor, Cursor::Front) {
            self.seq.pool.lock().add(block);
        }
    }
}

/// Lazy reverse iteration over a [`Sequence`] with read-ahead.
///
/// The mirror of [`SeqStream`]: starts at the back element, consumes
/// towards the front, and hints the preceding bids.
pub struct RevStream<'a, V: Pod> {
    seq: &'a Sequence<V>,
    remaining: u64,
    cursor: Cursor<V>,
    idx: usize,
    /// How many middle bids have been consumed from the back
    consumed_bids: usize,
}

impl<V: Pod> RevStream<'_, V> {
    /// Elements left until end-of-stream
    pub fn len(&self) -> u64 {
        self.remaining
    }

    /// Check if the stream is exhausted
    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// The current element.
    ///
    /// Panics when the stream is exhausted.
    pub fn value(&self) -> &V {
        assert!(!self.is_empty(), "value() on exhausted stream");
        match &self.cursor {
            Cursor::Front => &self.seq.front_block[self.idx],
            Cursor::Back => &self.seq.back_ref()[self.idx],
            Cursor::Owned(block) => &block[self.idx],
        }
    }

    /// Step to the previous element.
    ///
    /// Panics when the stream is exhausted. May block on a read at a
    /// block boundary.
    pub fn advance(&mut self) -> Result<()> {
        assert!(!self.is_empty(), "advance() on exhausted stream");
        let elems = self.seq.elems;

        if self.idx != 0 {
            self.idx -= 1;
            self.remaining -= 1;
            return Ok(());
        }

        // Past the beginning of the current block.
        self.remaining -= 1;
        if self.remaining == 0 {
            return Ok(());
        }

        if self.remaining <= elems as u64 {
            // The resident front block holds everything that is left.
            debug_assert_eq!(self.consumed_bids, self.seq.bids.len());
            if let Cursor::Owned(block) = mem::replace(&mut self.cursor, Cursor::Front) {
                self.seq.pool.lock().add(block);
            }
            self.idx = elems - 1;
            return Ok(());
        }

        // Fetch the previous middle block.
        let donation = match mem::replace(&mut self.cursor, Cursor::Front) {
            Cursor::Owned(block) => block,
            _ => self.seq.pool.lock().steal()?,
        };
        let pos = self.seq.bids.len() - 1 - self.consumed_bids;
        let bid = self.seq.bids[pos];
        let request = {
            let mut pool = self.seq.pool.lock();
            let request = pool.read(donation, bid);
            let mut hint_pos = pos;
            for _ in 0..self.seq.blocks2prefetch {
                if hint_pos == 0 {
                    break;
                }
                hint_pos -= 1;
                pool.hint(self.seq.bids[hint_pos]);
            }
            request
        };
        request.wait()?;
        self.cursor = Cursor::Owned(reclaim(&request));
        self.idx = elems - 1;
        self.consumed_bids += 1;
        Ok(())
    }

    /// Read the current element and step past it
    pub fn read_value(&mut self) -> Result<V> {
        let value = *self.value();
        self.advance()?;
        Ok(value)
    }
}

impl<V: Pod> Drop for RevStream<'_, V> {
    fn drop(&mut self) {
        if let Cursor::Owned(block) = mem::replace(&mut self.cursor, Cursor::Front) {
            self.seq.pool.lock().add(block);
        }
    }
}

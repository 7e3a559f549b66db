//! Buffered input stream
//!
//! Streams the values of an ordered block range with asynchronous
//! read-ahead: a ring of `N` blocks rotates through an owned prefetch
//! pool, so while the application consumes one block, up to `N - 1`
//! follow-up reads are in flight. The only blocking point is a boundary
//! crossing whose read has not completed yet.

use crate::block::Block;
use crate::pool::PrefetchPool;
use bytemuck::Pod;
use extmem_common::{Bid, Error, Result};
use extmem_io::BlockIo;
use std::mem;
use std::sync::Arc;

/// Streaming cursor over an ordered block range with read-ahead
pub struct BufReader<V: Pod> {
    pool: PrefetchPool<V>,
    bids: Vec<Bid>,
    /// Values to deliver; may stop short of the last block's end
    total: u64,
    consumed: u64,
    cur: Block<V>,
    idx: usize,
    elems: usize,
    /// Next bid to fetch into the cursor
    next_block: usize,
    /// Next bid to hint
    next_hint: usize,
}

impl<V: Pod> BufReader<V> {
    /// Stream `values` values out of `bids`, rotating `nbuffers` blocks.
    ///
    /// `values` may end inside the last block (a trailing partial block);
    /// the unused slots are discarded. At least two buffers are used
    /// regardless of `nbuffers`.
    pub fn new(
        io: Arc<dyn BlockIo>,
        bids: &[Bid],
        values: u64,
        nbuffers: usize,
    ) -> Result<Self> {
        let elems = io.block_bytes() / mem::size_of::<V>();
        if elems == 0 {
            return Err(Error::configuration(format!(
                "{}-byte blocks cannot hold a {}-byte value",
                io.block_bytes(),
                mem::size_of::<V>()
            )));
        }
        assert!(
            values <= (bids.len() * elems) as u64,
            "{values} values do not fit in {} block(s)",
            bids.len()
        );

        let mut pool = PrefetchPool::new(io, nbuffers.max(2));
        let cur = pool.steal()?;
        let mut reader = Self {
            pool,
            bids: bids.to_vec(),
            total: values,
            consumed: 0,
            cur,
            idx: 0,
            elems,
            next_block: 0,
            next_hint: 0,
        };
        reader.top_up_hints();
        if reader.total > 0 {
            reader.fetch_next()?;
        }
        Ok(reader)
    }

    /// Values left until end-of-stream
    pub fn len(&self) -> u64 {
        self.total - self.consumed
    }

    /// Check if the stream is exhausted
    pub fn is_empty(&self) -> bool {
        self.consumed == self.total
    }

    /// The current value.
    ///
    /// Panics when the stream is exhausted.
    pub fn value(&self) -> &V {
        assert!(!self.is_empty(), "value() on exhausted stream");
        &self.cur[self.idx]
    }

    /// Step to the next value.
    ///
    /// Panics when the stream is exhausted. May block at a block boundary
    /// whose read has not completed.
    pub fn advance(&mut self) -> Result<()> {
        assert!(!self.is_empty(), "advance() on exhausted stream");
        self.consumed += 1;
        self.idx += 1;
        if self.idx == self.elems && self.consumed < self.total {
            self.fetch_next()?;
        }
        Ok(())
    }

    /// Read the current value and step past it
    pub fn read_value(&mut self) -> Result<V> {
        let value = *self.value();
        self.advance()?;
        Ok(value)
    }

    /// Rotate the cursor block into the pool and pull the next one out
    fn fetch_next(&mut self) -> Result<()> {
        let bid = self.bids[self.next_block];
        let donation = mem::replace(&mut self.cur, Block::detached());
        let request = self.pool.read(donation, bid);
        self.next_block += 1;
        // On a prefetch hit the donated block is free again; keep the
        // read-ahead window full.
        self.top_up_hints();
        request.wait()?;
        self.cur = Block::from_buf(
            request
                .take_buffer()
                .expect("completed read returns its buffer"),
        );
        self.idx = 0;
        Ok(())
    }

    fn top_up_hints(&mut self) {
        if self.next_hint < self.next_block {
            self.next_hint = self.next_block;
        }
        while self.next_hint < self.bids.len() {
            if !self.pool.hint(self.bids[self.next_hint]) {
                break;
            }
            self.next_hint += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extmem_io::{BlockManager, MemIo};

    /// Store `blocks * 4` consecutive u32 values and return their bids
    fn seeded(io: &Arc<MemIo>, blocks: usize) -> Vec<Bid> {
        let mgr = BlockManager::striped(Arc::clone(io) as Arc<dyn BlockIo>);
        (0..blocks)
            .map(|b| {
                let bid = mgr.new_block(b as u64);
                let mut block: Block<u32> = Block::new(16);
                for i in 0..4 {
                    block[i] = (b * 4 + i) as u32;
                }
                io.write(block.into_buf(), bid).wait().unwrap();
                bid
            })
            .collect()
    }

    #[test]
    fn test_streams_in_order() {
        let io = Arc::new(MemIo::new(1, 16));
        let bids = seeded(&io, 5);
        let mut reader: BufReader<u32> =
            BufReader::new(io, &bids, 20, 3).unwrap();
        for expected in 0..20u32 {
            assert!(!reader.is_empty());
            assert_eq!(reader.read_value().unwrap(), expected);
        }
        assert!(reader.is_empty());
    }

    #[test]
    fn test_trailing_partial_block() {
        let io = Arc::new(MemIo::new(1, 16));
        let bids = seeded(&io, 3);
        // Only 10 of the 12 stored values are part of the stream.
        let mut reader: BufReader<u32> =
            BufReader::new(io, &bids, 10, 2).unwrap();
        let mut got = Vec::new();
        while !reader.is_empty() {
            got.push(reader.read_value().unwrap());
        }
        assert_eq!(got, (0..10).collect::<Vec<u32>>());
    }

    #[test]
    fn test_empty_stream() {
        let io = Arc::new(MemIo::new(1, 16));
        let reader: BufReader<u32> = BufReader::new(io, &[], 0, 2).unwrap();
        assert!(reader.is_empty());
        assert_eq!(reader.len(), 0);
    }

    #[test]
    fn test_single_buffer_request_is_widened() {
        let io = Arc::new(MemIo::new(1, 16));
        let bids = seeded(&io, 4);
        // nbuffers == 0 would leave no block for the cursor; the reader
        // floors the ring at two blocks.
        let mut reader: BufReader<u32> = BufReader::new(io, &bids, 16, 0).unwrap();
        let mut count = 0;
        while !reader.is_empty() {
            reader.advance().unwrap();
            count += 1;
        }
        assert_eq!(count, 16);
    }
}

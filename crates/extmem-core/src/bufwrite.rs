//! Buffered output stream
//!
//! Fills an ordered block range with asynchronous write-behind: values
//! accumulate in the current block of a ring of `N` blocks; each full
//! block goes to the device through an owned write pool while a fresh
//! block is stolen for the next values. Flushing writes the final
//! partial block (if any) and completes every outstanding write.

use crate::block::Block;
use crate::pool::WritePool;
use bytemuck::Pod;
use extmem_common::{Bid, Error, Result};
use extmem_io::BlockIo;
use std::mem;
use std::sync::Arc;

/// Streaming writer over an ordered block range with write-behind
pub struct BufWriter<V: Pod> {
    pool: WritePool<V>,
    bids: Vec<Bid>,
    /// Next bid to write
    next_block: usize,
    cur: Block<V>,
    idx: usize,
    elems: usize,
}

impl<V: Pod> BufWriter<V> {
    /// Write into `bids` in order, rotating `nbuffers` blocks.
    ///
    /// At least two buffers are used regardless of `nbuffers`.
    pub fn new(io: Arc<dyn BlockIo>, bids: &[Bid], nbuffers: usize) -> Result<Self> {
        let elems = io.block_bytes() / mem::size_of::<V>();
        if elems == 0 {
            return Err(Error::configuration(format!(
                "{}-byte blocks cannot hold a {}-byte value",
                io.block_bytes(),
                mem::size_of::<V>()
            )));
        }
        let mut pool = WritePool::new(io, nbuffers.max(2));
        let cur = pool.steal()?;
        Ok(Self {
            pool,
            bids: bids.to_vec(),
            next_block: 0,
            cur,
            idx: 0,
            elems,
        })
    }

    /// Values written so far
    pub fn written(&self) -> u64 {
        (self.next_block * self.elems + self.idx) as u64
    }

    /// Append a value, submitting the current block once it fills up.
    ///
    /// Panics when the bid range is already fully written.
    pub fn push(&mut self, value: V) -> Result<()> {
        assert!(
            self.next_block < self.bids.len(),
            "push past the end of the bid range"
        );
        self.cur[self.idx] = value;
        self.idx += 1;
        if self.idx == self.elems {
            let full = mem::replace(&mut self.cur, Block::detached());
            self.pool.write(full, self.bids[self.next_block]);
            self.next_block += 1;
            self.cur = self.pool.steal()?;
            self.idx = 0;
        }
        Ok(())
    }

    /// Write the trailing partial block and complete all outstanding
    /// writes.
    ///
    /// Slots of the partial block that were never pushed carry
    /// unspecified bytes; callers that care copy the old values through
    /// before flushing.
    pub fn flush(mut self) -> Result<()> {
        if self.idx > 0 {
            assert!(
                self.next_block < self.bids.len(),
                "partial block has no bid left"
            );
            let partial = mem::replace(&mut self.cur, Block::detached());
            self.pool.write(partial, self.bids[self.next_block]);
            self.next_block += 1;
        }
        self.pool.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bufread::BufReader;
    use extmem_io::{BlockManager, MemIo};

    fn fresh_bids(io: &Arc<MemIo>, blocks: usize) -> Vec<Bid> {
        let mgr = BlockManager::striped(Arc::clone(io) as Arc<dyn BlockIo>);
        (0..blocks).map(|b| mgr.new_block(b as u64)).collect()
    }

    #[test]
    fn test_write_then_read_back() {
        let io = Arc::new(MemIo::new(1, 16));
        let bids = fresh_bids(&io, 4);

        let mut writer: BufWriter<u32> =
            BufWriter::new(Arc::clone(&io) as _, &bids, 2).unwrap();
        for v in 0..16u32 {
            writer.push(v * 3).unwrap();
        }
        assert_eq!(writer.written(), 16);
        writer.flush().unwrap();

        let mut reader: BufReader<u32> = BufReader::new(io, &bids, 16, 2).unwrap();
        for v in 0..16u32 {
            assert_eq!(reader.read_value().unwrap(), v * 3);
        }
    }

    #[test]
    fn test_partial_final_block() {
        let io = Arc::new(MemIo::new(1, 16));
        let bids = fresh_bids(&io, 2);

        let mut writer: BufWriter<u32> =
            BufWriter::new(Arc::clone(&io) as _, &bids, 2).unwrap();
        for v in 0..6u32 {
            writer.push(v).unwrap();
        }
        writer.flush().unwrap();

        let mut reader: BufReader<u32> = BufReader::new(io, &bids, 6, 2).unwrap();
        let mut got = Vec::new();
        while !reader.is_empty() {
            got.push(reader.read_value().unwrap());
        }
        assert_eq!(got, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    #[should_panic]
    fn test_push_past_range_panics() {
        let io = Arc::new(MemIo::new(1, 16));
        let bids = fresh_bids(&io, 1);
        let mut writer: BufWriter<u32> = BufWriter::new(io, &bids, 2).unwrap();
        for v in 0..5u32 {
            writer.push(v).unwrap();
        }
    }
}

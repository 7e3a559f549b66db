//! Parallel-disk block allocation
//!
//! The [`BlockManager`] hands out [`Bid`]s across the disks of a block
//! device, reusing released slots before extending the backing files. The
//! placement policy is pluggable: striping spreads consecutive allocations
//! round-robin for bandwidth, random striping spreads them uniformly.

use crate::device::BlockIo;
use extmem_common::Bid;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use tracing::trace;

/// Placement policy: which disk receives the `stripe`-th allocation.
///
/// `stripe` is a per-container counter, monotonically incremented by the
/// caller for each allocation.
pub trait AllocStrategy: Send + Sync {
    fn pick(&self, stripe: u64, disks: usize) -> usize;
}

/// Round-robin placement: consecutive allocations land on consecutive disks
pub struct Striping;

impl AllocStrategy for Striping {
    fn pick(&self, stripe: u64, disks: usize) -> usize {
        (stripe % disks as u64) as usize
    }
}

/// Uniform random placement
pub struct RandomStriping;

impl AllocStrategy for RandomStriping {
    fn pick(&self, _stripe: u64, disks: usize) -> usize {
        rand::thread_rng().gen_range(0..disks)
    }
}

struct DiskSlots {
    /// Released slots, reused before extending the file
    free: Vec<u64>,
    /// High-water mark of the backing file, in blocks
    next: u64,
}

/// Block allocator over a parallel-disk device.
///
/// Explicitly constructed and threaded through container constructors;
/// there is no process-wide instance.
pub struct BlockManager {
    io: Arc<dyn BlockIo>,
    strategy: Box<dyn AllocStrategy>,
    state: Mutex<Vec<DiskSlots>>,
}

impl BlockManager {
    /// Create a manager with the given placement strategy
    pub fn new(io: Arc<dyn BlockIo>, strategy: Box<dyn AllocStrategy>) -> Self {
        let disks = io.disks();
        Self {
            io,
            strategy,
            state: Mutex::new(
                (0..disks)
                    .map(|_| DiskSlots {
                        free: Vec::new(),
                        next: 0,
                    })
                    .collect(),
            ),
        }
    }

    /// Create a manager with round-robin striping
    pub fn striped(io: Arc<dyn BlockIo>) -> Self {
        Self::new(io, Box::new(Striping))
    }

    /// The device this manager allocates on
    pub fn io(&self) -> Arc<dyn BlockIo> {
        Arc::clone(&self.io)
    }

    /// Number of parallel disks
    pub fn disks(&self) -> usize {
        self.io.disks()
    }

    /// Raw size of one block in bytes
    pub fn block_bytes(&self) -> usize {
        self.io.block_bytes()
    }

    /// Allocate a block slot, placed according to the strategy.
    ///
    /// Released slots on the chosen disk are reused before the backing
    /// file is extended.
    pub fn new_block(&self, stripe: u64) -> Bid {
        let disk = self.strategy.pick(stripe, self.io.disks());
        let mut state = self.state.lock();
        let slots = &mut state[disk];
        let block = slots.free.pop().unwrap_or_else(|| {
            let block = slots.next;
            slots.next += 1;
            block
        });
        let bid = Bid::new(disk as u32, block);
        trace!("allocated {bid} (stripe {stripe})");
        bid
    }

    /// Release a block slot back to the allocator.
    ///
    /// The bid must have come from this manager and must not be released
    /// twice; it is invalid afterwards.
    pub fn delete_block(&self, bid: Bid) {
        trace!("released {bid}");
        self.state.lock()[bid.disk as usize].free.push(bid.block);
    }

    /// Release a batch of block slots
    pub fn delete_blocks(&self, bids: impl IntoIterator<Item = Bid>) {
        let mut state = self.state.lock();
        for bid in bids {
            state[bid.disk as usize].free.push(bid.block);
        }
    }

    /// Number of slots currently held by callers
    pub fn allocated_blocks(&self) -> u64 {
        let state = self.state.lock();
        state
            .iter()
            .map(|s| s.next - s.free.len() as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemIo;

    fn manager(disks: usize) -> BlockManager {
        BlockManager::striped(Arc::new(MemIo::new(disks, 16)))
    }

    #[test]
    fn test_striping_round_robin() {
        let mgr = manager(3);
        let disks: Vec<u32> = (0..6).map(|s| mgr.new_block(s).disk).collect();
        assert_eq!(disks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_slot_reuse() {
        let mgr = manager(1);
        let a = mgr.new_block(0);
        let b = mgr.new_block(1);
        assert_ne!(a, b);
        assert_eq!(mgr.allocated_blocks(), 2);

        mgr.delete_block(a);
        assert_eq!(mgr.allocated_blocks(), 1);

        // The released slot comes back before the file grows.
        let c = mgr.new_block(2);
        assert_eq!(c, a);
        assert_eq!(mgr.allocated_blocks(), 2);
    }

    #[test]
    fn test_delete_blocks_batch() {
        let mgr = manager(2);
        let bids: Vec<Bid> = (0..8).map(|s| mgr.new_block(s)).collect();
        mgr.delete_blocks(bids);
        assert_eq!(mgr.allocated_blocks(), 0);
    }

    #[test]
    fn test_random_striping_in_range() {
        let mgr = BlockManager::new(Arc::new(MemIo::new(4, 16)), Box::new(RandomStriping));
        for s in 0..64 {
            assert!(mgr.new_block(s).disk < 4);
        }
    }
}

//! External vector
//!
//! A fixed-length array of values stored in blocks on a block device,
//! with a one-page write-back cache for indexed access. The vector's
//! block range (its bids, in order) is the substrate the buffered
//! streams and scan algorithms operate on: they bypass the page cache,
//! so anything that rewrites blocks externally must notify the vector
//! through [`ExtVec::invalidate_pages`].

use crate::block::Block;
use bytemuck::Pod;
use extmem_common::{Bid, Error, Result};
use extmem_io::BlockManager;
use std::mem;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

struct Page<V> {
    index: usize,
    block: Block<V>,
    dirty: bool,
}

/// Fixed-length external-memory array with indexed access
pub struct ExtVec<V: Pod> {
    mgr: Arc<BlockManager>,
    bids: Vec<Bid>,
    len: u64,
    elems: usize,
    page: Option<Page<V>>,
}

impl<V: Pod> ExtVec<V> {
    /// Create a vector of `len` zero-initialised values, allocating its
    /// blocks up front with striped placement
    pub fn new(mgr: Arc<BlockManager>, len: u64) -> Result<Self> {
        let elems = mgr.block_bytes() / mem::size_of::<V>();
        if elems == 0 {
            return Err(Error::configuration(format!(
                "{}-byte blocks cannot hold a {}-byte value",
                mgr.block_bytes(),
                mem::size_of::<V>()
            )));
        }
        let blocks = len.div_ceil(elems as u64) as usize;
        let bids = (0..blocks).map(|i| mgr.new_block(i as u64)).collect();
        debug!("external vector of {len} values in {blocks} block(s)");
        Ok(Self {
            mgr,
            bids,
            len,
            elems,
            page: None,
        })
    }

    /// Number of values
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Check if the vector is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Values per block
    pub fn block_len(&self) -> usize {
        self.elems
    }

    /// The vector's blocks, in logical order
    pub fn bids(&self) -> &[Bid] {
        &self.bids
    }

    /// The block manager this vector allocates on
    pub fn manager(&self) -> &Arc<BlockManager> {
        &self.mgr
    }

    /// Read the value at `index`.
    ///
    /// Panics when `index` is out of bounds. Faults the containing block
    /// into the page cache.
    pub fn get(&mut self, index: u64) -> Result<V> {
        assert!(index < self.len, "index {index} out of bounds");
        let offset = (index % self.elems as u64) as usize;
        let page = self.page_for((index / self.elems as u64) as usize)?;
        Ok(page.block[offset])
    }

    /// Write the value at `index`.
    ///
    /// Panics when `index` is out of bounds. The page is written back on
    /// eviction or [`ExtVec::flush`].
    pub fn set(&mut self, index: u64, value: V) -> Result<()> {
        assert!(index < self.len, "index {index} out of bounds");
        let offset = (index % self.elems as u64) as usize;
        let page = self.page_for((index / self.elems as u64) as usize)?;
        page.block[offset] = value;
        page.dirty = true;
        Ok(())
    }

    /// Write the dirty page back to its block; the page stays resident
    pub fn flush(&mut self) -> Result<()> {
        if let Some(page) = &mut self.page {
            if page.dirty {
                let bid = self.bids[page.index];
                debug!("vector flush: writing page {} to {bid}", page.index);
                let block = mem::replace(&mut page.block, Block::detached());
                let request = self.mgr.io().write(block.into_buf(), bid);
                request.wait()?;
                page.block = Block::from_buf(
                    request
                        .take_buffer()
                        .expect("completed write returns its buffer"),
                );
                page.dirty = false;
            }
        }
        Ok(())
    }

    /// Forget the cached page if it covers one of `blocks`.
    ///
    /// Call after rewriting blocks externally (e.g. through a buffered
    /// output stream); the external contents win over anything cached.
    pub fn invalidate_pages(&mut self, blocks: Range<usize>) {
        if let Some(page) = &self.page {
            if blocks.contains(&page.index) {
                debug!("vector: dropping cached page {}", page.index);
                self.page = None;
            }
        }
    }

    fn page_for(&mut self, block_idx: usize) -> Result<&mut Page<V>> {
        let cached = matches!(&self.page, Some(page) if page.index == block_idx);
        if !cached {
            // Evict the old page, writing it back if modified.
            let block = match self.page.take() {
                Some(page) if page.dirty => {
                    let bid = self.bids[page.index];
                    let request = self.mgr.io().write(page.block.into_buf(), bid);
                    request.wait()?;
                    Block::from_buf(
                        request
                            .take_buffer()
                            .expect("completed write returns its buffer"),
                    )
                }
                Some(page) => page.block,
                None => Block::new(self.mgr.block_bytes()),
            };
            let request = self.mgr.io().read(block.into_buf(), self.bids[block_idx]);
            request.wait()?;
            self.page = Some(Page {
                index: block_idx,
                block: Block::from_buf(
                    request
                        .take_buffer()
                        .expect("completed read returns its buffer"),
                ),
                dirty: false,
            });
        }
        Ok(self.page.as_mut().expect("page just faulted in"))
    }
}

impl<V: Pod> Drop for ExtVec<V> {
    fn drop(&mut self) {
        self.mgr.delete_blocks(self.bids.drain(..));
    }
}

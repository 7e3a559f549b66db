//! In-memory block device
//!
//! Completes every transfer at submit time; the returned requests are
//! already done. Shares the file device's sparse semantics: blocks that
//! were never written read back as zeroes. Intended for unit tests and
//! examples where overlap is irrelevant.

use crate::aligned::AlignedBuf;
use crate::device::BlockIo;
use crate::request::Request;
use extmem_common::Bid;
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-memory block device
pub struct MemIo {
    disks: usize,
    block_bytes: usize,
    blocks: Mutex<HashMap<Bid, Vec<u8>>>,
}

impl MemIo {
    /// Create a device with `disks` logical disks and `block_bytes` blocks
    #[must_use]
    pub fn new(disks: usize, block_bytes: usize) -> Self {
        assert!(disks > 0, "at least one disk is required");
        assert!(block_bytes > 0, "block size must be non-zero");
        Self {
            disks,
            block_bytes,
            blocks: Mutex::new(HashMap::new()),
        }
    }

    /// Number of blocks currently stored
    #[must_use]
    pub fn stored_blocks(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl BlockIo for MemIo {
    fn disks(&self) -> usize {
        self.disks
    }

    fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    fn read(&self, mut buf: AlignedBuf, bid: Bid) -> Request {
        match self.blocks.lock().get(&bid) {
            Some(data) => buf.as_mut_slice().copy_from_slice(data),
            None => buf.as_mut_slice().fill(0),
        }
        Request::completed(buf, Ok(()))
    }

    fn write(&self, buf: AlignedBuf, bid: Bid) -> Request {
        self.blocks.lock().insert(bid, buf.as_slice().to_vec());
        Request::completed(buf, Ok(()))
    }
}

//! Core type definitions for extmem
//!
//! This module defines the block identifier handed out by the block
//! allocator and consumed by the block device.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an on-disk block slot.
///
/// A `Bid` names a fixed-size slot on one disk of a block device. It is
/// opaque to containers: it carries no contents and no logical position.
/// Bids are handed out by the block allocator, belong to exactly one
/// owner, and become invalid once released back to the allocator.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[display("{disk}:{block}")]
pub struct Bid {
    /// Disk the slot lives on
    pub disk: u32,
    /// Slot number within that disk's backing file
    pub block: u64,
}

impl Bid {
    /// Create a new block identifier
    #[must_use]
    pub const fn new(disk: u32, block: u64) -> Self {
        Self { disk, block }
    }

    /// Byte offset of this slot within its disk's backing file
    #[must_use]
    pub const fn offset(&self, block_bytes: usize) -> u64 {
        self.block * block_bytes as u64
    }
}

impl fmt::Debug for Bid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bid({}:{})", self.disk, self.block)
    }
}

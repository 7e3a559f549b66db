//! Block device facade
//!
//! The container layer talks to storage exclusively through [`BlockIo`].
//! Implementations submit the transfer asynchronously and hand back a
//! [`Request`]; all blocking happens at explicit `wait` points in the
//! caller.

use crate::aligned::AlignedBuf;
use crate::request::Request;
use extmem_common::Bid;

/// An asynchronous block device.
///
/// Requests against a single disk are started in submission order;
/// completion order across disks is unspecified. Buffers transfer
/// ownership into the returned [`Request`] and come back out of it on
/// completion.
pub trait BlockIo: Send + Sync {
    /// Number of parallel disks
    fn disks(&self) -> usize;

    /// Raw size of one block in bytes
    fn block_bytes(&self) -> usize;

    /// Submit an asynchronous read of `bid` into `buf`
    fn read(&self, buf: AlignedBuf, bid: Bid) -> Request;

    /// Submit an asynchronous write of `buf` to `bid`
    fn write(&self, buf: AlignedBuf, bid: Bid) -> Request;
}

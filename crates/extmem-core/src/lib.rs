//! extmem core - external-memory containers and pipelines
//!
//! Containers and streams for data sets far larger than main memory:
//! - [`Sequence`]: a deque-like container whose elements live in
//!   fixed-size blocks on a block device, with at most two resident
//!   blocks and write-behind / read-ahead through block pools
//! - [`SeqStream`] / [`RevStream`]: lazy end-to-end iteration over a
//!   sequence with prefetching
//! - [`BufReader`] / [`BufWriter`]: buffered streams over ordered block
//!   ranges, used by the scan algorithms over [`ExtVec`]
//!
//! I/O latency hides behind overlapping asynchronous requests issued by
//! the pools; the only blocking points are pops that rehydrate a middle
//! block, buffered-stream boundary crossings, and flush paths.

pub mod block;
pub mod bufread;
pub mod bufwrite;
pub mod pool;
pub mod scan;
pub mod sequence;
pub mod vector;

pub use block::Block;
pub use bufread::BufReader;
pub use bufwrite::BufWriter;
pub use pool::{PrefetchPool, ReadWritePool, SharedPool, WritePool};
pub use scan::{find, for_each, for_each_m, generate};
pub use sequence::{RevStream, SeqStream, Sequence};
pub use vector::ExtVec;

pub use bytemuck::Pod;

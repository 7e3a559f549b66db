//! File-backed block device
//!
//! One backing file per disk, each drained by a dedicated worker thread so
//! transfers overlap with the application. Optionally opens the files with
//! O_DIRECT (Linux) to bypass the OS page cache; in that mode the block
//! size must be a multiple of the I/O alignment.
//!
//! Blocks that were never written read back as zeroes (sparse-file
//! semantics).

use crate::aligned::AlignedBuf;
use crate::device::BlockIo;
use crate::request::Request;
use extmem_common::{Bid, Error, Result, StorageConfig};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::debug;

#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

enum JobKind {
    Read,
    Write,
}

struct Job {
    kind: JobKind,
    offset: u64,
    request: Request,
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

struct DiskQueue {
    state: Mutex<QueueState>,
    work_cv: Condvar,
}

struct Disk {
    queue: Arc<DiskQueue>,
    worker: Option<thread::JoinHandle<()>>,
}

/// File-backed block device with one worker thread per disk
pub struct FileIo {
    disks: Vec<Disk>,
    block_bytes: usize,
}

impl FileIo {
    /// Create the backing files under `config.data_dir` and start one
    /// worker per disk. Existing files are truncated.
    pub fn create(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let mut disks = Vec::with_capacity(config.disks);
        for i in 0..config.disks {
            let path = config.data_dir.join(format!("disk{i:02}.dat"));
            let file = Self::open_file(&path, config.direct_io)?;
            let queue = Arc::new(DiskQueue {
                state: Mutex::new(QueueState::default()),
                work_cv: Condvar::new(),
            });
            let worker = {
                let queue = Arc::clone(&queue);
                thread::Builder::new()
                    .name(format!("extmem-disk{i}"))
                    .spawn(move || worker_loop(&file, &queue))
                    .map_err(Error::from)?
            };
            disks.push(Disk {
                queue,
                worker: Some(worker),
            });
        }

        debug!(
            "file device ready: {} disk(s), {} byte blocks, direct_io={}",
            config.disks, config.block_bytes, config.direct_io
        );
        Ok(Self {
            disks,
            block_bytes: config.block_bytes,
        })
    }

    fn open_file(path: &Path, direct_io: bool) -> Result<File> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(true);

        #[cfg(target_os = "linux")]
        if direct_io {
            options.custom_flags(libc::O_DIRECT);
        }
        #[cfg(not(target_os = "linux"))]
        let _ = direct_io;

        options.open(path).map_err(|e| {
            Error::storage(format!("failed to open {}: {e}", path.display()))
        })
    }

    fn submit(&self, kind: JobKind, buf: AlignedBuf, bid: Bid) -> Request {
        let Some(disk) = self.disks.get(bid.disk as usize) else {
            return Request::completed(
                buf,
                Err(Error::storage(format!(
                    "{bid} names disk {} of a {}-disk device",
                    bid.disk,
                    self.disks.len()
                ))),
            );
        };
        debug_assert_eq!(buf.len(), self.block_bytes);

        let request = Request::new(buf);
        let job = Job {
            kind,
            offset: bid.offset(self.block_bytes),
            request: request.clone(),
        };
        let mut state = disk.queue.state.lock();
        state.jobs.push_back(job);
        disk.queue.work_cv.notify_one();
        request
    }
}

impl BlockIo for FileIo {
    fn disks(&self) -> usize {
        self.disks.len()
    }

    fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    fn read(&self, buf: AlignedBuf, bid: Bid) -> Request {
        self.submit(JobKind::Read, buf, bid)
    }

    fn write(&self, buf: AlignedBuf, bid: Bid) -> Request {
        self.submit(JobKind::Write, buf, bid)
    }
}

impl Drop for FileIo {
    fn drop(&mut self) {
        // Queued work finishes before the workers exit.
        for disk in &self.disks {
            disk.queue.state.lock().shutdown = true;
            disk.queue.work_cv.notify_all();
        }
        for disk in &mut self.disks {
            if let Some(worker) = disk.worker.take() {
                let _ = worker.join();
            }
        }
    }
}

fn worker_loop(file: &File, queue: &DiskQueue) {
    loop {
        let job = {
            let mut state = queue.state.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                if state.shutdown {
                    return;
                }
                queue.work_cv.wait(&mut state);
            }
        };

        // `start` returns None for requests cancelled before we got here.
        let Some(mut buf) = job.request.start() else {
            continue;
        };
        let result = match job.kind {
            JobKind::Read => read_full(file, job.offset, buf.as_mut_slice()),
            JobKind::Write => file.write_all_at(buf.as_slice(), job.offset).map_err(Error::from),
        };
        job.request.finish(buf, result);
    }
}

/// Read `buf.len()` bytes at `offset`, zero-filling past end of file.
fn read_full(file: &File, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => {
                buf[filled..].fill(0);
                return Ok(());
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(dir: &Path, disks: usize, block_bytes: usize) -> StorageConfig {
        StorageConfig {
            data_dir: dir.to_path_buf(),
            disks,
            block_bytes,
            direct_io: false,
        }
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let io = FileIo::create(&config(dir.path(), 2, 64)).unwrap();

        let mut buf = AlignedBuf::new(64);
        buf.as_mut_slice().fill(0x5A);
        let bid = Bid::new(1, 3);

        let req = io.write(buf, bid);
        req.wait().unwrap();
        let buf = req.take_buffer().unwrap();

        let req = io.read(buf, bid);
        req.wait().unwrap();
        let buf = req.take_buffer().unwrap();
        assert!(buf.as_slice().iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_unwritten_blocks_read_zero() {
        let dir = tempdir().unwrap();
        let io = FileIo::create(&config(dir.path(), 1, 32)).unwrap();

        let mut buf = AlignedBuf::new(32);
        buf.as_mut_slice().fill(0xFF);
        let req = io.read(buf, Bid::new(0, 9));
        req.wait().unwrap();
        let buf = req.take_buffer().unwrap();
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bad_disk_index_fails() {
        let dir = tempdir().unwrap();
        let io = FileIo::create(&config(dir.path(), 1, 32)).unwrap();

        let req = io.read(AlignedBuf::new(32), Bid::new(7, 0));
        assert!(req.wait().is_err());
    }

    #[test]
    fn test_many_outstanding_requests() {
        let dir = tempdir().unwrap();
        let io = FileIo::create(&config(dir.path(), 2, 16)).unwrap();

        let writes: Vec<Request> = (0..32u64)
            .map(|i| {
                let mut buf = AlignedBuf::new(16);
                buf.as_mut_slice().fill(i as u8);
                io.write(buf, Bid::new((i % 2) as u32, i / 2))
            })
            .collect();
        for req in &writes {
            req.wait().unwrap();
        }

        for i in 0..32u64 {
            let req = io.read(AlignedBuf::new(16), Bid::new((i % 2) as u32, i / 2));
            req.wait().unwrap();
            let buf = req.take_buffer().unwrap();
            assert!(buf.as_slice().iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn test_drop_completes_queued_writes() {
        let dir = tempdir().unwrap();
        {
            let io = FileIo::create(&config(dir.path(), 1, 16)).unwrap();
            let mut buf = AlignedBuf::new(16);
            buf.as_mut_slice().fill(0x77);
            io.write(buf, Bid::new(0, 2));
            // Dropped without waiting.
        }
        let raw = std::fs::read(dir.path().join("disk00.dat")).unwrap();
        assert_eq!(raw.len(), 48);
        assert!(raw[32..].iter().all(|&b| b == 0x77));
    }
}

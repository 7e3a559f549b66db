//! Request handles for in-flight block I/O
//!
//! A [`Request`] is the completion handle returned by every read or write
//! submitted to a block device. The buffer being transferred rides inside
//! the request while the operation is in flight: the device worker takes
//! it out with [`Request::start`], performs the transfer, and puts it back
//! with [`Request::finish`]. The submitter observes progress through
//! [`Request::poll`] / [`Request::wait`] and reclaims the buffer with
//! [`Request::take_buffer`] once the request has completed.

use crate::aligned::AlignedBuf;
use extmem_common::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Completion handle for one submitted read or write.
///
/// Cheap to clone; all clones observe the same completion.
#[derive(Clone)]
pub struct Request {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    done_cv: Condvar,
}

struct State {
    done: bool,
    cancelled: bool,
    /// Error of the completed transfer; taken (once) by `wait`.
    error: Option<Error>,
    /// The transferred buffer, present before start and after completion.
    buf: Option<AlignedBuf>,
}

impl Request {
    /// Create a pending request holding the buffer to transfer.
    ///
    /// Device-side API: called by `BlockIo` implementations at submit time.
    #[must_use]
    pub fn new(buf: AlignedBuf) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    done: false,
                    cancelled: false,
                    error: None,
                    buf: Some(buf),
                }),
                done_cv: Condvar::new(),
            }),
        }
    }

    /// Create a request that is already complete.
    ///
    /// Device-side API: for devices that finish the transfer at submit
    /// time (e.g. the in-memory device).
    #[must_use]
    pub fn completed(buf: AlignedBuf, result: Result<()>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    done: true,
                    cancelled: false,
                    error: result.err(),
                    buf: Some(buf),
                }),
                done_cv: Condvar::new(),
            }),
        }
    }

    /// Take the buffer to begin the transfer.
    ///
    /// Device-side API. Returns `None` if the request was cancelled before
    /// the worker got to it; in that case the request is marked complete
    /// with [`Error::Cancelled`] and the buffer stays inside it, unread.
    pub fn start(&self) -> Option<AlignedBuf> {
        let mut state = self.inner.state.lock();
        if state.cancelled {
            state.done = true;
            state.error = Some(Error::Cancelled);
            self.inner.done_cv.notify_all();
            return None;
        }
        state.buf.take()
    }

    /// Return the buffer and record the outcome of the transfer.
    ///
    /// Device-side API.
    pub fn finish(&self, buf: AlignedBuf, result: Result<()>) {
        let mut state = self.inner.state.lock();
        debug_assert!(state.buf.is_none(), "finish without matching start");
        state.buf = Some(buf);
        state.error = result.err();
        state.done = true;
        self.inner.done_cv.notify_all();
    }

    /// Block until the request completes; surface the transfer error.
    ///
    /// The error is reported once; later calls return `Ok`.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        while !state.done {
            self.inner.done_cv.wait(&mut state);
        }
        match state.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Non-blocking completion check
    #[must_use]
    pub fn poll(&self) -> bool {
        self.inner.state.lock().done
    }

    /// Best-effort cancellation.
    ///
    /// A request the worker has not yet started is skipped; one already in
    /// flight completes normally.
    pub fn cancel(&self) {
        self.inner.state.lock().cancelled = true;
    }

    /// Reclaim the buffer of a completed request.
    ///
    /// Returns `None` while the request is in flight, or if the buffer was
    /// already taken.
    pub fn take_buffer(&self) -> Option<AlignedBuf> {
        let mut state = self.inner.state.lock();
        if !state.done {
            return None;
        }
        state.buf.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_request() {
        let req = Request::completed(AlignedBuf::new(16), Ok(()));
        assert!(req.poll());
        assert!(req.wait().is_ok());
        assert!(req.take_buffer().is_some());
        assert!(req.take_buffer().is_none());
    }

    #[test]
    fn test_start_finish_cycle() {
        let req = Request::new(AlignedBuf::new(16));
        assert!(!req.poll());
        assert!(req.take_buffer().is_none());

        let mut buf = req.start().expect("not cancelled");
        buf.as_mut_slice()[0] = 0xAB;
        req.finish(buf, Ok(()));

        assert!(req.poll());
        assert!(req.wait().is_ok());
        assert_eq!(req.take_buffer().unwrap().as_slice()[0], 0xAB);
    }

    #[test]
    fn test_error_surfaced_once() {
        let req = Request::new(AlignedBuf::new(16));
        let buf = req.start().unwrap();
        req.finish(buf, Err(Error::storage("bad sector")));

        assert!(req.wait().is_err());
        assert!(req.wait().is_ok());
    }

    #[test]
    fn test_cancel_before_start() {
        let req = Request::new(AlignedBuf::new(16));
        req.cancel();
        assert!(req.start().is_none());
        assert!(req.poll());
        assert!(matches!(req.wait(), Err(Error::Cancelled)));
        // The untouched buffer is still reclaimable.
        assert!(req.take_buffer().is_some());
    }

    #[test]
    fn test_wait_across_threads() {
        let req = Request::new(AlignedBuf::new(16));
        let worker = {
            let req = req.clone();
            std::thread::spawn(move || {
                let buf = req.start().unwrap();
                req.finish(buf, Ok(()));
            })
        };
        assert!(req.wait().is_ok());
        worker.join().unwrap();
    }
}

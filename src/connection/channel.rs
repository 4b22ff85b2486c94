// src/connection/channel.rs

//! The I/O capability a `Connection` writes through.

use crate::core::RemotingError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A full-duplex byte channel owned by exactly one `Connection`.
///
/// Reads are driven separately by the connection's read loop; a channel only
/// exposes the write side and its lifecycle.
pub trait Channel: Send + Sync + Debug {
    fn is_active(&self) -> bool;

    /// False while the channel is refusing writes because of back-pressure.
    fn is_writable(&self) -> bool {
        self.is_active()
    }

    fn remote_addr(&self) -> Option<SocketAddr>;

    fn local_addr(&self) -> Option<SocketAddr>;

    /// Queues one encoded frame for writing.
    fn write(&self, frame: Bytes) -> Result<(), RemotingError>;

    /// Closes the channel. Calling it again is a no-op.
    fn close(&self) -> Result<(), RemotingError>;
}

/// An in-memory channel that records every frame written to it.
#[derive(Debug)]
pub struct MemoryChannel {
    remote: Option<SocketAddr>,
    local: Option<SocketAddr>,
    active: AtomicBool,
    fail_writes: AtomicBool,
    closes: AtomicUsize,
    written: Mutex<Vec<Bytes>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::with_addrs(None, None)
    }

    pub fn with_addrs(remote: Option<SocketAddr>, local: Option<SocketAddr>) -> Self {
        Self {
            remote,
            local,
            active: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
            written: Mutex::new(Vec::new()),
        }
    }

    /// Makes every following write fail while the channel stays active.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    pub fn written(&self) -> Vec<Bytes> {
        self.written.lock().clone()
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for MemoryChannel {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn write(&self, frame: Bytes) -> Result<(), RemotingError> {
        if !self.is_active() {
            return Err(RemotingError::ConnectionClosed {
                remote: format!("{:?}", self.remote),
            });
        }
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
        }
        self.written.lock().push(frame);
        Ok(())
    }

    fn close(&self) -> Result<(), RemotingError> {
        self.closes.fetch_add(1, Ordering::AcqRel);
        self.active.store(false, Ordering::Release);
        Ok(())
    }
}

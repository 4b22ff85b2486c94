// src/connection/tcp_channel.rs

//! A `Channel` over the write half of a tokio TCP stream.

use super::Channel;
use crate::config::TransportConfig;
use crate::core::RemotingError;
use bytes::Bytes;
use futures::SinkExt;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{BytesCodec, FramedWrite};
use tracing::{debug, warn};

/// Frames are queued on an unbounded channel and written by a dedicated task.
///
/// The queued byte count is checked against the configured watermarks: above
/// the high watermark writes are refused with `WriteBufferFull` until the
/// writer has drained the queue down to the low watermark.
#[derive(Debug)]
pub struct TcpChannel {
    remote: SocketAddr,
    local: SocketAddr,
    active: Arc<AtomicBool>,
    writable: AtomicBool,
    queued: Arc<AtomicUsize>,
    high_watermark: usize,
    low_watermark: usize,
    frames: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    kill_tx: broadcast::Sender<()>,
}

impl TcpChannel {
    /// Wraps `writer` and spawns its writer task.
    pub fn spawn(
        writer: OwnedWriteHalf,
        remote: SocketAddr,
        local: SocketAddr,
        config: &TransportConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (kill_tx, _) = broadcast::channel(1);
        let channel = Arc::new(Self {
            remote,
            local,
            active: Arc::new(AtomicBool::new(true)),
            writable: AtomicBool::new(true),
            queued: Arc::new(AtomicUsize::new(0)),
            high_watermark: config.write_buffer_high_watermark,
            low_watermark: config.write_buffer_low_watermark,
            frames: Mutex::new(Some(tx)),
            kill_tx: kill_tx.clone(),
        });

        tokio::spawn(write_loop(
            writer,
            rx,
            remote,
            channel.active.clone(),
            channel.queued.clone(),
            kill_tx,
        ));
        channel
    }

    /// A receiver that fires when the channel is closed, from either side.
    pub fn subscribe_kill(&self) -> broadcast::Receiver<()> {
        self.kill_tx.subscribe()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }
}

async fn write_loop(
    writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    remote: SocketAddr,
    active: Arc<AtomicBool>,
    queued: Arc<AtomicUsize>,
    kill_tx: broadcast::Sender<()>,
) {
    let mut sink = FramedWrite::new(writer, BytesCodec::new());
    while let Some(frame) = rx.recv().await {
        let len = frame.len();
        let result = sink.send(frame).await;
        queued.fetch_sub(len, Ordering::AcqRel);
        if let Err(e) = result {
            warn!("Write to {} failed: {}", remote, e);
            active.store(false, Ordering::Release);
            let _ = kill_tx.send(());
            return;
        }
    }
    // The sender was dropped by `close`, after every queued frame was written.
    if let Err(e) = sink.into_inner().shutdown().await {
        debug!("Shutdown of the write half to {} failed: {}", remote, e);
    }
}

impl Channel for TcpChannel {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn is_writable(&self) -> bool {
        self.is_active()
            && (self.writable.load(Ordering::Acquire)
                || self.queued.load(Ordering::Acquire) <= self.low_watermark)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local)
    }

    fn write(&self, frame: Bytes) -> Result<(), RemotingError> {
        if !self.is_active() {
            return Err(RemotingError::ConnectionClosed {
                remote: self.remote.to_string(),
            });
        }

        let queued = self.queued.load(Ordering::Acquire);
        if !self.writable.load(Ordering::Acquire) {
            if queued > self.low_watermark {
                return Err(RemotingError::WriteBufferFull);
            }
            self.writable.store(true, Ordering::Release);
        }
        // A single oversized frame is still accepted on an empty queue.
        if queued > 0 && queued + frame.len() > self.high_watermark {
            self.writable.store(false, Ordering::Release);
            return Err(RemotingError::WriteBufferFull);
        }

        let guard = self.frames.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(RemotingError::ConnectionClosed {
                remote: self.remote.to_string(),
            });
        };
        let len = frame.len();
        self.queued.fetch_add(len, Ordering::AcqRel);
        if tx.send(frame).is_err() {
            self.queued.fetch_sub(len, Ordering::AcqRel);
            return Err(RemotingError::ConnectionClosed {
                remote: self.remote.to_string(),
            });
        }
        Ok(())
    }

    fn close(&self) -> Result<(), RemotingError> {
        if self.active.swap(false, Ordering::AcqRel) {
            self.frames.lock().take();
        }
        // The writer may have failed and deactivated the channel first; the read
        // loop still needs to hear about it.
        let _ = self.kill_tx.send(());
        Ok(())
    }
}

//! Continuous-transport fan-out.
//!
//! The upstream stdout is read exactly once by a pump task and every chunk is
//! re-published through a `tokio::sync::broadcast` channel. Viewers subscribe
//! independently; a slow viewer lags and skips chunks without affecting the
//! pump or other viewers.

use crate::observability::metrics;
use bytes::{Bytes, BytesMut};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default number of chunks buffered per receiver before it lags.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Read size for the upstream pump (a multiple of the 188-byte TS packet).
const CHUNK_SIZE: usize = 188 * 64;

/// One slice of upstream output.
///
/// Cheap to clone; `data` is reference counted.
#[derive(Debug, Clone)]
pub struct MediaChunk {
    /// Session generation of the process that produced the chunk.
    pub generation: u64,
    pub data: Bytes,
}

/// Shared fan-out point for the single upstream.
#[derive(Clone)]
pub struct FanoutRelay {
    sender: broadcast::Sender<MediaChunk>,
    pump: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Default for FanoutRelay {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl FanoutRelay {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            pump: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribe a viewer to the shared stream.
    pub fn subscribe(&self) -> broadcast::Receiver<MediaChunk> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Start pumping `reader` into the channel, replacing any previous pump.
    pub fn attach<R>(&self, generation: u64, reader: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let sender = self.sender.clone();
        let task = tokio::spawn(pump(generation, reader, sender));

        let previous = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }

        info!(target: "relay.fanout", generation, "Upstream output attached");
    }

    /// Stop the current pump, if any.
    pub fn detach(&self) {
        let previous = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            previous.abort();
            debug!(target: "relay.fanout", "Upstream output detached");
        }
    }
}

async fn pump<R>(generation: u64, mut reader: R, sender: broadcast::Sender<MediaChunk>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
    let mut total: u64 = 0;

    loop {
        buf.reserve(CHUNK_SIZE);
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                metrics::record_chunk_published(n);
                // Err only means nobody is listening right now
                let _ = sender.send(MediaChunk {
                    generation,
                    data: buf.split().freeze(),
                });
            }
            Err(e) => {
                warn!(target: "relay.fanout", generation, error = %e, "Upstream read failed");
                break;
            }
        }
    }

    debug!(target: "relay.fanout", generation, bytes = total, "Upstream output ended");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn test_every_subscriber_gets_the_same_bytes() {
        let relay = FanoutRelay::new(16);
        let mut a = relay.subscribe();
        let mut b = relay.subscribe();

        let (mut writer, reader) = tokio::io::duplex(1024);
        relay.attach(3, reader);

        writer.write_all(b"hello").await.unwrap();
        drop(writer);

        let chunk_a = a.recv().await.unwrap();
        let chunk_b = b.recv().await.unwrap();
        assert_eq!(chunk_a.generation, 3);
        assert_eq!(&chunk_a.data[..], b"hello");
        assert_eq!(chunk_a.data, chunk_b.data);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_without_blocking_others() {
        let relay = FanoutRelay::new(2);
        let mut slow = relay.subscribe();
        let mut fast = relay.subscribe();

        let (mut writer, reader) = tokio::io::duplex(16);
        relay.attach(1, reader);

        for i in 0..5u8 {
            writer.write_all(&[i]).await.unwrap();
            let chunk = fast.recv().await.unwrap();
            assert_eq!(&chunk.data[..], &[i]);
        }

        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(_))));
        // Resumes with the retained tail
        assert!(slow.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_attach_replaces_previous_pump() {
        let relay = FanoutRelay::new(16);
        let mut rx = relay.subscribe();

        let (mut old_writer, old_reader) = tokio::io::duplex(64);
        relay.attach(1, old_reader);
        let (mut new_writer, new_reader) = tokio::io::duplex(64);
        relay.attach(2, new_reader);

        // The first pump was aborted; its writes go nowhere
        let _ = old_writer.write_all(b"old").await;
        new_writer.write_all(b"new").await.unwrap();

        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.generation, 2);
        assert_eq!(&chunk.data[..], b"new");
    }

    #[tokio::test]
    async fn test_subscriber_drop_only_removes_that_receiver() {
        let relay = FanoutRelay::default();
        let a = relay.subscribe();
        let _b = relay.subscribe();
        assert_eq!(relay.subscriber_count(), 2);

        drop(a);
        assert_eq!(relay.subscriber_count(), 1);
        relay.detach();
    }
}

//! Background PTY reader and the ordered mailbox it fills.
//!
//! PTY reads block, so each session gets its own OS thread that owns the
//! reader outright. The thread pushes chunks into an unbounded channel and
//! drops its sender when the stream ends; the closed channel is the
//! end-of-stream marker for the consumer.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;

/// Receiving side of a session's output stream.
pub struct Mailbox {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: bool,
}

impl Mailbox {
    /// Create a mailbox and the sender that feeds it.
    pub fn channel() -> (mpsc::UnboundedSender<Vec<u8>>, Mailbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Mailbox { rx, closed: false })
    }

    /// Start a reader thread named `name` that drains `reader` into a new
    /// mailbox, `chunk_size` bytes per read, until EOF, an error, or `stop`.
    pub fn spawn_reader(
        name: String,
        reader: Box<dyn Read + Send>,
        chunk_size: usize,
        stop: Arc<AtomicBool>,
    ) -> std::io::Result<Mailbox> {
        let (tx, mailbox) = Self::channel();
        std::thread::Builder::new()
            .name(name)
            .spawn(move || read_loop(reader, chunk_size.max(1), tx, stop))?;
        Ok(mailbox)
    }

    /// `true` once the producer is gone and every chunk has been consumed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wait up to `timeout` for the first chunk, then take whatever else is
    /// already queued without waiting further.
    ///
    /// Returns an empty buffer on timeout, and immediately at end of stream.
    pub async fn collect(&mut self, timeout: Duration) -> Vec<u8> {
        if self.closed {
            return Vec::new();
        }

        let mut bytes = match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                self.closed = true;
                return Vec::new();
            }
            Err(_) => return Vec::new(),
        };

        loop {
            match self.rx.try_recv() {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
        bytes
    }

    /// Collect until end of stream or until `limit` has elapsed.
    pub async fn collect_remaining(&mut self, limit: Duration) -> Vec<u8> {
        let deadline = Instant::now() + limit;
        let mut bytes = Vec::new();
        while !self.closed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            bytes.extend(self.collect(remaining).await);
        }
        bytes
    }
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    chunk_size: usize,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; chunk_size];

    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }

        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // EIO once the slave side is gone.
            Err(e) => {
                log::debug!("PTY read ended: {e}");
                break;
            }
        };

        if tx.send(buf[..n].to_vec()).is_err() {
            break;
        }
    }

    log::debug!("PTY reader thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Yields its chunks one read at a time.
    struct Chunked(Vec<Vec<u8>>);

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            let chunk = self.0.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order() {
        let (tx, mut mailbox) = Mailbox::channel();
        tx.send(b"one ".to_vec()).unwrap();
        tx.send(b"two ".to_vec()).unwrap();
        tx.send(b"three".to_vec()).unwrap();

        assert_eq!(mailbox.collect(Duration::from_millis(10)).await, b"one two three");
        assert!(!mailbox.is_closed());
    }

    #[tokio::test]
    async fn test_timeout_returns_empty() {
        let (_tx, mut mailbox) = Mailbox::channel();
        let started = Instant::now();
        assert!(mailbox.collect(Duration::from_millis(50)).await.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(!mailbox.is_closed());
    }

    #[tokio::test]
    async fn test_end_of_stream_is_sticky() {
        let (tx, mut mailbox) = Mailbox::channel();
        tx.send(b"last".to_vec()).unwrap();
        drop(tx);

        assert_eq!(mailbox.collect(Duration::from_secs(1)).await, b"last");
        assert!(mailbox.is_closed());

        let started = Instant::now();
        assert!(mailbox.collect(Duration::from_secs(5)).await.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_reader_thread_drains_to_eof() {
        let reader = Chunked(vec![b"ab".to_vec(), b"cd".to_vec(), b"ef".to_vec()]);
        let stop = Arc::new(AtomicBool::new(false));
        let mut mailbox =
            Mailbox::spawn_reader("test-reader".into(), Box::new(reader), 16, stop).unwrap();

        let bytes = mailbox.collect_remaining(Duration::from_secs(3)).await;
        assert_eq!(bytes, b"abcdef");
        assert!(mailbox.is_closed());
    }

    #[tokio::test]
    async fn test_reader_respects_chunk_size() {
        let reader = Cursor::new(b"0123456789".to_vec());
        let stop = Arc::new(AtomicBool::new(false));
        let mut mailbox =
            Mailbox::spawn_reader("test-reader".into(), Box::new(reader), 3, stop).unwrap();

        let bytes = mailbox.collect_remaining(Duration::from_secs(3)).await;
        assert_eq!(bytes, b"0123456789");
    }

    #[tokio::test]
    async fn test_stop_flag_ends_reader() {
        let reader = Cursor::new(vec![b'x'; 1024]);
        let stop = Arc::new(AtomicBool::new(true));
        let mut mailbox =
            Mailbox::spawn_reader("test-reader".into(), Box::new(reader), 8, stop).unwrap();

        assert!(mailbox.collect_remaining(Duration::from_secs(3)).await.is_empty());
        assert!(mailbox.is_closed());
    }
}

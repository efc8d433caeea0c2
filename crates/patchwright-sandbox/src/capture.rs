//! Bounded capture of child output streams.

use std::io::{ErrorKind, Read};
use std::mem;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

const READ_CHUNK: usize = 8 * 1024;

/// Bytes read from one stream, capped at a fixed limit.
#[derive(Debug, Default)]
pub(crate) struct CapturedStream {
    pub(crate) bytes: Vec<u8>,
    pub(crate) truncated: bool,
}

impl CapturedStream {
    fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(limit.min(READ_CHUNK)),
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8], limit: usize) {
        let room = limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        let keep = chunk.len().min(room);
        self.bytes.extend_from_slice(chunk.get(..keep).unwrap_or_default());
    }

    pub(crate) fn into_text(self) -> (String, bool) {
        let text = match String::from_utf8(self.bytes) {
            Ok(text) => text,
            Err(error) => String::from_utf8_lossy(error.as_bytes()).into_owned(),
        };
        (text, self.truncated)
    }
}

/// A stream being drained on its own thread.
#[derive(Debug)]
pub(crate) struct StreamReader {
    captured: Arc<Mutex<CapturedStream>>,
    // Disconnects when the reader thread exits.
    finished: mpsc::Receiver<()>,
}

impl StreamReader {
    /// Waits until EOF or `deadline`, whichever comes first.
    ///
    /// A reader still running at the deadline is abandoned: the bytes read
    /// so far are returned and marked as truncated. This happens when a
    /// process outside the killed group still holds the pipe open.
    pub(crate) fn finish(self, deadline: Instant) -> CapturedStream {
        let wait = deadline.saturating_duration_since(Instant::now());
        let abandoned = matches!(
            self.finished.recv_timeout(wait),
            Err(RecvTimeoutError::Timeout)
        );
        let mut captured = mem::take(
            &mut *self
                .captured
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        captured.truncated |= abandoned;
        captured
    }
}

/// Reads `stream` to EOF on a dedicated thread, keeping at most `limit` bytes.
///
/// Bytes past the limit are still read so the child never blocks on a full
/// pipe.
pub(crate) fn spawn_reader<R>(mut stream: R, limit: usize) -> StreamReader
where
    R: Read + Send + 'static,
{
    let captured = Arc::new(Mutex::new(CapturedStream::with_limit(limit)));
    let (done_tx, finished) = mpsc::channel::<()>();
    let sink = Arc::clone(&captured);
    thread::spawn(move || {
        let _done = done_tx;
        let mut buffer = [0_u8; READ_CHUNK];
        loop {
            match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(buffer.get(..read).unwrap_or_default(), limit),
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
    });
    StreamReader { captured, finished }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};
    use std::time::Duration;

    use super::*;

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    /// Yields one chunk, then blocks until the test ends.
    struct Stalled {
        sent: bool,
        release: mpsc::Receiver<()>,
    }

    impl Read for Stalled {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                // Returns once the sender is dropped at the end of the test.
                self.release
                    .recv()
                    .expect_err("nothing is ever sent on the release channel");
                return Ok(0);
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"part");
            Ok(4)
        }
    }

    #[test]
    fn keeps_everything_under_the_limit() {
        let captured = spawn_reader(Cursor::new(b"hello".to_vec()), 16).finish(soon());
        let (text, truncated) = captured.into_text();
        assert_eq!(text, "hello");
        assert!(!truncated);
    }

    #[test]
    fn truncates_past_the_limit() {
        let input = vec![b'x'; READ_CHUNK * 3];
        let captured = spawn_reader(Cursor::new(input), 10).finish(soon());
        let (text, truncated) = captured.into_text();
        assert_eq!(text.len(), 10);
        assert!(truncated);
    }

    #[test]
    fn exact_limit_is_not_truncation() {
        let captured = spawn_reader(Cursor::new(b"abcd".to_vec()), 4).finish(soon());
        assert!(!captured.truncated);
        assert_eq!(captured.bytes, b"abcd");
    }

    #[test]
    fn a_stream_left_open_is_abandoned_at_the_deadline() {
        let (release_tx, release) = mpsc::channel();
        let reader = spawn_reader(
            Stalled {
                sent: false,
                release,
            },
            16,
        );
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let captured = reader.finish(Instant::now() + Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(captured.bytes, b"part");
        assert!(captured.truncated);
        drop(release_tx);
    }
}

//! Bounded byte history with live fan-out
//!
//! A thread-safe, fixed-capacity ring that keeps the last N bytes written to
//! it and optionally mirrors every write to a single attached sink. The child
//! runner pumps merged PTY output into one of these; the attach console pulls
//! the snapshot and becomes the live sink while the operator is attached. A
//! small instance also backs the stdin sigil detector.

use std::io::Write;

use parking_lot::Mutex;

/// Fixed-capacity byte history with at most one attached live sink
pub struct RingBuffer {
    inner: Mutex<Inner>,
}

struct Inner {
    buf: Vec<u8>,
    /// Next write position in `buf`
    pos: usize,
    /// True once the buffer has been filled end-to-end at least once
    wrapped: bool,
    /// Live fan-out target; writes to it are best-effort
    sink: Option<Box<dyn Write + Send>>,
}

impl RingBuffer {
    /// Create a ring holding the last `capacity` bytes written
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self {
            inner: Mutex::new(Inner {
                buf: vec![0; capacity],
                pos: 0,
                wrapped: false,
                sink: None,
            }),
        }
    }

    /// Append `p` to the history, evicting the oldest bytes beyond capacity
    ///
    /// If a sink is attached the full `p` is forwarded to it first; sink
    /// errors are swallowed. Returns `p.len()` regardless of how much of it
    /// the history retained.
    pub fn write(&self, p: &[u8]) -> usize {
        let mut inner = self.inner.lock();

        if let Some(sink) = inner.sink.as_mut() {
            let _ = sink.write_all(p);
            let _ = sink.flush();
        }

        let cap = inner.buf.len();
        // Only the last `cap` bytes of an oversized write can survive.
        let tail = if p.len() > cap {
            inner.wrapped = true;
            &p[p.len() - cap..]
        } else {
            p
        };

        let space_to_end = cap - inner.pos;
        if tail.len() > space_to_end {
            let pos = inner.pos;
            inner.buf[pos..].copy_from_slice(&tail[..space_to_end]);
            let rest = tail.len() - space_to_end;
            inner.buf[..rest].copy_from_slice(&tail[space_to_end..]);
            inner.pos = rest;
            inner.wrapped = true;
        } else {
            let pos = inner.pos;
            inner.buf[pos..pos + tail.len()].copy_from_slice(tail);
            inner.pos += tail.len();
            if inner.pos == cap {
                inner.pos = 0;
                inner.wrapped = true;
            }
        }

        p.len()
    }

    /// Current occupancy: `min(total_written, capacity)`
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        if inner.wrapped {
            inner.buf.len()
        } else {
            inner.pos
        }
    }

    /// True if nothing has been written since creation or the last reset
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The logical contents in write order
    pub fn snapshot(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        inner.snapshot()
    }

    /// Atomically dump the current history to `sink` and install it as the
    /// live fan-out target
    ///
    /// Any previously attached sink is replaced. The dump itself is
    /// best-effort, like all sink writes.
    pub fn dump_and_attach(&self, mut sink: Box<dyn Write + Send>) {
        let mut inner = self.inner.lock();
        let snap = inner.snapshot();
        let _ = sink.write_all(&snap);
        let _ = sink.flush();
        inner.sink = Some(sink);
    }

    /// Remove the live sink; subsequent writes affect only the history
    pub fn detach(&self) {
        let mut inner = self.inner.lock();
        inner.sink = None;
    }

    /// Clear the history
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.pos = 0;
        inner.wrapped = false;
    }
}

impl Inner {
    fn snapshot(&self) -> Vec<u8> {
        if self.wrapped {
            let mut out = Vec::with_capacity(self.buf.len());
            out.extend_from_slice(&self.buf[self.pos..]);
            out.extend_from_slice(&self.buf[..self.pos]);
            out
        } else {
            self.buf[..self.pos].to_vec()
        }
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &inner.buf.len())
            .field("pos", &inner.pos)
            .field("wrapped", &inner.wrapped)
            .field("attached", &inner.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    /// Write target capturing everything it receives
    #[derive(Clone, Default)]
    struct CaptureSink(Arc<Mutex<Vec<u8>>>);

    impl CaptureSink {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().clone()
        }
    }

    impl Write for CaptureSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Write target that always fails
    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
    }

    /// The last min(total, N) bytes of everything written, in order
    fn expected(writes: &[&[u8]], cap: usize) -> Vec<u8> {
        let mut all = Vec::new();
        for w in writes {
            all.extend_from_slice(w);
        }
        let skip = all.len().saturating_sub(cap);
        all[skip..].to_vec()
    }

    #[test]
    fn test_empty() {
        let rb = RingBuffer::new(8);
        assert_eq!(rb.len(), 0);
        assert!(rb.is_empty());
        assert!(rb.snapshot().is_empty());
    }

    #[test]
    fn test_write_empty_slice() {
        let rb = RingBuffer::new(8);
        assert_eq!(rb.write(b""), 0);
        assert_eq!(rb.len(), 0);
        assert!(rb.snapshot().is_empty());
    }

    #[test]
    fn test_write_under_capacity() {
        let rb = RingBuffer::new(8);
        assert_eq!(rb.write(b"abc"), 3);
        assert_eq!(rb.len(), 3);
        assert_eq!(rb.snapshot(), b"abc");
    }

    #[test]
    fn test_write_capacity_minus_one() {
        let rb = RingBuffer::new(8);
        rb.write(b"abcdefg");
        assert_eq!(rb.len(), 7);
        assert_eq!(rb.snapshot(), b"abcdefg");
    }

    #[test]
    fn test_write_exact_capacity() {
        let rb = RingBuffer::new(8);
        rb.write(b"abcdefgh");
        assert_eq!(rb.len(), 8);
        assert_eq!(rb.snapshot(), b"abcdefgh");
    }

    #[test]
    fn test_write_capacity_plus_one() {
        let rb = RingBuffer::new(8);
        assert_eq!(rb.write(b"abcdefghi"), 9);
        assert_eq!(rb.len(), 8);
        assert_eq!(rb.snapshot(), b"bcdefghi");
    }

    #[test]
    fn test_write_ten_times_capacity() {
        let rb = RingBuffer::new(8);
        let big: Vec<u8> = (0..80u8).collect();
        assert_eq!(rb.write(&big), 80);
        assert_eq!(rb.len(), 8);
        assert_eq!(rb.snapshot(), &big[72..]);
    }

    #[test]
    fn test_incremental_writes_wrap() {
        let rb = RingBuffer::new(8);
        let writes: &[&[u8]] = &[b"abc", b"defg", b"hij", b"k"];
        for w in writes {
            rb.write(w);
        }
        assert_eq!(rb.snapshot(), expected(writes, 8));
    }

    #[test]
    fn test_snapshot_law_random_lengths() {
        let rb = RingBuffer::new(16);
        let chunks: Vec<Vec<u8>> = (0..20)
            .map(|i| (0..(i * 3 % 11)).map(|j| (i * 7 + j) as u8).collect())
            .collect();
        let refs: Vec<&[u8]> = chunks.iter().map(|c| c.as_slice()).collect();
        for c in &refs {
            rb.write(c);
        }
        assert_eq!(rb.snapshot(), expected(&refs, 16));
    }

    #[test]
    fn test_reset_then_rewrite_matches() {
        let rb = RingBuffer::new(8);
        rb.write(b"hello world");
        let first = rb.snapshot();
        rb.reset();
        assert!(rb.is_empty());
        rb.write(b"hello world");
        assert_eq!(rb.snapshot(), first);
    }

    #[test]
    fn test_dump_and_attach_replays_history_then_live() {
        let rb = RingBuffer::new(8);
        rb.write(b"old");
        let sink = CaptureSink::default();
        rb.dump_and_attach(Box::new(sink.clone()));
        rb.write(b"new");
        assert_eq!(sink.contents(), b"oldnew");
        // History tracks everything regardless of the sink
        assert_eq!(rb.snapshot(), b"oldnew");
    }

    #[test]
    fn test_sink_sees_full_oversized_write() {
        let rb = RingBuffer::new(4);
        let sink = CaptureSink::default();
        rb.dump_and_attach(Box::new(sink.clone()));
        rb.write(b"0123456789");
        // The sink gets every byte even though the history keeps only 4
        assert_eq!(sink.contents(), b"0123456789");
        assert_eq!(rb.snapshot(), b"6789");
    }

    #[test]
    fn test_detach_stops_fanout() {
        let rb = RingBuffer::new(8);
        let sink = CaptureSink::default();
        rb.dump_and_attach(Box::new(sink.clone()));
        rb.write(b"a");
        rb.detach();
        rb.write(b"b");
        assert_eq!(sink.contents(), b"a");
        assert_eq!(rb.snapshot(), b"ab");
    }

    #[test]
    fn test_attach_replaces_previous_sink() {
        let rb = RingBuffer::new(8);
        let first = CaptureSink::default();
        let second = CaptureSink::default();
        rb.dump_and_attach(Box::new(first.clone()));
        rb.dump_and_attach(Box::new(second.clone()));
        rb.write(b"x");
        assert_eq!(first.contents(), b"");
        assert_eq!(second.contents(), b"x");
    }

    #[test]
    fn test_sink_errors_swallowed() {
        let rb = RingBuffer::new(8);
        rb.dump_and_attach(Box::new(FailingSink));
        assert_eq!(rb.write(b"data"), 4);
        assert_eq!(rb.snapshot(), b"data");
    }

    #[test]
    fn test_write_after_wrap_keeps_order() {
        let rb = RingBuffer::new(4);
        rb.write(b"abcd");
        rb.write(b"ef");
        assert_eq!(rb.snapshot(), b"cdef");
        rb.write(b"ghi");
        assert_eq!(rb.snapshot(), b"fghi");
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_panics() {
        let _ = RingBuffer::new(0);
    }
}

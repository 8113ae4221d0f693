//! Single-producer, single-consumer IQ byte ring buffer (spec §4.1).
//!
//! Plain `ringbuf::HeapRb` does not permit overwrite-on-overflow, which
//! this buffer needs (the receiver must never block on a slow
//! channelizer); hence a hand-rolled cursor-pair buffer behind one mutex,
//! matching the spec's `produce`/`available`/`advance_head` contract.

use std::sync::Mutex;

struct Inner {
    data: Vec<u8>,
    /// Next byte index the producer will write.
    head: usize,
    /// Next byte index the consumer will read.
    tail: usize,
    /// Bytes currently held (0..=data.len()).
    len: usize,
    overflow_count: u64,
}

/// Sized to a multiple of one FFT batch's input requirement, per §4.1.
pub struct IqRingBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl IqRingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be nonzero");
        Self {
            inner: Mutex::new(Inner {
                data: vec![0u8; capacity],
                head: 0,
                tail: 0,
                len: 0,
                overflow_count: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append bytes, overwriting unread data (and counting the overflow)
    /// rather than blocking the producer.
    pub fn produce(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let cap = inner.data.len();
        if bytes.len() >= cap {
            // Degenerate case: incoming chunk alone wraps the whole buffer.
            let start = bytes.len() - cap;
            inner.data.copy_from_slice(&bytes[start..]);
            inner.tail = 0;
            inner.head = 0;
            inner.len = cap;
            inner.overflow_count += 1;
            return;
        }

        let would_overflow = bytes.len() > cap - inner.len;
        for &b in bytes {
            let tail = inner.tail;
            inner.data[tail] = b;
            inner.tail = (inner.tail + 1) % cap;
        }
        if would_overflow {
            let overrun = bytes.len() - (cap - inner.len);
            inner.head = (inner.head + overrun) % cap;
            inner.len = cap;
            inner.overflow_count += 1;
        } else {
            inner.len += bytes.len();
        }
    }

    /// Bytes available to read (head..tail, modulo size).
    pub fn available(&self) -> usize {
        self.inner.lock().unwrap().len
    }

    pub fn overflow_count(&self) -> u64 {
        self.inner.lock().unwrap().overflow_count
    }

    /// Copy `n` bytes starting at the current head into `out`, without
    /// consuming them. `out.len()` must equal `n`.
    pub fn peek(&self, n: usize, out: &mut [u8]) -> bool {
        let inner = self.inner.lock().unwrap();
        if inner.len < n || out.len() != n {
            return false;
        }
        let cap = inner.data.len();
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = inner.data[(inner.head + i) % cap];
        }
        true
    }

    /// Advance the consumer cursor by `n` bytes (must be `<= available()`).
    pub fn advance_head(&self, n: usize) {
        let mut inner = self.inner.lock().unwrap();
        let cap = inner.data.len();
        let n = n.min(inner.len);
        inner.head = (inner.head + n) % cap;
        inner.len -= n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produce_then_peek_round_trips() {
        let rb = IqRingBuffer::new(16);
        rb.produce(&[1, 2, 3, 4]);
        assert_eq!(rb.available(), 4);
        let mut out = [0u8; 4];
        assert!(rb.peek(4, &mut out));
        assert_eq!(out, [1, 2, 3, 4]);
        rb.advance_head(4);
        assert_eq!(rb.available(), 0);
    }

    #[test]
    fn overflow_counts_and_preserves_most_recent_bytes() {
        let rb = IqRingBuffer::new(4);
        rb.produce(&[1, 2, 3, 4]);
        assert_eq!(rb.overflow_count(), 0);
        rb.produce(&[5, 6]);
        assert_eq!(rb.overflow_count(), 1);
        assert_eq!(rb.available(), 4);
        let mut out = [0u8; 4];
        rb.peek(4, &mut out);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn wraparound_read_is_contiguous_in_peek_order() {
        let rb = IqRingBuffer::new(8);
        rb.produce(&[1, 2, 3, 4, 5, 6]);
        rb.advance_head(4);
        rb.produce(&[7, 8, 9, 10]);
        let mut out = [0u8; 6];
        assert!(rb.peek(6, &mut out));
        assert_eq!(out, [5, 6, 7, 8, 9, 10]);
    }
}

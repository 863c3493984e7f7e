//! Chained-buffer accumulator shared between the socket handler and frame decoders.

use bytes::BytesMut;
use std::sync::{Arc, Mutex};

/// A cumulative byte queue fed by the socket handler and consumed destructively
/// by frame decoders further down the inbound chain.
///
/// Cloning a `BufQueue` yields another handle onto the same bytes, which is how
/// the queue travels down the pipeline while the socket handler keeps
/// accumulating into it.
#[derive(Clone, Default)]
pub struct BufQueue {
    chain: Arc<Mutex<BytesMut>>,
}

impl BufQueue {
    /// Creates a new empty BufQueue
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of readable bytes in the queue.
    pub fn chain_length(&self) -> usize {
        let chain = self.chain.lock().unwrap();
        chain.len()
    }

    /// Returns true if the queue holds no readable bytes.
    pub fn is_empty(&self) -> bool {
        self.chain_length() == 0
    }

    /// Reserves capacity ahead of the readable bytes so that at least
    /// `min_available` bytes can be appended without reallocating, growing in
    /// `allocation_size` steps. Matches the pipeline's read buffer settings.
    pub fn preallocate(&self, min_available: usize, allocation_size: usize) {
        let mut chain = self.chain.lock().unwrap();
        let spare = chain.capacity() - chain.len();
        if spare < min_available {
            chain.reserve(std::cmp::max(min_available, allocation_size));
        }
    }

    /// Appends a chunk of bytes at the end of the queue.
    pub fn append(&self, buf: BytesMut) {
        let mut chain = self.chain.lock().unwrap();
        chain.extend_from_slice(&buf);
    }

    /// Copies the first `dst.len()` readable bytes into `dst` without consuming
    /// them. Returns false if fewer bytes are available.
    pub fn peek(&self, dst: &mut [u8]) -> bool {
        let chain = self.chain.lock().unwrap();
        if chain.len() < dst.len() {
            return false;
        }
        dst.copy_from_slice(&chain[..dst.len()]);
        true
    }

    /// Runs a closure over the readable bytes without consuming them, the
    /// cursor-style front access used by scanning decoders.
    pub fn with_front<T>(&self, f: impl FnOnce(&[u8]) -> T) -> T {
        let chain = self.chain.lock().unwrap();
        f(&chain[..])
    }

    /// Discards up to `n` bytes from the front of the queue.
    pub fn trim_start(&self, n: usize) {
        let mut chain = self.chain.lock().unwrap();
        let n = std::cmp::min(n, chain.len());
        let _ = chain.split_to(n);
    }

    /// Splits the first `n` bytes off the queue, consuming them.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [BufQueue::chain_length].
    pub fn split_to(&self, n: usize) -> BytesMut {
        let mut chain = self.chain.lock().unwrap();
        chain.split_to(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buf_queue_append_split() {
        let q = BufQueue::new();
        q.append(BytesMut::from(&b"hello"[..]));
        q.append(BytesMut::from(&b" world"[..]));
        assert_eq!(11, q.chain_length());

        let front = q.split_to(5);
        assert_eq!(&front[..], b"hello");
        assert_eq!(6, q.chain_length());
    }

    #[test]
    fn test_buf_queue_shared_handle() {
        let q = BufQueue::new();
        let other = q.clone();
        q.append(BytesMut::from(&b"abc"[..]));

        assert_eq!(3, other.chain_length());
        let _ = other.split_to(3);
        assert!(q.is_empty());
    }

    #[test]
    fn test_buf_queue_peek_and_trim() {
        let q = BufQueue::new();
        q.append(BytesMut::from(&b"\x00\x03abc"[..]));

        let mut hdr = [0u8; 2];
        assert!(q.peek(&mut hdr));
        assert_eq!([0u8, 3u8], hdr);
        assert_eq!(5, q.chain_length());

        q.trim_start(2);
        assert_eq!(3, q.chain_length());

        let mut too_long = [0u8; 4];
        assert!(!q.peek(&mut too_long));

        // trims beyond the end saturate
        q.trim_start(100);
        assert!(q.is_empty());
    }
}

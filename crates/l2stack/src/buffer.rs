//! Byte-buffer arena.
//!
//! Buffers are drawn from a pool with a hard cap on how many may be outstanding at
//! once, via the same CAS-loop admission-control pattern used for quota checks
//! elsewhere in this crate. Each buffer owns a fixed block of storage and exposes
//! headroom so protocol headers can be prepended without copying the payload.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::L2Error;

/// Minimum payload capacity a buffer must offer (SDUs up to 9000 octets).
pub const MIN_PAYLOAD_CAPACITY: usize = 9000;

/// Space reserved ahead of the payload for RLC/PDCP headers to be prepended into
/// without a copy (largest header in this stack is the LTE PDCP 18-bit variant at 3
/// bytes plus the 4-byte MAC-I trailer is handled separately via `append`).
pub const HEADROOM: usize = 32;

const TOTAL_CAPACITY: usize = MIN_PAYLOAD_CAPACITY + HEADROOM;

/// Per-buffer sidecar carried alongside the payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferMetadata {
    pub pdcp_sn: Option<u32>,
    pub timestamp_ms: i64,
}

/// A contiguous, move-only buffer with headroom/tailroom, drawn from a [`BufferPool`].
///
/// `msg` (here, `head`) points into `storage`; `prepend`/`consume_front` slide it
/// left/right without ever copying the payload bytes.
#[derive(Debug)]
pub struct ByteBuffer {
    storage: Box<[u8; TOTAL_CAPACITY]>,
    head: usize,
    len: usize,
    pub metadata: BufferMetadata,
    pool_slot: Option<PoolSlot>,
}

impl ByteBuffer {
    fn new_at(head: usize, pool_slot: Option<PoolSlot>) -> Self {
        Self {
            storage: Box::new([0u8; TOTAL_CAPACITY]),
            head,
            len: 0,
            metadata: BufferMetadata::default(),
            pool_slot,
        }
    }

    /// Constructs a standalone buffer outside any pool (used by tests and by the
    /// crypto-provider boundary, which hands back freshly allocated ciphertext).
    pub fn standalone() -> Self {
        Self::new_at(HEADROOM, None)
    }

    /// Grows the payload by `n` bytes at the front, returning the newly exposed
    /// prefix for the caller to fill in (e.g. an RLC or PDCP header).
    pub fn prepend(&mut self, n: usize) -> Result<&mut [u8], L2Error> {
        if n > self.head {
            return Err(L2Error::OutOfMemory);
        }
        self.head -= n;
        self.len += n;
        Ok(&mut self.storage[self.head..self.head + n])
    }

    /// Shrinks the payload by `n` bytes from the front (consuming a parsed header).
    pub fn consume_front(&mut self, n: usize) {
        let n = n.min(self.len);
        self.head += n;
        self.len -= n;
    }

    /// Appends `data` to the end of the payload (e.g. a MAC-I trailer).
    pub fn append(&mut self, data: &[u8]) -> Result<(), L2Error> {
        let end = self.head + self.len;
        if end + data.len() > TOTAL_CAPACITY {
            return Err(L2Error::OutOfMemory);
        }
        self.storage[end..end + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    /// Copies `data` in as the buffer's entire payload, replacing whatever was there.
    pub fn fill_from(&mut self, data: &[u8]) -> Result<(), L2Error> {
        if data.len() > TOTAL_CAPACITY - HEADROOM {
            return Err(L2Error::OutOfMemory);
        }
        self.head = HEADROOM;
        self.len = data.len();
        self.storage[self.head..self.head + self.len].copy_from_slice(data);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.head..self.head + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.head..self.head + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn headroom(&self) -> usize {
        self.head
    }
}

/// Releases the buffer's slot back to its pool, if any, on drop.
impl Drop for ByteBuffer {
    fn drop(&mut self) {
        if let Some(slot) = self.pool_slot.take() {
            slot.used.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug)]
struct PoolSlot {
    used: Arc<AtomicUsize>,
}

/// A fixed-capacity pool of [`ByteBuffer`]s. `make_buffer` fails with
/// [`L2Error::OutOfMemory`] once `capacity` buffers are concurrently outstanding;
/// callers must treat that as a recoverable soft error and back off.
#[derive(Debug, Clone)]
pub struct BufferPool {
    capacity: usize,
    used: Arc<AtomicUsize>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn make_buffer(&self) -> Result<ByteBuffer, L2Error> {
        loop {
            let current = self.used.load(Ordering::Relaxed);
            if current >= self.capacity {
                return Err(L2Error::OutOfMemory);
            }
            if self
                .used
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(ByteBuffer::new_at(
                    HEADROOM,
                    Some(PoolSlot {
                        used: Arc::clone(&self.used),
                    }),
                ));
            }
        }
    }

    pub fn outstanding(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_then_consume_roundtrips() {
        let mut buf = ByteBuffer::standalone();
        buf.fill_from(b"payload").unwrap();
        let hdr = buf.prepend(2).unwrap();
        hdr.copy_from_slice(&[0xAA, 0xBB]);
        assert_eq!(buf.as_slice(), b"\xAA\xBBpayload");
        buf.consume_front(2);
        assert_eq!(buf.as_slice(), b"payload");
    }

    #[test]
    fn pool_exhaustion_is_out_of_memory() {
        let pool = BufferPool::new(1);
        let _first = pool.make_buffer().unwrap();
        assert_eq!(pool.make_buffer().unwrap_err(), L2Error::OutOfMemory);
    }

    #[test]
    fn pool_slot_released_on_drop() {
        let pool = BufferPool::new(1);
        {
            let _buf = pool.make_buffer().unwrap();
            assert_eq!(pool.outstanding(), 1);
        }
        assert_eq!(pool.outstanding(), 0);
        assert!(pool.make_buffer().is_ok());
    }
}

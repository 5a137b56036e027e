//! Reusable staging buffers for guarded requests.
//!
//! Every guarded request stages its response body in a buffer borrowed from
//! a shared pool, avoiding a fresh allocation per request. The pool is the
//! only resource shared across requests; a buffer is owned by exactly one
//! request between [`BufferPool::get`] and [`BufferPool::put`].

use std::sync::Mutex;

use bytes::BytesMut;

/// Buffers retained by the pool; extras returned beyond this are dropped so
/// a burst of concurrent requests cannot pin memory indefinitely.
const MAX_SHELVED: usize = 64;

/// Capacity of buffers allocated when the pool is empty.
const INITIAL_CAPACITY: usize = 1024;

/// A pool of reusable [`BytesMut`] staging buffers.
///
/// Buffers handed out by [`get`](Self::get) are always empty: [`put`](Self::put)
/// clears a buffer before shelving it, so content staged for one request can
/// never leak into another. Reused buffers keep their capacity.
///
/// # Examples
///
/// ```
/// use backstop::pool::BufferPool;
///
/// let pool = BufferPool::new();
/// let mut buffer = pool.get();
/// buffer.extend_from_slice(b"staged");
/// pool.put(buffer);
/// assert!(pool.get().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct BufferPool {
    shelf: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Borrow an empty buffer, allocating a fresh one when none is shelved.
    #[must_use]
    pub fn get(&self) -> BytesMut {
        self.shelf
            .lock()
            .expect("lock poisoned")
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(INITIAL_CAPACITY))
    }

    /// Return a buffer, making it eligible for a future [`get`](Self::get).
    ///
    /// The buffer is cleared here; `get` relies on that and never clears.
    pub fn put(&self, mut buffer: BytesMut) {
        buffer.clear();
        let mut shelf = self.shelf.lock().expect("lock poisoned");
        if shelf.len() < MAX_SHELVED {
            shelf.push(buffer);
        }
    }
}

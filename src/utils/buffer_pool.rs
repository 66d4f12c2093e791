//! # Buffer Pool
//!
//! Recycles the small buffers the session layer rents on its hot paths:
//! 8-byte data headers on every send, and the one cached negotiation
//! datagram a connection may hold before its negotiator attaches.
//!
//! Rentals settle themselves on drop: a buffer goes back on the shelf when
//! it is still worth keeping, and is simply freed when it was pinned, grew
//! past the pooling cap, or outlived the pool.
//!
//! ## Usage
//! ```rust
//! use datagram_session::utils::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(100);
//! let mut header = pool.rent(8, false).expect("growing pools never run dry");
//! header.resize(8, 0);
//! // dropping the rental shelves the buffer again
//! ```

use std::sync::{Arc, Mutex, Weak};

use crate::error::{Result, SessionError};

/// Buffers that grew past this capacity are freed instead of shelved (4KB)
const MAX_POOLED_BUFFER_SIZE: usize = 4096;

/// Capacity of the buffers pre-allocated at pool construction
const DEFAULT_BUFFER_CAPACITY: usize = 1024;

type Shelf = Mutex<Vec<Vec<u8>>>;

/// A rented byte buffer, used like a `Vec<u8>` through deref.
///
/// Dropping the rental settles it: shelvable buffers return to their pool;
/// pinned rentals, buffers past the pooling cap, and buffers whose pool is
/// already gone are freed on the spot.
pub struct PooledBuffer {
    bytes: Vec<u8>,
    // None marks a pinned rental with no shelf to return to
    home: Option<Weak<Shelf>>,
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(shelf) = self.home.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        // the cap bounds how much idle memory a shelf can accumulate
        if self.bytes.capacity() > MAX_POOLED_BUFFER_SIZE {
            return;
        }
        let mut bytes = std::mem::take(&mut self.bytes);
        bytes.clear();
        if let Ok(mut slots) = shelf.lock() {
            slots.push(bytes);
        };
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bytes
    }
}

/// Thread-safe pool of small reusable buffers.
#[derive(Clone)]
pub struct BufferPool {
    shelf: Arc<Shelf>,
    grow: bool,
}

impl BufferPool {
    /// Create a pool with `pool_size` pre-allocated buffers that allocates
    /// fresh ones whenever the shelf is empty.
    pub fn new(pool_size: usize) -> Self {
        Self::with_growth(pool_size, true)
    }

    /// Create a pool that may decline to grow. With `grow == false`, `rent`
    /// fails once every shelved buffer is out.
    pub fn with_growth(pool_size: usize, grow: bool) -> Self {
        let slots = (0..pool_size)
            .map(|_| Vec::with_capacity(DEFAULT_BUFFER_CAPACITY))
            .collect();

        Self {
            shelf: Arc::new(Mutex::new(slots)),
            grow,
        }
    }

    /// Rent a buffer with capacity for at least `min_len` bytes.
    ///
    /// A `pinned` rental is allocated outside the pool and freed on drop;
    /// rent one when the buffer may be held past the rental scope (e.g.
    /// adopted by a transport queue). Pinned rentals never fail.
    ///
    /// # Errors
    /// Returns `SessionError::BufferExhausted` when the shelf is empty and
    /// the pool was configured not to grow.
    pub fn rent(&self, min_len: usize, pinned: bool) -> Result<PooledBuffer> {
        if pinned {
            return Ok(PooledBuffer {
                bytes: Vec::with_capacity(min_len),
                home: None,
            });
        }

        let recycled = match self.shelf.lock() {
            Ok(mut slots) => slots.pop(),
            Err(_) => None,
        };
        let mut bytes = match recycled {
            Some(bytes) => bytes,
            None if self.grow => Vec::new(),
            None => return Err(SessionError::BufferExhausted),
        };
        if bytes.capacity() < min_len {
            bytes.reserve(min_len);
        }

        Ok(PooledBuffer {
            bytes,
            home: Some(Arc::downgrade(&self.shelf)),
        })
    }

    /// Number of buffers currently on the shelf.
    pub fn available(&self) -> usize {
        self.shelf.lock().map(|slots| slots.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(50)
    }
}

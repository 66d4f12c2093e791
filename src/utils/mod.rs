//! # Utility Modules
//!
//! Supporting utilities for buffering, logging, and timing.
//!
//! This module provides reusable utilities used throughout the session-layer
//! implementation.
//!
//! ## Components
//! - **Buffer Pool**: rentable byte buffers for headers and cached datagrams
//! - **Logging**: Structured logging configuration
//! - **Time**: monotonic tick source for liveness and expiry checks

pub mod buffer_pool;
pub mod logging;
pub mod time;

// Re-export public types for advanced users
pub use buffer_pool::{BufferPool, PooledBuffer};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the inner value if a previous holder panicked.
/// Every guarded structure in this crate stays consistent across panics, so
/// poisoning carries no information we need to act on.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

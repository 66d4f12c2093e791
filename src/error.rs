//! # Error Types
//!
//! Error handling for the session layer.
//!
//! This module defines all error variants that can occur while driving a
//! connection, from transport-level I/O failures to lifecycle misuse.
//!
//! ## Error Categories
//! - **I/O Errors**: socket and transport failures
//! - **Lifecycle Errors**: operations issued in the wrong connection state,
//!   or against a disposed connection
//! - **Argument Errors**: caller-supplied buffers that violate the framing
//!   contract
//! - **Cancellation**: operations abandoned through their token
//!
//! Transport faults observed on background tasks are never returned from the
//! public API; they are routed to the registered exception handler instead.
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Lifecycle errors
    pub const ERR_NEGOTIATE_STATE: &str = "negotiation requires a fresh connection";
    pub const ERR_KEEPALIVE_STATE: &str = "keep-alive setup requires an established connection";
    pub const ERR_KEEPALIVE_TWICE: &str = "keep-alive handler already installed";

    /// Framing errors
    pub const ERR_PRE_BUFFER_TOO_SMALL: &str = "pre-buffer must reserve at least 8 header bytes";
    pub const ERR_PAYLOAD_TOO_LARGE: &str = "payload exceeds maximum data frame size";

    /// Transport errors
    pub const ERR_TRANSPORT_CLOSED: &str = "transport closed";
}

/// SessionError is the primary error type for all session-layer operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("connection has been disposed")]
    ObjectDisposed,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("buffer pool exhausted")]
    BufferExhausted,

    #[error("configuration error: {0}")]
    Config(String),
}

/// Type alias for Results using SessionError
pub type Result<T> = std::result::Result<T, SessionError>;

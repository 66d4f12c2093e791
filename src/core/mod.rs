//! # Core Wire Components
//!
//! Low-level datagram framing for the session layer.
//!
//! This module provides the foundation for the protocol: packet type
//! dispatch codes and the fixed data-frame header.
//!
//! ## Wire Format
//! ```text
//! [Type(1)] [Flags(1)] [Length(2)] [Serial(4)] [Payload(N)]
//! ```
//!
//! All multi-byte fields are big-endian. Control packets (negotiation,
//! keep-alive, reset) share only the leading type byte; their bodies are
//! owned by the respective collaborators.

pub mod frame;

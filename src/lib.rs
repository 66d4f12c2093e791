//! # datagram-session
//!
//! A connection-oriented session layer on top of an unreliable datagram
//! transport. It wraps a raw endpoint into a logical **network connection**
//! with a small control protocol: negotiation hand-off, keep-alive routing,
//! order-irrelevant data carriage with monotonically increasing serials,
//! remote liveness tracking, and an explicit reset signal.
//!
//! ## What this crate does not do
//! Retransmission, ordering, and flow control belong to a reliability layer
//! above; encryption, congestion control, and fragmentation are out of
//! scope. Senders must stay within the MSS.
//!
//! ## Wire format
//! The first byte selects the packet kind: `0x01` negotiation, `0x02`
//! keep-alive, `0x03` framed data, `0xFF` reset. Data datagrams carry an
//! 8-byte big-endian header (type, flags, length, serial) ahead of the
//! payload.
//!
//! ## Example
//! ```no_run
//! use datagram_session::{connect, SessionConfig};
//!
//! # async fn run() -> datagram_session::Result<()> {
//! let config = SessionConfig::default();
//! let connection = connect("127.0.0.1:9000".parse().unwrap(), &config).await?;
//! connection.skip_negotiation()?;
//! connection.send(b"hello")?;
//! connection.dispose_async().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use protocol::callbacks::{CallbackRegistration, ConnectionCallback};
pub use protocol::connection::{Connection, ConnectionState};
pub use protocol::keepalive::{KeepAliveHandler, PingKeepAlive};
pub use protocol::negotiation::Negotiator;
pub use transport::udp::connect;
pub use transport::{
    ConnectionTransport, ExceptionHandler, SharedTransport, SharedTransportConnection,
};

//! # Transport Layer
//!
//! The connection is polymorphic over where its datagrams come from: a
//! transport already bound to one remote endpoint, or a shared socket that
//! demultiplexes many remotes. Both are adapted to the single
//! [`ConnectionTransport`] façade so the state machine never cares which one
//! it is driving.
//!
//! Outbound datagrams are handed over as gather segments (header + payload)
//! and assembled into one wire datagram by the transport. Transport faults on
//! background tasks never surface as return values; they are routed to the
//! installed exception handler.

pub mod udp;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SessionError};
use crate::utils::lock_unpoisoned;

/// Handler for transport faults observed off the caller's stack. Returns
/// whether the fault was handled; an unhandled fault lets the transport shut
/// itself down and the connection observe closure through normal paths.
pub type ExceptionHandler = Arc<dyn Fn(&SessionError) -> bool + Send + Sync>;

/// Unified outbound interface the connection drives.
#[async_trait]
pub trait ConnectionTransport: Send + Sync {
    /// Queue the gather segments as one outbound datagram. Returns `false`
    /// once the transport no longer accepts traffic.
    fn queue_packet(&self, segments: &[&[u8]]) -> bool;

    /// Send one datagram and wait for the socket to take it.
    async fn queue_and_send(
        &self,
        segments: &[&[u8]],
        cancellation: CancellationToken,
    ) -> Result<()>;

    /// Install or clear the fault handler.
    fn set_exception_handler(&self, handler: Option<ExceptionHandler>);

    /// The remote this transport delivers to.
    fn remote_endpoint(&self) -> SocketAddr;

    /// Stop accepting traffic and release transport resources.
    fn dispose(&self);
}

/// A demultiplexing transport shared between many connections. The owner of
/// the socket implements this; per-connection views are built with
/// [`SharedTransportConnection`].
#[async_trait]
pub trait SharedTransport: Send + Sync {
    /// Queue one datagram towards `remote`. Returns `false` once the shared
    /// socket no longer accepts traffic.
    fn queue_packet_to(&self, remote: SocketAddr, segments: &[&[u8]]) -> bool;

    /// Send one datagram towards `remote` and wait for the socket to take it.
    async fn send_to(
        &self,
        remote: SocketAddr,
        segments: &[&[u8]],
        cancellation: CancellationToken,
    ) -> Result<()>;
}

/// Adapts a [`SharedTransport`] plus one remote address to the connection
/// façade. Disposal is a no-op: the shared socket belongs to its
/// demultiplexer and outlives any single connection.
pub struct SharedTransportConnection {
    shared: Arc<dyn SharedTransport>,
    remote: SocketAddr,
    handler: Mutex<Option<ExceptionHandler>>,
}

impl SharedTransportConnection {
    pub fn new(shared: Arc<dyn SharedTransport>, remote: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            shared,
            remote,
            handler: Mutex::new(None),
        })
    }

    /// The fault handler installed by this view's connection, for the
    /// demultiplexer to raise remote-specific faults through.
    pub fn exception_handler(&self) -> Option<ExceptionHandler> {
        lock_unpoisoned(&self.handler).clone()
    }
}

#[async_trait]
impl ConnectionTransport for SharedTransportConnection {
    fn queue_packet(&self, segments: &[&[u8]]) -> bool {
        self.shared.queue_packet_to(self.remote, segments)
    }

    async fn queue_and_send(
        &self,
        segments: &[&[u8]],
        cancellation: CancellationToken,
    ) -> Result<()> {
        if cancellation.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        self.shared.send_to(self.remote, segments, cancellation).await
    }

    fn set_exception_handler(&self, handler: Option<ExceptionHandler>) {
        *lock_unpoisoned(&self.handler) = handler;
    }

    fn remote_endpoint(&self) -> SocketAddr {
        self.remote
    }

    fn dispose(&self) {}
}

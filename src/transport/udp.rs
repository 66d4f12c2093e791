//! UDP endpoint transport and the client connect helper.
//!
//! [`UdpEndpointTransport`] wraps a tokio socket connected to one remote.
//! Fire-and-forget sends go through an unbounded queue drained by a sender
//! task so `queue_packet` never blocks the caller; awaited sends hit the
//! socket directly. Send faults are raised through the installed exception
//! handler, and an unhandled fault stops the sender task for good.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::SessionConfig;
use crate::error::{constants, Result, SessionError};
use crate::protocol::connection::Connection;
use crate::transport::{ConnectionTransport, ExceptionHandler};
use crate::utils::lock_unpoisoned;

/// Transport over a connected UDP socket.
pub struct UdpEndpointTransport {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    outbound: mpsc::UnboundedSender<BytesMut>,
    handler: Mutex<Option<ExceptionHandler>>,
    shutdown: CancellationToken,
}

impl UdpEndpointTransport {
    /// Wrap an already-connected socket and start the sender task.
    pub fn new(socket: Arc<UdpSocket>, remote: SocketAddr) -> Arc<Self> {
        let (outbound, mut rx) = mpsc::unbounded_channel::<BytesMut>();
        let shutdown = CancellationToken::new();

        let transport = Arc::new(Self {
            socket: socket.clone(),
            remote,
            outbound,
            handler: Mutex::new(None),
            shutdown: shutdown.clone(),
        });

        let weak = Arc::downgrade(&transport);
        tokio::spawn(async move {
            loop {
                let datagram = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    queued = rx.recv() => match queued {
                        Some(datagram) => datagram,
                        None => break,
                    },
                };

                if let Err(io) = socket.send(&datagram).await {
                    let error = SessionError::Io(io);
                    let handled = weak.upgrade().is_some_and(|t| t.raise(&error));
                    if !handled {
                        warn!(%error, "outbound send failed, stopping sender task");
                        shutdown.cancel();
                        break;
                    }
                }
            }
            debug!("sender task finished");
        });

        transport
    }

    fn raise(&self, error: &SessionError) -> bool {
        match lock_unpoisoned(&self.handler).clone() {
            Some(handler) => handler(error),
            None => false,
        }
    }

    fn assemble(segments: &[&[u8]]) -> BytesMut {
        let total = segments.iter().map(|s| s.len()).sum();
        let mut datagram = BytesMut::with_capacity(total);
        for segment in segments {
            datagram.extend_from_slice(segment);
        }
        datagram
    }
}

#[async_trait]
impl ConnectionTransport for UdpEndpointTransport {
    fn queue_packet(&self, segments: &[&[u8]]) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.outbound.send(Self::assemble(segments)).is_ok()
    }

    async fn queue_and_send(
        &self,
        segments: &[&[u8]],
        cancellation: CancellationToken,
    ) -> Result<()> {
        if cancellation.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        if self.shutdown.is_cancelled() {
            return Err(SessionError::Transport(constants::ERR_TRANSPORT_CLOSED.into()));
        }

        let datagram = Self::assemble(segments);
        tokio::select! {
            _ = cancellation.cancelled() => Err(SessionError::Cancelled),
            sent = self.socket.send(&datagram) => match sent {
                Ok(_) => Ok(()),
                // the caller holds the error; the handler only sees
                // faults from the background sender task
                Err(io) => Err(SessionError::Io(io)),
            },
        }
    }

    fn set_exception_handler(&self, handler: Option<ExceptionHandler>) {
        *lock_unpoisoned(&self.handler) = handler;
    }

    fn remote_endpoint(&self) -> SocketAddr {
        self.remote
    }

    fn dispose(&self) {
        self.shutdown.cancel();
    }
}

/// Open a connection to `remote`: bind an ephemeral socket, wrap it in an
/// owned endpoint transport, and start the inbound receive loop.
#[instrument(skip(config))]
pub async fn connect(remote: SocketAddr, config: &SessionConfig) -> Result<Arc<Connection>> {
    let bind_addr = match remote {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };

    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(remote).await?;
    let socket = Arc::new(socket);

    let transport = UdpEndpointTransport::new(socket.clone(), remote);
    let connection = Connection::new(transport.clone(), true, config);
    // the owned transport reports faults through the connection
    transport.set_exception_handler(Some(connection.exception_producer()));

    spawn_receive_loop(socket, &connection, config.connection.recv_buffer_len);

    debug!(%remote, "connection opened");
    Ok(connection)
}

fn spawn_receive_loop(socket: Arc<UdpSocket>, connection: &Arc<Connection>, recv_len: usize) {
    let weak = Arc::downgrade(connection);
    let shutdown = connection.shutdown_token();

    tokio::spawn(async move {
        let mut buf = vec![0u8; recv_len];
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv(&mut buf) => received,
            };

            let Some(connection) = weak.upgrade() else {
                break;
            };
            match received {
                Ok(len) => connection.input_packet(&buf[..len]).await,
                Err(io) => {
                    let error = SessionError::Io(io);
                    if !connection.raise_transport_error(&error) {
                        warn!(%error, "inbound receive failed, closing connection");
                        connection.set_transport_closed();
                        break;
                    }
                }
            }
        }
        debug!("receive loop finished");
    });
}

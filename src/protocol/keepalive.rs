//! Keep-alive contract and the default ping handler.
//!
//! The connection only routes type `0x02` datagrams to whatever handler is
//! installed; the timer loop is the handler's own business. [`PingKeepAlive`]
//! is the stock implementation: it emits a bare `[0x02]` datagram on every
//! interval tick, treats any inbound keep-alive as liveness, and expires the
//! connection through the dead-detection primitive when the remote has been
//! silent past the expire timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::frame::PacketKind;
use crate::protocol::connection::Connection;
use crate::utils::time;

/// External liveness driver attached through `Connection::setup_keep_alive`.
pub trait KeepAliveHandler: Send + Sync {
    /// Inbound keep-alive datagram (type `0x02`, full bytes including the
    /// type prefix). Returns whether the packet proves remote liveness.
    fn process_keep_alive_packet(&self, datagram: &[u8]) -> bool;

    /// The connection is tearing down; stop timers and drop back-references.
    fn notify_disposed(&self);
}

/// Default keep-alive: periodic one-byte pings plus expiry-driven dead
/// detection.
pub struct PingKeepAlive {
    shutdown: CancellationToken,
}

impl PingKeepAlive {
    /// Spawn the ping loop against `connection`. The loop holds only a weak
    /// reference and ends on disposal, on transport rejection, or once the
    /// connection expires.
    pub fn spawn(
        connection: &Arc<Connection>,
        interval: Duration,
        expire_timeout: Duration,
    ) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let weak = Arc::downgrade(connection);
        let expire_ms = expire_timeout.as_millis() as i64;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick resolves immediately; skip it so the first ping
            // goes out one full interval after setup
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(connection) = weak.upgrade() else {
                    break;
                };
                if connection.try_set_to_dead(time::now_tick().wrapping_sub(expire_ms)) {
                    debug!("remote expired, stopping keep-alive loop");
                    break;
                }
                if !connection.queue_control_packet(&[PacketKind::KeepAlive.code()]) {
                    debug!("transport rejected keep-alive, stopping loop");
                    break;
                }
            }
        });

        Arc::new(Self { shutdown })
    }
}

impl KeepAliveHandler for PingKeepAlive {
    fn process_keep_alive_packet(&self, _datagram: &[u8]) -> bool {
        true
    }

    fn notify_disposed(&self) {
        self.shutdown.cancel();
    }
}

//! Connection state machine.
//!
//! `Connection` turns a raw datagram transport into a logical network
//! connection: negotiation hand-off, keep-alive routing, framed data
//! carriage with monotonically increasing serials, remote liveness
//! tracking, and an explicit reset signal.
//!
//! ## Lock discipline
//! Three short non-overlapping locks, none held across an await:
//! - the **state lock** couples each transition with its notify decision;
//!   notification fires after release, in transition order
//! - the **negotiation lock** guards the early-packet cache (inside
//!   [`NegotiationCache`])
//! - the **statistics lock** guards the remote serial window and the
//!   packets-received counter
//!
//! The inbound dispatcher takes each lock at most once per datagram and
//! suspends only to deliver payload to subscribers.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::config::SessionConfig;
use crate::core::frame::{self, PacketKind};
use crate::error::{constants, Result, SessionError};
use crate::protocol::callbacks::{CallbackRegistration, CallbackRegistry, ConnectionCallback};
use crate::protocol::keepalive::{KeepAliveHandler, PingKeepAlive};
use crate::protocol::negotiation::{NegotiationCache, Negotiator};
use crate::transport::{ConnectionTransport, ExceptionHandler};
use crate::utils::buffer_pool::BufferPool;
use crate::utils::{lock_unpoisoned, time};

/// Lifecycle states of a connection. `Failed` and `Dead` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, nothing negotiated yet.
    None,
    /// Negotiation in progress.
    Connecting,
    /// Negotiation succeeded (or was skipped); data flows.
    Connected,
    /// Negotiation failed.
    Failed,
    /// Transport closed, reset received, or liveness expired.
    Dead,
}

#[derive(Default)]
struct RemoteStats {
    next_remote_serial: u32,
    packets_received: u32,
}

/// A logical connection over an unreliable datagram transport.
///
/// Create one with [`crate::transport::udp::connect`] or [`Connection::new`]
/// over any [`ConnectionTransport`]. All methods are safe to call from any
/// thread.
pub struct Connection {
    transport: Arc<dyn ConnectionTransport>,
    owns_transport: bool,
    pool: BufferPool,

    mtu: AtomicU16,
    state: Mutex<ConnectionState>,
    next_local_serial: AtomicU32,
    remote_stats: Mutex<RemoteStats>,
    last_active_tick: AtomicI64,

    disposed: AtomicBool,
    transport_closed: AtomicBool,
    reset_received: AtomicBool,
    reset_send_timeout: Duration,

    cache: NegotiationCache,
    negotiator: Mutex<Option<Arc<dyn Negotiator>>>,
    keep_alive: Mutex<Option<Arc<dyn KeepAliveHandler>>>,
    keep_alive_installed: AtomicBool,

    callbacks: CallbackRegistry,
    registration: Mutex<Option<Box<dyn Any + Send>>>,
    exception_handler: Mutex<Option<ExceptionHandler>>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Wrap a transport. `owns_transport` marks the connect-helper path
    /// where disposal must also dispose the socket.
    pub fn new(
        transport: Arc<dyn ConnectionTransport>,
        owns_transport: bool,
        config: &SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            owns_transport,
            pool: BufferPool::with_growth(config.pool.pool_size, config.pool.grow),
            mtu: AtomicU16::new(config.connection.mtu),
            state: Mutex::new(ConnectionState::None),
            next_local_serial: AtomicU32::new(0),
            remote_stats: Mutex::new(RemoteStats::default()),
            last_active_tick: AtomicI64::new(time::now_tick()),
            disposed: AtomicBool::new(false),
            transport_closed: AtomicBool::new(false),
            reset_received: AtomicBool::new(false),
            reset_send_timeout: config.connection.reset_send_timeout,
            cache: NegotiationCache::new(),
            negotiator: Mutex::new(None),
            keep_alive: Mutex::new(None),
            keep_alive_installed: AtomicBool::new(false),
            callbacks: CallbackRegistry::new(),
            registration: Mutex::new(None),
            exception_handler: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *lock_unpoisoned(&self.state)
    }

    /// Maximum datagram size the transport accepts.
    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Acquire)
    }

    /// Maximum payload per data packet: MTU minus the 8-byte header.
    pub fn mss(&self) -> u16 {
        self.mtu() - frame::HEADER_LEN as u16
    }

    /// The remote this connection talks to.
    pub fn remote_endpoint(&self) -> SocketAddr {
        self.transport.remote_endpoint()
    }

    /// Monotonic tick of the last proof of remote liveness.
    pub fn last_active_tick(&self) -> i64 {
        self.last_active_tick.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Subscribe to payload deliveries and state changes. The subscription
    /// lives until the returned handle is dropped or the connection is
    /// disposed.
    pub fn register(&self, callback: Arc<dyn ConnectionCallback>) -> CallbackRegistration {
        self.callbacks.register(callback)
    }

    /// Install the handle representing this connection's listing in a
    /// shared-transport demultiplexer. Dropped on `Failed`, on `Dead`, and
    /// on disposal.
    pub fn set_application_registration(&self, registration: Box<dyn Any + Send>) {
        *lock_unpoisoned(&self.registration) = Some(registration);
    }

    /// Install or clear the handler for transport faults. The handler
    /// returns whether the fault was handled; unhandled faults let the
    /// transport wind down and the connection observe closure normally.
    pub fn set_exception_handler(&self, handler: Option<ExceptionHandler>) {
        *lock_unpoisoned(&self.exception_handler) = handler;
    }

    /// Snapshot the remote statistics: the next expected remote serial and
    /// the packets received since the previous gather (counter resets).
    pub fn gather_packet_statistics(&self) -> (u32, u32) {
        let mut stats = lock_unpoisoned(&self.remote_stats);
        let gathered = (stats.next_remote_serial, stats.packets_received);
        stats.packets_received = 0;
        gathered
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    /// Feed one inbound datagram. Runs on the transport's inbound task and
    /// suspends only to deliver payload to subscribers.
    pub async fn input_packet(&self, datagram: &[u8]) {
        let Some(&first) = datagram.first() else {
            return;
        };
        if first == PacketKind::Reset.code() {
            self.on_reset_received();
            return;
        }
        if self.disposed.load(Ordering::Acquire) || self.transport_closed.load(Ordering::Acquire)
        {
            return;
        }
        if datagram.len() < frame::MIN_DATAGRAM_LEN {
            return;
        }

        let mut parsed = None;
        match self.state() {
            ConnectionState::None => {
                self.cache.store_if_empty(datagram, &self.pool);
            }
            ConnectionState::Connecting => {
                let negotiator = lock_unpoisoned(&self.negotiator).clone();
                let meaningful = match negotiator {
                    Some(negotiator) if first == PacketKind::Negotiation.code() => {
                        negotiator.input_packet(datagram)
                    }
                    // any other traffic is at least proof of life
                    Some(negotiator) => negotiator.notify_remote_progressing(),
                    None => false,
                };
                if meaningful {
                    self.touch();
                }
            }
            ConnectionState::Connected => {
                if first == PacketKind::KeepAlive.code() {
                    let handler = lock_unpoisoned(&self.keep_alive).clone();
                    if let Some(handler) = handler {
                        if handler.process_keep_alive_packet(datagram) {
                            self.touch();
                        }
                    }
                } else if first == PacketKind::Data.code() {
                    parsed = frame::parse_data(datagram);
                }
            }
            ConnectionState::Failed | ConnectionState::Dead => {}
        }

        let Some((serial, payload)) = parsed else {
            return;
        };

        {
            let mut stats = lock_unpoisoned(&self.remote_stats);
            // raw comparison; a serial wrap restarts the window
            if serial >= stats.next_remote_serial {
                stats.next_remote_serial = serial.wrapping_add(1);
            }
            stats.packets_received = stats.packets_received.wrapping_add(1);
        }

        if let Err(error) = self.callbacks.packet_received(payload, &self.shutdown).await {
            trace!(%error, "payload delivery interrupted");
        }
    }

    // ------------------------------------------------------------------
    // Negotiation
    // ------------------------------------------------------------------

    /// Attach a negotiator and drive the handshake. Transitions
    /// `None -> Connecting`; the outcome transition is performed by the
    /// negotiator through [`Connection::complete_negotiation`].
    #[instrument(skip_all)]
    pub async fn negotiate(&self, negotiator: Arc<dyn Negotiator>) -> Result<bool> {
        self.negotiate_with_token(negotiator, CancellationToken::new())
            .await
    }

    /// As [`Connection::negotiate`], with a caller-supplied token.
    pub async fn negotiate_with_token(
        &self,
        negotiator: Arc<dyn Negotiator>,
        cancellation: CancellationToken,
    ) -> Result<bool> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SessionError::ObjectDisposed);
        }
        self.check_and_change(
            ConnectionState::None,
            ConnectionState::Connecting,
            constants::ERR_NEGOTIATE_STATE,
        )?;

        *lock_unpoisoned(&self.negotiator) = Some(negotiator.clone());
        let cached = self.cache.take_and_disable();
        Ok(negotiator.negotiate(cached, cancellation).await)
    }

    /// Go straight to `Connected` without a handshake. Any cached early
    /// datagram is discarded.
    pub fn skip_negotiation(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SessionError::ObjectDisposed);
        }
        self.check_and_change(
            ConnectionState::None,
            ConnectionState::Connecting,
            constants::ERR_NEGOTIATE_STATE,
        )?;
        self.cache.disable();
        self.touch();
        self.change_to(ConnectionState::Connected);
        Ok(())
    }

    /// Upcall for the negotiator's completion. Detaches the negotiator,
    /// permanently disables packet caching, applies a negotiated MTU, and
    /// resolves `Connecting` into `Connected` or `Failed`.
    pub fn complete_negotiation(&self, success: bool, negotiated_mtu: Option<u16>) {
        let _negotiator = lock_unpoisoned(&self.negotiator).take();
        self.cache.disable();

        if self.state() != ConnectionState::Connecting {
            return;
        }
        if let Some(mtu) = negotiated_mtu {
            self.mtu.store(mtu, Ordering::Release);
        }
        if success {
            self.touch();
            let _ = self.check_and_change(
                ConnectionState::Connecting,
                ConnectionState::Connected,
                constants::ERR_NEGOTIATE_STATE,
            );
            debug!("negotiation succeeded");
        } else {
            let _ = self.check_and_change(
                ConnectionState::Connecting,
                ConnectionState::Failed,
                constants::ERR_NEGOTIATE_STATE,
            );
            self.release_registration();
            debug!("negotiation failed");
        }
    }

    // ------------------------------------------------------------------
    // Keep-alive
    // ------------------------------------------------------------------

    /// Install the keep-alive handler; `None` spawns the stock
    /// [`PingKeepAlive`]. Valid once per connection, in `Connected` only.
    pub fn setup_keep_alive(
        self: &Arc<Self>,
        handler: Option<Arc<dyn KeepAliveHandler>>,
        interval: Duration,
        expire_timeout: Duration,
    ) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SessionError::ObjectDisposed);
        }
        if self.state() != ConnectionState::Connected {
            return Err(SessionError::InvalidState(constants::ERR_KEEPALIVE_STATE));
        }
        if self.keep_alive_installed.swap(true, Ordering::AcqRel) {
            return Err(SessionError::InvalidState(constants::ERR_KEEPALIVE_TWICE));
        }

        let handler: Arc<dyn KeepAliveHandler> = match handler {
            Some(handler) => handler,
            None => PingKeepAlive::spawn(self, interval, expire_timeout),
        };
        *lock_unpoisoned(&self.keep_alive) = Some(handler);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Frame `payload` with the next local serial and queue it. Returns
    /// whether the transport accepted the datagram. Connection state is not
    /// checked; a send after close fails only at the transport.
    pub fn send(&self, payload: &[u8]) -> Result<bool> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SessionError::ObjectDisposed);
        }
        if payload.len() + 4 > u16::MAX as usize {
            return Err(SessionError::InvalidArgument(constants::ERR_PAYLOAD_TOO_LARGE));
        }

        let mut header = self.pool.rent(frame::HEADER_LEN, false)?;
        header.resize(frame::HEADER_LEN, 0);
        let serial = self.next_local_serial.fetch_add(1, Ordering::Relaxed);
        frame::write_data_header(&mut header, payload.len(), serial);

        Ok(self.transport.queue_packet(&[&header[..], payload]))
    }

    /// As [`Connection::send`], but waits for the socket to take the
    /// datagram.
    pub async fn send_async(&self, payload: &[u8], cancellation: CancellationToken) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SessionError::ObjectDisposed);
        }
        if cancellation.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        if payload.len() + 4 > u16::MAX as usize {
            return Err(SessionError::InvalidArgument(constants::ERR_PAYLOAD_TOO_LARGE));
        }

        let mut header = self.pool.rent(frame::HEADER_LEN, false)?;
        header.resize(frame::HEADER_LEN, 0);
        let serial = self.next_local_serial.fetch_add(1, Ordering::Relaxed);
        frame::write_data_header(&mut header, payload.len(), serial);

        self.transport
            .queue_and_send(&[&header[..], payload], cancellation)
            .await
    }

    /// Send a datagram whose first 8 bytes are reserved pre-space for the
    /// header, with the payload already in place behind them. Saves the
    /// header copy on hot paths.
    pub async fn send_with_pre_buffer(
        &self,
        datagram: &mut [u8],
        cancellation: CancellationToken,
    ) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SessionError::ObjectDisposed);
        }
        if cancellation.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        if datagram.len() < frame::HEADER_LEN {
            return Err(SessionError::InvalidArgument(
                constants::ERR_PRE_BUFFER_TOO_SMALL,
            ));
        }
        let payload_len = datagram.len() - frame::HEADER_LEN;
        if payload_len + 4 > u16::MAX as usize {
            return Err(SessionError::InvalidArgument(constants::ERR_PAYLOAD_TOO_LARGE));
        }

        let serial = self.next_local_serial.fetch_add(1, Ordering::Relaxed);
        frame::write_data_header(datagram, payload_len, serial);

        self.transport
            .queue_and_send(&[&datagram[..]], cancellation)
            .await
    }

    /// Queue a raw control datagram (negotiation, keep-alive) unframed.
    /// Returns `false` when the connection or transport no longer accepts
    /// traffic.
    pub fn queue_control_packet(&self, datagram: &[u8]) -> bool {
        if self.disposed.load(Ordering::Acquire) || self.transport_closed.load(Ordering::Acquire)
        {
            return false;
        }
        self.transport.queue_packet(&[datagram])
    }

    // ------------------------------------------------------------------
    // Liveness and teardown
    // ------------------------------------------------------------------

    /// Dead-detection primitive: returns `true` when the connection is
    /// already terminal, or when `threshold_tick` is past the last proof of
    /// liveness (wrap-aware), in which case it transitions to `Dead`.
    pub fn try_set_to_dead(&self, threshold_tick: i64) -> bool {
        if matches!(
            self.state(),
            ConnectionState::Failed | ConnectionState::Dead
        ) {
            return true;
        }
        if !time::tick_exceeds(threshold_tick, self.last_active_tick()) {
            return false;
        }

        debug!("liveness threshold exceeded, marking dead");
        self.change_to(ConnectionState::Dead);
        self.release_registration();
        true
    }

    /// Synchronous close: marks the transport closed, transitions to
    /// `Dead`, clears the negotiation cache, and detaches the negotiator
    /// and keep-alive handles. Idempotent.
    pub fn set_transport_closed(&self) {
        if !self.begin_close() {
            return;
        }
        self.finish_close();
    }

    /// Asynchronous close: as the synchronous variant, but first emits a
    /// single-byte reset to the remote (skipped when the remote reset us),
    /// capped at the configured timeout. Idempotent.
    pub async fn set_transport_closed_async(&self) {
        if !self.begin_close() {
            return;
        }
        if !self.reset_received.load(Ordering::Acquire) {
            let reset_datagram = [&frame::RESET_DATAGRAM[..]];
            let reset = self
                .transport
                .queue_and_send(&reset_datagram, CancellationToken::new());
            // best-effort farewell; teardown proceeds on expiry or failure
            let _ = tokio::time::timeout(self.reset_send_timeout, reset).await;
        }
        self.finish_close();
    }

    /// Dispose: close, then release the owned transport (if any), the
    /// application registration, the exception handler, and every
    /// subscription. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        self.set_transport_closed();
        self.release_owned_resources();
    }

    /// As [`Connection::dispose`], emitting the reset farewell first.
    #[instrument(skip_all)]
    pub async fn dispose_async(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        self.set_transport_closed_async().await;
        self.release_owned_resources();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn raise_transport_error(&self, error: &SessionError) -> bool {
        match lock_unpoisoned(&self.exception_handler).clone() {
            Some(handler) => handler(error),
            None => false,
        }
    }

    /// A fault handler that forwards into this connection without keeping
    /// it alive; owned transports install this.
    pub(crate) fn exception_producer(self: &Arc<Self>) -> ExceptionHandler {
        let weak = Arc::downgrade(self);
        Arc::new(move |error| {
            weak.upgrade()
                .is_some_and(|connection| connection.raise_transport_error(error))
        })
    }

    fn on_reset_received(&self) {
        self.reset_received.store(true, Ordering::Release);
        debug!("reset received from remote");
        self.set_transport_closed();
    }

    fn touch(&self) {
        self.last_active_tick.store(time::now_tick(), Ordering::Release);
    }

    fn check_and_change(
        &self,
        expected: ConnectionState,
        new: ConnectionState,
        message: &'static str,
    ) -> Result<()> {
        {
            let mut state = lock_unpoisoned(&self.state);
            if *state != expected {
                return Err(SessionError::InvalidState(message));
            }
            *state = new;
        }
        debug!(from = ?expected, to = ?new, "state changed");
        self.callbacks.notify_state_changed(new);
        Ok(())
    }

    fn change_to(&self, new: ConnectionState) {
        let changed = {
            let mut state = lock_unpoisoned(&self.state);
            if *state == new {
                false
            } else {
                *state = new;
                true
            }
        };
        if changed {
            debug!(to = ?new, "state changed");
            self.callbacks.notify_state_changed(new);
        }
    }

    fn begin_close(&self) -> bool {
        !self.transport_closed.swap(true, Ordering::AcqRel)
    }

    fn finish_close(&self) {
        self.change_to(ConnectionState::Dead);
        self.cache.disable();
        if let Some(negotiator) = lock_unpoisoned(&self.negotiator).take() {
            negotiator.notify_disposed();
        }
        if let Some(keep_alive) = lock_unpoisoned(&self.keep_alive).take() {
            keep_alive.notify_disposed();
        }
        self.release_registration();
    }

    fn release_owned_resources(&self) {
        if self.owns_transport {
            self.transport.dispose();
        }
        self.transport.set_exception_handler(None);
        self.release_registration();
        *lock_unpoisoned(&self.exception_handler) = None;
        self.callbacks.clear();
    }

    fn release_registration(&self) {
        lock_unpoisoned(&self.registration).take();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

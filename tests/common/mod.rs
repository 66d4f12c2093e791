//! Shared test doubles for the integration suite.

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use datagram_session::utils::buffer_pool::PooledBuffer;
use datagram_session::{
    Connection, ConnectionCallback, ConnectionState, ConnectionTransport, ExceptionHandler,
    Negotiator, Result, SessionError,
};

/// Transport double that records every assembled outbound datagram.
pub struct RecordingTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    accept: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            accept: AtomicBool::new(true),
        })
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn reject_further_traffic(&self) {
        self.accept.store(false, Ordering::Release);
    }
}

#[async_trait]
impl ConnectionTransport for RecordingTransport {
    fn queue_packet(&self, segments: &[&[u8]]) -> bool {
        if !self.accept.load(Ordering::Acquire) {
            return false;
        }
        let mut datagram = Vec::new();
        for segment in segments {
            datagram.extend_from_slice(segment);
        }
        self.sent.lock().unwrap().push(datagram);
        true
    }

    async fn queue_and_send(
        &self,
        segments: &[&[u8]],
        cancellation: CancellationToken,
    ) -> Result<()> {
        if cancellation.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        if self.queue_packet(segments) {
            Ok(())
        } else {
            Err(SessionError::Transport("recording transport rejected".into()))
        }
    }

    fn set_exception_handler(&self, _handler: Option<ExceptionHandler>) {}

    fn remote_endpoint(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 9))
    }

    fn dispose(&self) {
        self.accept.store(false, Ordering::Release);
    }
}

/// Subscriber double recording payloads and state transitions.
pub struct EventRecorder {
    pub payloads: Mutex<Vec<Vec<u8>>>,
    pub states: Mutex<Vec<ConnectionState>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            payloads: Mutex::new(Vec::new()),
            states: Mutex::new(Vec::new()),
        })
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionCallback for EventRecorder {
    async fn packet_received(&self, payload: &[u8]) -> Result<()> {
        self.payloads.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    fn state_changed(&self, state: ConnectionState) {
        self.states.lock().unwrap().push(state);
    }
}

/// Negotiator double that resolves with a scripted outcome as soon as it is
/// attached.
pub struct ScriptedNegotiator {
    connection: Mutex<Option<Weak<Connection>>>,
    cached_seen: Mutex<Option<Vec<u8>>>,
    inputs: Mutex<Vec<Vec<u8>>>,
    progress_notifications: AtomicUsize,
    success: bool,
    negotiated_mtu: Option<u16>,
}

impl ScriptedNegotiator {
    pub fn new(success: bool, negotiated_mtu: Option<u16>) -> Arc<Self> {
        Arc::new(Self {
            connection: Mutex::new(None),
            cached_seen: Mutex::new(None),
            inputs: Mutex::new(Vec::new()),
            progress_notifications: AtomicUsize::new(0),
            success,
            negotiated_mtu,
        })
    }

    /// Give the negotiator its upcall target before attaching it.
    pub fn bind(&self, connection: &Arc<Connection>) {
        *self.connection.lock().unwrap() = Some(Arc::downgrade(connection));
    }

    pub fn cached_seen(&self) -> Option<Vec<u8>> {
        self.cached_seen.lock().unwrap().clone()
    }

    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn progress_notifications(&self) -> usize {
        self.progress_notifications.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Negotiator for ScriptedNegotiator {
    fn input_packet(&self, datagram: &[u8]) -> bool {
        self.inputs.lock().unwrap().push(datagram.to_vec());
        true
    }

    fn notify_remote_progressing(&self) -> bool {
        self.progress_notifications.fetch_add(1, Ordering::AcqRel);
        true
    }

    async fn negotiate(
        &self,
        cached: Option<PooledBuffer>,
        _cancellation: CancellationToken,
    ) -> bool {
        *self.cached_seen.lock().unwrap() = cached.map(|buffer| buffer.to_vec());

        let connection = self
            .connection
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(connection) = connection {
            connection.complete_negotiation(self.success, self.negotiated_mtu);
        }
        self.success
    }

    fn notify_disposed(&self) {
        self.connection.lock().unwrap().take();
    }
}

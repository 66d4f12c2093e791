//! Lifecycle scenarios: negotiation, the early-packet race, liveness, and
//! teardown, driven through the public API against a recording transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{EventRecorder, RecordingTransport, ScriptedNegotiator};
use datagram_session::utils::time;
use datagram_session::{Connection, ConnectionState, SessionConfig, SessionError};

fn new_connection() -> (Arc<Connection>, Arc<RecordingTransport>) {
    let transport = RecordingTransport::new();
    let connection = Connection::new(transport.clone(), false, &SessionConfig::default());
    (connection, transport)
}

#[tokio::test]
async fn pre_negotiation_packet_reaches_negotiator() {
    let (connection, _transport) = new_connection();

    // a negotiation datagram races ahead of the local negotiate() call
    connection.input_packet(&[0x01, 0xAA, 0xBB, 0xCC]).await;
    assert_eq!(connection.state(), ConnectionState::None);

    let negotiator = ScriptedNegotiator::new(true, None);
    negotiator.bind(&connection);
    let negotiated = connection.negotiate(negotiator.clone()).await.unwrap();

    assert!(negotiated);
    assert_eq!(negotiator.cached_seen(), Some(vec![0x01, 0xAA, 0xBB, 0xCC]));
}

#[tokio::test]
async fn only_first_early_packet_is_cached() {
    let (connection, _transport) = new_connection();

    connection.input_packet(&[0x01, 0x0A]).await;
    connection.input_packet(&[0x01, 0x0B]).await;

    let negotiator = ScriptedNegotiator::new(true, None);
    negotiator.bind(&connection);
    connection.negotiate(negotiator.clone()).await.unwrap();

    assert_eq!(negotiator.cached_seen(), Some(vec![0x01, 0x0A]));
}

#[tokio::test]
async fn successful_negotiation_applies_mtu() {
    let (connection, _transport) = new_connection();
    let recorder = EventRecorder::new();
    let _registration = connection.register(recorder.clone());

    let negotiator = ScriptedNegotiator::new(true, Some(1200));
    negotiator.bind(&connection);
    let negotiated = connection.negotiate(negotiator).await.unwrap();

    assert!(negotiated);
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(connection.mtu(), 1200);
    assert_eq!(connection.mss(), 1192);
    assert_eq!(
        recorder.states(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[tokio::test]
async fn failed_negotiation_lands_in_failed() {
    let (connection, _transport) = new_connection();
    let recorder = EventRecorder::new();
    let _registration = connection.register(recorder.clone());

    let negotiator = ScriptedNegotiator::new(false, None);
    negotiator.bind(&connection);
    let negotiated = connection.negotiate(negotiator).await.unwrap();

    assert!(!negotiated);
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert_eq!(
        recorder.states(),
        vec![ConnectionState::Connecting, ConnectionState::Failed]
    );

    // terminal states are sticky
    assert!(matches!(
        connection.skip_negotiation(),
        Err(SessionError::InvalidState(_))
    ));
}

#[tokio::test]
async fn negotiate_after_skip_is_invalid() {
    let (connection, _transport) = new_connection();
    connection.skip_negotiation().unwrap();

    let negotiator = ScriptedNegotiator::new(true, None);
    negotiator.bind(&connection);
    assert!(matches!(
        connection.negotiate(negotiator).await,
        Err(SessionError::InvalidState(_))
    ));
}

#[tokio::test]
async fn non_negotiation_traffic_counts_as_progress() {
    let (connection, _transport) = new_connection();

    // attach a negotiator that never completes, leaving the state Connecting
    struct Stalling;
    #[async_trait::async_trait]
    impl datagram_session::Negotiator for Stalling {
        fn input_packet(&self, _datagram: &[u8]) -> bool {
            false
        }
        fn notify_remote_progressing(&self) -> bool {
            true
        }
        async fn negotiate(
            &self,
            _cached: Option<datagram_session::utils::buffer_pool::PooledBuffer>,
            _cancellation: tokio_util::sync::CancellationToken,
        ) -> bool {
            true
        }
        fn notify_disposed(&self) {}
    }

    connection.negotiate(Arc::new(Stalling)).await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Connecting);

    let before = connection.last_active_tick();
    tokio::time::sleep(Duration::from_millis(5)).await;
    connection.input_packet(&[0x02, 0x00, 0x00, 0x00]).await;
    assert!(connection.last_active_tick() > before);
}

#[tokio::test]
async fn keep_alive_packet_refreshes_liveness() {
    let (connection, _transport) = new_connection();
    connection.skip_negotiation().unwrap();
    connection
        .setup_keep_alive(
            Some(Arc::new(AlwaysAlive) as Arc<dyn datagram_session::KeepAliveHandler>),
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
        .unwrap();

    let before = connection.last_active_tick();
    tokio::time::sleep(Duration::from_millis(5)).await;
    connection.input_packet(&[0x02, 0x00, 0x00, 0x00]).await;
    assert!(connection.last_active_tick() > before);
}

struct AlwaysAlive;

impl datagram_session::KeepAliveHandler for AlwaysAlive {
    fn process_keep_alive_packet(&self, _datagram: &[u8]) -> bool {
        true
    }
    fn notify_disposed(&self) {}
}

#[tokio::test]
async fn data_packets_do_not_refresh_liveness() {
    let (connection, _transport) = new_connection();
    connection.skip_negotiation().unwrap();

    let before = connection.last_active_tick();
    tokio::time::sleep(Duration::from_millis(20)).await;
    connection
        .input_packet(&[0x03, 0x00, 0x00, 0x04, 0, 0, 0, 0])
        .await;

    // liveness is owned by the keep-alive path; data traffic leaves it alone
    assert_eq!(connection.last_active_tick(), before);
}

#[tokio::test]
async fn ping_keep_alive_emits_and_expires() {
    let (connection, transport) = new_connection();
    connection.skip_negotiation().unwrap();
    connection
        .setup_keep_alive(None, Duration::from_millis(20), Duration::from_millis(120))
        .unwrap();

    // wait for a few pings
    tokio::time::sleep(Duration::from_millis(80)).await;
    let pings = transport
        .sent()
        .into_iter()
        .filter(|d| d == &vec![0x02])
        .count();
    assert!(pings >= 1, "expected at least one keep-alive ping");

    // with nothing inbound the connection eventually expires
    for _ in 0..100 {
        if connection.state() == ConnectionState::Dead {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(connection.state(), ConnectionState::Dead);
}

#[tokio::test]
async fn dead_detection_thresholds() {
    let (connection, _transport) = new_connection();
    connection.skip_negotiation().unwrap();

    assert!(!connection.try_set_to_dead(connection.last_active_tick()));
    assert!(connection.try_set_to_dead(time::now_tick() + 1));
    assert_eq!(connection.state(), ConnectionState::Dead);

    // terminal short-circuit
    assert!(connection.try_set_to_dead(0));
}

#[tokio::test]
async fn reset_from_remote_suppresses_farewell() {
    let (connection, transport) = new_connection();
    connection.skip_negotiation().unwrap();

    connection.input_packet(&[0xFF]).await;
    assert_eq!(connection.state(), ConnectionState::Dead);

    connection.dispose_async().await;
    assert!(
        transport.sent().iter().all(|d| d != &vec![0xFF]),
        "no reset may be emitted after receiving one"
    );
}

#[tokio::test]
async fn dispose_async_emits_single_farewell() {
    let (connection, transport) = new_connection();
    connection.skip_negotiation().unwrap();

    connection.dispose_async().await;
    connection.dispose_async().await;

    let resets = transport
        .sent()
        .into_iter()
        .filter(|d| d == &vec![0xFF])
        .count();
    assert_eq!(resets, 1);
    assert!(connection.is_disposed());
}

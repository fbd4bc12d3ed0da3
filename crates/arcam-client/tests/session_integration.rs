//! Integration tests for the session and dispatcher against the emulated
//! receiver over real TCP.
//!
//! # Purpose
//!
//! These tests use only the public API, the same way the `arcam` binary does.
//! They verify:
//!
//! - The happy path: exact wire bytes, typed helpers end to end.
//! - Correlation: unsolicited pushes interleaved with responses, duplicate
//!   requests under both policies.
//! - Failure paths: silent receiver (timeout, no stale entry), receiver going
//!   away (every pending request fails), zone-1-only commands.
//!
//! Timeouts are kept short so the suite stays fast; spacing is disabled
//! unless a test is about spacing.

use std::time::Duration;

use arcam_client::{
    ClientError, DispatchConfig, Dispatcher, DuplicatePolicy, FakeDevice, Reply, Session, SessionConfig,
    SessionEvent, SessionState,
};
use arcam_core::{AnswerCode, CommandCode, RequestPacket, ResponsePacket, SourceCode, Zone, QUERY};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn fast_config() -> SessionConfig {
    SessionConfig {
        request_timeout: Duration::from_millis(200),
        request_spacing: Duration::ZERO,
        heartbeat_interval: None,
        ..SessionConfig::default()
    }
}

// ── Wire level ────────────────────────────────────────────────────────────────

/// Setting zone 1 volume to 50 is the byte sequence from the protocol
/// documentation, and so is the answer.
#[tokio::test]
async fn test_volume_50_wire_bytes() {
    // Arrange
    let device = FakeDevice::with_standard_handlers().bind("127.0.0.1:0").await.expect("bind");
    let mut stream = TcpStream::connect(device.local_addr()).await.expect("connect");

    // Act
    stream.write_all(&[0x21, 0x01, 0x0D, 0x01, 0x32, 0x0D]).await.expect("write");
    let mut reply = [0u8; 7];
    stream.read_exact(&mut reply).await.expect("read");

    // Assert
    assert_eq!(reply, [0x21, 0x01, 0x0D, 0x00, 0x01, 0x32, 0x0D]);
    device.stop().await;
}

// ── Correlation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_request_resolves_over_tcp() {
    let device = FakeDevice::with_standard_handlers().bind("127.0.0.1:0").await.expect("bind");
    let session = Session::connect(&device.local_addr().to_string(), fast_config())
        .await
        .expect("connect");

    let response = session
        .send(RequestPacket::new(Zone::MAIN, CommandCode::VOLUME, vec![50]))
        .await
        .expect("response");

    assert_eq!(response, ResponsePacket::status_update(Zone::MAIN, CommandCode::VOLUME, vec![50]));
    session.close().await;
    device.stop().await;
}

/// A status push from the receiver reaches subscribers and does not disturb
/// the request that follows it.
#[tokio::test]
async fn test_unsolicited_push_reaches_subscribers() {
    // Arrange
    let fake = FakeDevice::with_standard_handlers();
    let device = fake.clone().bind("127.0.0.1:0").await.expect("bind");
    let session = Session::connect(&device.local_addr().to_string(), fast_config())
        .await
        .expect("connect");
    let mut events = session.subscribe();
    let push = ResponsePacket::status_update(Zone::MAIN, CommandCode::MUTE, vec![0]);

    // The server subscribes its connection task right after accept.
    let mut delivered = 0;
    for _ in 0..50 {
        delivered = fake.push(push.clone());
        if delivered > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(delivered, 1);

    // Act
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event in time")
        .expect("event");
    let volume = session
        .send(RequestPacket::query(Zone::MAIN, CommandCode::VOLUME))
        .await
        .expect("volume");

    // Assert
    assert_eq!(event, SessionEvent::Unsolicited(push));
    assert_eq!(volume.data, vec![10]);
    session.close().await;
    device.stop().await;
}

#[tokio::test]
async fn test_duplicate_request_is_rejected_while_first_in_flight() {
    // Arrange: the receiver never answers mute queries.
    let fake = FakeDevice::new();
    fake.register(Zone::MAIN, CommandCode::MUTE, None, |_| Reply::Silent);
    let device = fake.bind("127.0.0.1:0").await.expect("bind");
    let session = Session::connect(&device.local_addr().to_string(), fast_config())
        .await
        .expect("connect");
    let query = RequestPacket::query(Zone::MAIN, CommandCode::MUTE);

    // Act
    let (first, second) = tokio::join!(session.send(query.clone()), session.send(query.clone()));

    // Assert
    assert!(matches!(first, Err(ClientError::Timeout { .. })));
    assert!(matches!(second, Err(ClientError::DuplicateInFlight { key }) if key == query.key()));
    session.close().await;
    device.stop().await;
}

#[tokio::test]
async fn test_queue_policy_answers_duplicates_in_order() {
    let device = FakeDevice::with_standard_handlers().bind("127.0.0.1:0").await.expect("bind");
    let config = SessionConfig {
        duplicate_policy: DuplicatePolicy::Queue,
        ..fast_config()
    };
    let session = Session::connect(&device.local_addr().to_string(), config)
        .await
        .expect("connect");

    let (first, second) = tokio::join!(
        session.send(RequestPacket::new(Zone::MAIN, CommandCode::VOLUME, vec![20])),
        session.send(RequestPacket::new(Zone::MAIN, CommandCode::VOLUME, vec![30])),
    );

    assert_eq!(first.expect("first").data, vec![20]);
    assert_eq!(second.expect("second").data, vec![30]);
    session.close().await;
    device.stop().await;
}

// ── Failure paths ─────────────────────────────────────────────────────────────

/// A silent receiver produces a timeout, and the key is usable again
/// afterwards.
#[tokio::test]
async fn test_timeout_leaves_key_reusable() {
    // Arrange
    let fake = FakeDevice::new();
    fake.register(Zone::MAIN, CommandCode::POWER, None, |_| Reply::Silent);
    let device = fake.clone().bind("127.0.0.1:0").await.expect("bind");
    let session = Session::connect(&device.local_addr().to_string(), fast_config())
        .await
        .expect("connect");
    let query = RequestPacket::query(Zone::MAIN, CommandCode::POWER);

    // Act
    let first = session.send(query.clone()).await;
    fake.register(Zone::MAIN, CommandCode::POWER, None, |_| Reply::Data(vec![1]));
    let second = session.send(query.clone()).await;

    // Assert
    assert_eq!(first, Err(ClientError::Timeout { key: query.key() }));
    assert_eq!(second.expect("second").data, vec![1]);
    session.close().await;
    device.stop().await;
}

#[tokio::test]
async fn test_receiver_going_away_fails_pending_request() {
    // Arrange
    let fake = FakeDevice::new();
    fake.register(Zone::MAIN, CommandCode::VOLUME, None, |_| Reply::Silent);
    let device = fake.bind("127.0.0.1:0").await.expect("bind");
    let config = SessionConfig {
        request_timeout: Duration::from_secs(5),
        ..fast_config()
    };
    let session = Session::connect(&device.local_addr().to_string(), config)
        .await
        .expect("connect");
    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.send(RequestPacket::query(Zone::MAIN, CommandCode::VOLUME)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Act
    device.stop().await;
    let result = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("pending request finished")
        .expect("task");
    session.closed().await;

    // Assert
    assert_eq!(result, Err(ClientError::ConnectionClosed));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_heartbeat_replies_are_not_broadcast() {
    // Arrange
    let device = FakeDevice::with_standard_handlers().bind("127.0.0.1:0").await.expect("bind");
    let config = SessionConfig {
        heartbeat_interval: Some(Duration::from_millis(50)),
        ..fast_config()
    };
    let session = Session::connect(&device.local_addr().to_string(), config)
        .await
        .expect("connect");
    let mut events = session.subscribe();

    // Act: several heartbeat intervals pass.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Assert
    assert!(session.is_open());
    assert!(events.try_recv().is_err());
    session.close().await;
    device.stop().await;
}

// ── Dispatcher end to end ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_dispatcher_helpers_against_fake_receiver() {
    // Arrange
    let device = FakeDevice::with_standard_handlers().bind("127.0.0.1:0").await.expect("bind");
    let session = Session::connect(&device.local_addr().to_string(), fast_config())
        .await
        .expect("connect");
    let avr = Dispatcher::new(session.clone(), DispatchConfig::default());

    // Act + Assert
    assert_eq!(avr.set_volume(Zone::MAIN, 50).await, Ok(50));
    assert_eq!(avr.volume(Zone::MAIN).await, Ok(50));
    assert_eq!(avr.volume_up(Zone::MAIN).await, Ok(51));
    assert_eq!(avr.volume_down(Zone::MAIN).await, Ok(50));
    assert_eq!(avr.volume(Zone::ZONE_2).await, Ok(10));
    assert_eq!(avr.power(Zone::MAIN).await, Ok(true));
    assert_eq!(avr.mute(Zone::MAIN).await, Ok(false));
    assert_eq!(avr.source(Zone::MAIN).await, Ok(SourceCode::Pvr));
    avr.set_source(Zone::MAIN, SourceCode::Bd).await.expect("set source");
    assert_eq!(avr.source(Zone::MAIN).await, Ok(SourceCode::Bd));
    assert_eq!(avr.software_version().await, Ok(vec![QUERY, 2, 4]));

    session.close().await;
    device.stop().await;
}

#[tokio::test]
async fn test_dispatcher_maps_refusals_to_errors() {
    // Arrange
    let device = FakeDevice::with_standard_handlers().bind("127.0.0.1:0").await.expect("bind");
    let session = Session::connect(&device.local_addr().to_string(), fast_config())
        .await
        .expect("connect");
    let avr = Dispatcher::new(session.clone(), DispatchConfig::default());

    // Act
    let out_of_range = avr.set_volume(Zone::MAIN, 120).await;
    let unknown = avr.request(Zone::MAIN, CommandCode::MENU, [QUERY]).await;
    let wrong_zone = avr.request(Zone::ZONE_2, CommandCode::SOFTWARE_VERSION, [QUERY]).await;

    // Assert
    assert!(matches!(
        out_of_range,
        Err(ClientError::Rejected { answer: AnswerCode::ParameterNotRecognised, .. })
    ));
    assert!(matches!(
        unknown,
        Err(ClientError::Rejected { answer: AnswerCode::CommandNotRecognised, .. })
    ));
    assert!(matches!(wrong_zone, Err(ClientError::UnsupportedZone { .. })));
    session.close().await;
    device.stop().await;
}

//! End-to-end tests over real TCP against an emulated MDC display.

mod common;

use std::sync::Arc;

use common::{Behavior, MdcDisplay};
use vwall_core::{
    Command, CommandDispatcher, CommandKind, EngineConfig, ErrorKind, FleetRegistry, InputSource,
    LinkState, PowerState, Reply, RetryPolicy, StatusAggregator, TransportConfig,
};

fn engine(read_timeout_ms: u64) -> EngineConfig {
    EngineConfig {
        transport: TransportConfig {
            connect_timeout_ms: 1_000,
            read_timeout_ms,
        },
        ..EngineConfig::default()
    }
}

async fn fleet(
    display: &MdcDisplay,
    config: &EngineConfig,
    retry: RetryPolicy,
) -> (Arc<FleetRegistry>, CommandDispatcher) {
    let registry = Arc::new(FleetRegistry::new(config, StatusAggregator::new()));
    registry.register(display.endpoint("wall-1")).await.unwrap();
    let dispatcher = CommandDispatcher::new(Arc::clone(&registry), retry);
    (registry, dispatcher)
}

// ── Round trips ──────────────────────────────────────────────────

#[tokio::test]
async fn test_commands_and_status_round_trip() {
    let display = MdcDisplay::spawn(1).await;
    let (registry, dispatcher) = fleet(&display, &engine(1_000), RetryPolicy::default()).await;

    let power = dispatcher
        .execute(Command::new("wall-1", CommandKind::Power(PowerState::On)))
        .await;
    assert_eq!(power.reply(), Some(&Reply::Ack(CommandKind::Power(PowerState::On))));
    assert_eq!(power.attempts, 1);

    let input = dispatcher
        .execute(Command::new("wall-1", CommandKind::Input(InputSource::DisplayPort)))
        .await;
    assert!(input.is_success());

    let status = dispatcher
        .execute(Command::new("wall-1", CommandKind::Status))
        .await;
    match status.reply() {
        Some(Reply::Status(report)) => {
            assert_eq!(report.power, Some(PowerState::On));
            assert_eq!(report.volume, Some(10));
            assert_eq!(report.input, Some(InputSource::DisplayPort));
        }
        other => panic!("expected a status reply, got {other:?}"),
    }

    // One kept-alive connection served all three commands.
    assert_eq!(display.connections(), 1);

    let snapshot = registry.status().get_snapshot();
    let entry = snapshot.get(&"wall-1".into()).unwrap();
    assert_eq!(entry.link, LinkState::Connected);
    assert_eq!(entry.values.power, Some(PowerState::On));
    assert!(entry.last_seen.is_some());
}

// ── Protocol errors ──────────────────────────────────────────────

#[tokio::test]
async fn test_corrupted_checksum_is_protocol_error() {
    let display = MdcDisplay::spawn(1).await;
    let (registry, dispatcher) = fleet(&display, &engine(1_000), RetryPolicy::default()).await;

    assert!(dispatcher.execute(Command::new("wall-1", CommandKind::Status)).await.is_success());

    display.set_behavior(Behavior::CorruptChecksum);
    let result = dispatcher
        .execute(Command::new("wall-1", CommandKind::Volume(30)))
        .await;
    assert_eq!(result.error().unwrap().kind, ErrorKind::Protocol);
    // Not retried, and the link is not blamed.
    assert_eq!(result.attempts, 1);

    let session = registry.session(&"wall-1".into()).unwrap();
    assert_eq!(session.failures().await, 0);
    assert_eq!(session.link_state().await, LinkState::Connected);

    display.set_behavior(Behavior::Normal);
    assert!(dispatcher.execute(Command::new("wall-1", CommandKind::Status)).await.is_success());
}

#[tokio::test]
async fn test_nak_is_protocol_error() {
    let display = MdcDisplay::spawn(1).await;
    display.set_behavior(Behavior::Nak);
    let (_registry, dispatcher) = fleet(&display, &engine(1_000), RetryPolicy::default()).await;

    let result = dispatcher
        .execute(Command::new("wall-1", CommandKind::Power(PowerState::Off)))
        .await;
    assert_eq!(result.error().unwrap().kind, ErrorKind::Protocol);
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn test_wrong_mdc_id_is_protocol_error() {
    let display = MdcDisplay::spawn(7).await;
    let (_registry, dispatcher) = fleet(&display, &engine(1_000), RetryPolicy::default()).await;

    let result = dispatcher.execute(Command::new("wall-1", CommandKind::Status)).await;
    assert_eq!(result.error().unwrap().kind, ErrorKind::Protocol);
}

// ── Link failures ────────────────────────────────────────────────

#[tokio::test]
async fn test_silent_display_hits_threshold_then_reconnects_once() {
    let display = MdcDisplay::spawn(1).await;
    let (registry, dispatcher) = fleet(&display, &engine(100), RetryPolicy::none()).await;

    assert!(dispatcher.execute(Command::new("wall-1", CommandKind::Status)).await.is_success());
    let session = registry.session(&"wall-1".into()).unwrap();

    display.set_behavior(Behavior::Silent);
    for expected in [LinkState::Degraded, LinkState::Degraded, LinkState::Disconnected] {
        let result = dispatcher.execute(Command::new("wall-1", CommandKind::Status)).await;
        assert_eq!(result.error().unwrap().kind, ErrorKind::Timeout);
        assert_eq!(session.link_state().await, expected);
    }
    assert_eq!(session.failures().await, 3);

    display.set_behavior(Behavior::Normal);
    let before = display.connections();
    let result = dispatcher.execute(Command::new("wall-1", CommandKind::Status)).await;
    assert!(result.is_success());
    assert_eq!(display.connections(), before + 1);
    assert_eq!(session.link_state().await, LinkState::Connected);
    assert_eq!(session.failures().await, 0);
}

#[tokio::test]
async fn test_unreachable_display_fails_fast() {
    // Bind and drop to get a port nobody listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let registry = Arc::new(FleetRegistry::new(&engine(200), StatusAggregator::new()));
    registry
        .register(vwall_core::DisplayEndpoint::new(
            "ghost",
            "Ghost",
            vwall_core::ProtocolKind::BinaryTcp,
            format!("127.0.0.1:{port}"),
        ))
        .await
        .unwrap();
    let dispatcher = CommandDispatcher::new(Arc::clone(&registry), RetryPolicy::none());

    let result = dispatcher.execute(Command::new("ghost", CommandKind::Status)).await;
    assert!(result.error().unwrap().kind.is_retryable());
    let session = registry.session(&"ghost".into()).unwrap();
    assert_eq!(session.link_state().await, LinkState::Disconnected);
}

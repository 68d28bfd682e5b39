//! Dispatcher behaviour across several displays.

mod common;

use std::time::Duration;

use common::{Script, ScriptedFactory, scripted_fleet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vwall_core::{
    Command, CommandKind, DisplayId, ErrorKind, HealthMonitor, LinkState, PowerState, RetryPolicy,
    StatusEvent,
};

#[tokio::test(start_paused = true)]
async fn test_broadcast_time_is_bounded_by_slowest_display() {
    let factory = ScriptedFactory::default();
    let hang = Duration::from_secs(3);
    factory.set("slow-1", Script::Hang(hang));
    factory.set("slow-2", Script::Hang(hang));
    let retry = RetryPolicy::default();
    let (_registry, dispatcher) =
        scripted_fleet(&["fast", "slow-1", "slow-2"], &factory, retry.clone()).await;

    let started = Instant::now();
    let ids: Vec<DisplayId> = ["fast", "slow-1", "slow-2"].map(DisplayId::from).to_vec();
    let results = dispatcher
        .broadcast(&Command::new("fast", CommandKind::Volume(40)), &ids)
        .await;
    let elapsed = started.elapsed();

    // One display's full budget: every attempt hangs, plus backoff.
    let budget = hang * (retry.max_retries + 1) + retry.total_backoff();
    assert!(elapsed >= budget);
    assert!(elapsed < budget * 2, "took {elapsed:?}, budget {budget:?}");

    assert!(results[&DisplayId::from("fast")].is_success());
    for slow in ["slow-1", "slow-2"] {
        let result = &results[&DisplayId::from(slow)];
        assert_eq!(result.error().unwrap().kind, ErrorKind::Timeout);
        assert_eq!(result.attempts, retry.max_retries + 1);
    }
}

#[tokio::test]
async fn test_broadcast_never_fails_as_a_whole() {
    let factory = ScriptedFactory::default();
    factory.set("b", Script::LinkDown);
    let (_registry, dispatcher) = scripted_fleet(&["a", "b"], &factory, common::fast_retry()).await;

    let ids: Vec<DisplayId> = ["a", "b", "missing"].map(DisplayId::from).to_vec();
    let results = dispatcher.broadcast(&Command::new("a", CommandKind::Status), &ids).await;

    assert_eq!(results.len(), 3);
    assert!(results[&DisplayId::from("a")].is_success());
    assert_eq!(results[&DisplayId::from("b")].error().unwrap().kind, ErrorKind::Connection);
    assert_eq!(
        results[&DisplayId::from("missing")].error().unwrap().kind,
        ErrorKind::UnknownDisplay
    );
}

#[tokio::test]
async fn test_unknown_display_creates_nothing() {
    let factory = ScriptedFactory::default();
    let (registry, dispatcher) = scripted_fleet(&["a"], &factory, common::fast_retry()).await;

    let result = dispatcher.execute(Command::new("nope", CommandKind::Status)).await;
    assert_eq!(result.error().unwrap().kind, ErrorKind::UnknownDisplay);
    assert_eq!(result.attempts, 1);
    assert!(registry.session(&DisplayId::from("nope")).is_none());
    assert_eq!(factory.opens("nope"), 0);
}

#[tokio::test]
async fn test_threshold_then_exactly_one_reconnect() {
    let factory = ScriptedFactory::default();
    let (registry, dispatcher) = scripted_fleet(&["a"], &factory, RetryPolicy::none()).await;

    factory.set("a", Script::LinkDown);
    for _ in 0..3 {
        assert!(!dispatcher.execute(Command::new("a", CommandKind::Status)).await.is_success());
    }
    let session = registry.session(&DisplayId::from("a")).unwrap();
    assert_eq!(session.link_state().await, LinkState::Disconnected);
    assert_eq!(factory.opens("a"), 1);

    factory.set("a", Script::Healthy);
    let exchanges = factory.exchanges("a");
    assert!(dispatcher.execute(Command::new("a", CommandKind::Status)).await.is_success());
    assert_eq!(factory.opens("a"), 2);
    assert_eq!(factory.exchanges("a"), exchanges + 1);
}

#[tokio::test]
async fn test_reconnect_failure_is_returned_without_looping() {
    let factory = ScriptedFactory::default();
    factory.set("a", Script::Unreachable);
    let (registry, dispatcher) = scripted_fleet(&["a"], &factory, RetryPolicy::none()).await;

    let result = dispatcher.execute(Command::new("a", CommandKind::Status)).await;
    assert_eq!(result.error().unwrap().kind, ErrorKind::Connection);
    assert_eq!(factory.opens("a"), 1);
    assert_eq!(factory.exchanges("a"), 0);
    let session = registry.session(&DisplayId::from("a")).unwrap();
    assert_eq!(session.link_state().await, LinkState::Disconnected);
}

#[tokio::test]
async fn test_status_events_follow_the_state_machine() {
    let factory = ScriptedFactory::default();
    let (registry, dispatcher) = scripted_fleet(&["a"], &factory, RetryPolicy::none()).await;
    let (_, mut events) = registry.status().subscribe();

    assert!(dispatcher.execute(Command::new("a", CommandKind::Status)).await.is_success());
    factory.set("a", Script::LinkDown);
    dispatcher.execute(Command::new("a", CommandKind::Status)).await;

    let mut states = Vec::new();
    let mut contacts = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            StatusEvent::Link { state, .. } => states.push(state),
            StatusEvent::Contact { .. } => contacts += 1,
            StatusEvent::Removed { .. } => {}
        }
    }
    assert_eq!(
        states,
        vec![LinkState::Connecting, LinkState::Connected, LinkState::Degraded]
    );
    assert_eq!(contacts, 1);

    let entry = registry.status().display(&DisplayId::from("a")).unwrap();
    assert_eq!(entry.link, LinkState::Degraded);
    assert_eq!(entry.failures, 1);
}

#[tokio::test]
async fn test_removed_display_stops_being_retried() {
    let factory = ScriptedFactory::default();
    let (registry, dispatcher) = scripted_fleet(&["a"], &factory, common::fast_retry()).await;
    assert!(dispatcher.execute(Command::new("a", CommandKind::Status)).await.is_success());

    registry.remove(&DisplayId::from("a")).await.unwrap();
    let result = dispatcher.execute(Command::new("a", CommandKind::Status)).await;
    assert_eq!(result.error().unwrap().kind, ErrorKind::UnknownDisplay);
    assert!(registry.status().get_snapshot().is_empty());
}

#[tokio::test]
async fn test_health_poll_refreshes_snapshot() {
    let factory = ScriptedFactory::default();
    factory.set("b", Script::LinkDown);
    let (registry, dispatcher) = scripted_fleet(&["a", "b"], &factory, RetryPolicy::none()).await;

    let monitor = HealthMonitor::new(dispatcher, Duration::from_secs(30));
    let summary = monitor.poll_once().await;
    assert_eq!(summary.polled, 2);
    assert_eq!(summary.reachable, 1);

    let snapshot = registry.status().get_snapshot();
    let a = snapshot.get(&DisplayId::from("a")).unwrap();
    assert_eq!(a.link, LinkState::Connected);
    assert_eq!(a.values.power, Some(PowerState::On));
    assert_eq!(a.values.volume, Some(20));
    assert_eq!(snapshot.get(&DisplayId::from("b")).unwrap().link, LinkState::Degraded);
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_polls_until_cancelled() {
    let factory = ScriptedFactory::default();
    let (_registry, dispatcher) = scripted_fleet(&["a"], &factory, RetryPolicy::none()).await;

    let shutdown = CancellationToken::new();
    let handle = HealthMonitor::new(dispatcher, Duration::from_secs(30)).spawn(shutdown.clone());

    // Rounds at 0 s, 30 s and 60 s.
    tokio::time::sleep(Duration::from_secs(75)).await;
    assert_eq!(factory.exchanges("a"), 3);

    shutdown.cancel();
    handle.await.unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(factory.exchanges("a"), 3);
}

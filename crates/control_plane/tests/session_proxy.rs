//! End-to-end behavior of the session layer over a scripted connector:
//! FIFO serialization, registration lifecycle, degrade/recover, backoff,
//! and result publication to the hub.

mod support;

use control_plane::{
    BackendConfig, BackoffPolicy, BroadcastHub, CommandOutcome, HubSettings, LinkState,
    ProxyError, ProxyEvent, SessionManager,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{CommandScript, ConnectScript, FakeConnector, FakeHandle};

fn manager() -> (Arc<SessionManager<FakeConnector>>, FakeHandle) {
    let connector = FakeConnector::new();
    let handle = connector.handle();
    let hub = Arc::new(BroadcastHub::new(HubSettings::default()));
    (Arc::new(SessionManager::new(connector, hub)), handle)
}

/// Config whose poller is effectively parked, for tests that drive the
/// execute path by hand.
fn quiet_config() -> BackendConfig {
    let mut config = BackendConfig::new("backend.test", 25575, "secret");
    config.poll_interval_ms = 60_000;
    config
}

/// Config tuned for poller tests: fast cadence, negligible backoff.
fn polling_config() -> BackendConfig {
    let mut config = BackendConfig::new("backend.test", 25575, "secret");
    config.poll_interval_ms = 30;
    config.backoff = BackoffPolicy { base_ms: 1, cap_ms: 2 };
    config
}

async fn wait_for(
    manager: &SessionManager<FakeConnector>,
    identity: &str,
    mut condition: impl FnMut(&control_plane::StatusSnapshot) -> bool,
) -> control_plane::StatusSnapshot {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = manager.current_state(identity).expect("backend registered");
        if condition(&snapshot) {
            return snapshot;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for condition; last snapshot: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_commands_serialize_fifo_per_backend() {
    let (manager, handle) = manager();
    handle.reply_with("done", Duration::from_millis(100));
    manager.register("b1", quiet_config()).expect("register");

    let started = Instant::now();
    let mut tasks = Vec::new();
    for name in ["first", "second", "third"] {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            manager.execute("b1", name, name).await
        }));
        // Stagger the submissions so the queue order is deterministic.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for task in tasks {
        let result = task.await.expect("task").expect("known backend");
        assert!(
            matches!(result.outcome, CommandOutcome::Success { .. }),
            "unexpected outcome: {:?}",
            result.outcome
        );
    }

    // Three 100ms exchanges on one backend cannot overlap.
    assert!(
        started.elapsed() >= Duration::from_millis(290),
        "commands overlapped: {:?}",
        started.elapsed()
    );
    assert_eq!(handle.executed(), vec!["first", "second", "third"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn registration_lifecycle_and_poller_shutdown() {
    let (manager, handle) = manager();
    handle.reply_with(
        "There are 0 of a max of 20 players online:",
        Duration::ZERO,
    );
    manager.register("b1", polling_config()).expect("register");
    assert_eq!(manager.backend_count(), 1);

    assert_eq!(
        manager.register("b1", polling_config()),
        Err(ProxyError::DuplicateBackend("b1".to_string()))
    );

    // The poller publishes snapshots on its own cadence.
    let mut observer = manager.hub().subscribe();
    let event = tokio::time::timeout(Duration::from_secs(2), observer.recv())
        .await
        .expect("a status event within two seconds")
        .expect("hub open");
    assert!(matches!(event, ProxyEvent::Status(_)));

    manager.deregister("b1").await.expect("deregister");
    assert_eq!(manager.backend_count(), 0);
    assert_eq!(
        manager.deregister("b1").await,
        Err(ProxyError::UnknownBackend("b1".to_string()))
    );

    // No snapshots may be published after removal.
    let mut late_observer = manager.hub().subscribe();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(late_observer.try_recv().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_probe_failures_degrade_then_recover() {
    let (manager, handle) = manager();
    handle.set_default_connect(ConnectScript::RefuseConnect);
    manager.register("b1", polling_config()).expect("register");

    let degraded = wait_for(&manager, "b1", |s| s.state == LinkState::Degraded).await;
    assert!(degraded.consecutive_failures >= 3);
    assert!(degraded.last_success_ms.is_none());

    // The backend comes back; one successful probe resets the count.
    handle.set_default_connect(ConnectScript::Accept);
    handle.reply_with(
        "There are 2 of a max of 20 players online: alice, bob",
        Duration::ZERO,
    );

    let recovered = wait_for(&manager, "b1", |s| s.state == LinkState::Ready).await;
    assert_eq!(recovered.consecutive_failures, 0);
    assert_eq!(recovered.players_online, Some(2));
    assert!(recovered.last_success_ms.is_some());
    assert!(recovered.probe_latency_ms.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_backend_fails_fast_without_touching_the_network() {
    let (manager, handle) = manager();

    let started = Instant::now();
    let error = manager
        .execute("ghost", "say hi", "c1")
        .await
        .expect_err("unregistered backend");

    assert_eq!(error, ProxyError::UnknownBackend("ghost".to_string()));
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(handle.connect_attempts(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_backend_fails_promptly_and_enters_backoff() {
    let (manager, handle) = manager();
    handle.set_default_connect(ConnectScript::RefuseConnect);

    let mut config = quiet_config();
    // A wide backoff window so the second command observes the gate.
    config.backoff = BackoffPolicy { base_ms: 10_000, cap_ms: 30_000 };
    manager.register("b1", config).expect("register");

    let result = manager.execute("b1", "say hi", "c1").await.expect("result");
    match &result.outcome {
        CommandOutcome::Failure { kind, .. } => assert_eq!(kind, "connect"),
        other => panic!("expected connect failure, got {other:?}"),
    }
    let snapshot = manager.current_state("b1").expect("registered");
    assert_eq!(snapshot.consecutive_failures, 1);

    // While the gate is closed, commands fail immediately instead of
    // re-dialing the dead backend.
    let result = manager.execute("b1", "say hi", "c2").await.expect("result");
    match &result.outcome {
        CommandOutcome::Failure { kind, .. } => assert_eq!(kind, "backoff"),
        other => panic!("expected backoff failure, got {other:?}"),
    }
    assert_eq!(handle.connect_attempts(), 1);

    // One dead backend never poisons the rest of the manager.
    handle.script_connect(ConnectScript::Accept);
    manager.register("b2", quiet_config()).expect("register");
    let result = manager.execute("b2", "say hi", "c3").await.expect("result");
    assert!(matches!(result.outcome, CommandOutcome::Success { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn auth_refusal_is_reported_as_auth_failure() {
    let (manager, handle) = manager();
    handle.script_connect(ConnectScript::RefuseAuth);
    manager.register("b1", quiet_config()).expect("register");

    let result = manager.execute("b1", "say hi", "c1").await.expect("result");
    match &result.outcome {
        CommandOutcome::Failure { kind, .. } => assert_eq!(kind, "auth"),
        other => panic!("expected auth failure, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn command_timeout_surfaces_as_timeout_outcome() {
    let (manager, handle) = manager();
    handle.script_command(CommandScript::TimeOut);
    manager.register("b1", quiet_config()).expect("register");

    let result = manager.execute("b1", "say hi", "c1").await.expect("result");
    assert_eq!(result.outcome, CommandOutcome::Timeout);
    let snapshot = manager.current_state("b1").expect("registered");
    assert_eq!(snapshot.consecutive_failures, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn deregistration_cancels_in_flight_and_queued_commands() {
    let (manager, handle) = manager();
    handle.reply_with("slow", Duration::from_millis(500));
    manager.register("b1", quiet_config()).expect("register");

    let in_flight = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.execute("b1", "long running", "c1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let queued = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.execute("b1", "queued", "c2").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let removal_started = Instant::now();
    manager.deregister("b1").await.expect("deregister");

    let in_flight = in_flight.await.expect("task");
    let queued = queued.await.expect("task");
    assert_eq!(in_flight, Err(ProxyError::BackendRemoved("b1".to_string())));
    assert_eq!(queued, Err(ProxyError::BackendRemoved("b1".to_string())));

    // Cancellation is prompt, not "after the 500ms exchange finishes".
    assert!(
        removal_started.elapsed() < Duration::from_millis(250),
        "deregistration waited out the in-flight command: {:?}",
        removal_started.elapsed()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn command_results_are_published_to_the_hub() {
    let (manager, handle) = manager();
    handle.reply_with("pong", Duration::ZERO);
    manager.register("b1", quiet_config()).expect("register");

    let mut observer = manager.hub().subscribe();
    let result = manager.execute("b1", "ping", "c-42").await.expect("result");
    assert!(matches!(result.outcome, CommandOutcome::Success { .. }));

    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), observer.recv())
            .await
            .expect("an event within two seconds")
            .expect("hub open");
        if let ProxyEvent::Command(published) = event {
            assert_eq!(published.correlation_id, "c-42");
            assert_eq!(published.backend, "b1");
            assert_eq!(
                published.outcome,
                CommandOutcome::Success { payload: "pong".to_string() }
            );
            break;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn list_players_goes_through_the_ordinary_execute_path() {
    let (manager, handle) = manager();
    handle.reply_with(
        "There are 2 of a max of 20 players online: alice, bob",
        Duration::ZERO,
    );
    manager.register("b1", quiet_config()).expect("register");

    let players = manager.list_players("b1").await.expect("known backend");
    assert_eq!(players, Some(vec!["alice".to_string(), "bob".to_string()]));
    assert_eq!(handle.executed(), vec!["list"]);

    let snapshots = manager.list_servers();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].backend, "b1");
    assert_eq!(snapshots[0].state, LinkState::Ready);
}

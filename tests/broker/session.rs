use std::sync::Arc;

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Duration, Instant, timeout},
};
use tokio_util::sync::CancellationToken;

use porichoy::{
    broker::{
        ActionCompletion, ActionTracker, BrokerSession, SessionConfig, SessionError,
        SessionErrorKind, SessionEvent, SessionState,
    },
    dispatch::SubscriptionTable,
    testing::{
        RecordingActionObserver, RecordingHandler, ScriptedReply, ScriptedTransport, TransportCall,
    },
    types::{InboundMessage, QoS},
};

struct Harness {
    transport: Arc<ScriptedTransport>,
    observer: Arc<RecordingActionObserver>,
    state: watch::Receiver<SessionState>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), SessionError>>,
    _inbound: mpsc::Receiver<InboundMessage>,
}

fn session_config(reconnect_delay: Duration) -> SessionConfig {
    SessionConfig {
        address: "broker.test:1883".to_string(),
        client_id: "Porichoy_Cloud".to_string(),
        keep_alive: Duration::from_secs(60),
        clean_session: true,
        reconnect_delay,
    }
}

fn image_table() -> Arc<SubscriptionTable> {
    let mut table = SubscriptionTable::new();
    table
        .register("Image", QoS::AtLeastOnce, Arc::new(RecordingHandler::default()))
        .expect("registration should succeed");
    Arc::new(table)
}

fn start(reconnect_delay: Duration, script: impl FnOnce(&ScriptedTransport)) -> Harness {
    let (transport, session_rx, inbound_rx) = ScriptedTransport::wired(4);
    script(&transport);
    let observer = Arc::new(RecordingActionObserver::default());
    let tracker = Arc::new(ActionTracker::new(observer.clone()));
    start_with(transport, session_rx, inbound_rx, tracker, observer, reconnect_delay)
}

fn start_with(
    transport: Arc<ScriptedTransport>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    tracker: Arc<ActionTracker>,
    observer: Arc<RecordingActionObserver>,
    reconnect_delay: Duration,
) -> Harness {
    let session = BrokerSession::new(
        session_config(reconnect_delay),
        transport.clone(),
        tracker,
        image_table(),
        session_rx,
    )
    .expect("session config should be valid");
    let state = session.state();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(session.run(shutdown.clone()));
    Harness {
        transport,
        observer,
        state,
        shutdown,
        task,
        _inbound: inbound_rx,
    }
}

async fn wait_for_state(state: &mut watch::Receiver<SessionState>, target: SessionState) {
    timeout(Duration::from_secs(3), state.wait_for(|current| *current == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {target}"))
        .expect("session state channel should stay open");
}

async fn stop(harness: Harness) -> Result<(), SessionError> {
    harness.shutdown.cancel();
    timeout(Duration::from_secs(3), harness.task)
        .await
        .expect("session should stop promptly")
        .expect("session task should not panic")
}

#[tokio::test]
async fn ready_only_after_every_subscription_completes() {
    let mut harness = start(Duration::from_millis(50), |transport| {
        transport.script_subscribes([ScriptedReply::Silent]);
    });

    wait_for_state(&mut harness.state, SessionState::Subscribing).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*harness.state.borrow(), SessionState::Subscribing);

    let subscribe_id = harness
        .transport
        .calls()
        .into_iter()
        .find_map(|call| match call {
            TransportCall::Subscribe { action_id, qos, .. } => {
                assert_eq!(qos, QoS::AtLeastOnce);
                Some(action_id)
            }
            _ => None,
        })
        .expect("subscribe should be issued");
    harness
        .transport
        .complete(ActionCompletion::success(subscribe_id).with_topic("Image"));

    wait_for_state(&mut harness.state, SessionState::Ready).await;
    assert_eq!(harness.transport.subscribed_topics(), vec!["Image".to_string()]);
    stop(harness).await.expect("clean shutdown");
}

#[tokio::test]
async fn subscribe_failure_is_reported_but_session_still_becomes_ready() {
    let mut harness = start(Duration::from_millis(50), |transport| {
        transport.script_subscribes([ScriptedReply::Refuse("not authorized".to_string())]);
    });

    wait_for_state(&mut harness.state, SessionState::Ready).await;
    let failures = harness.observer.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].1.contains("not authorized"));
    stop(harness).await.expect("clean shutdown");
}

#[tokio::test]
async fn refused_connect_is_retried_after_the_configured_delay() {
    let delay = Duration::from_millis(150);
    let started = Instant::now();
    let mut harness = start(delay, |transport| {
        transport.script_connects([ScriptedReply::Refuse("server unavailable".to_string())]);
    });

    wait_for_state(&mut harness.state, SessionState::Ready).await;
    assert!(started.elapsed() >= delay, "reconnect must wait for the delay");
    assert_eq!(harness.transport.connect_count(), 2);
    stop(harness).await.expect("clean shutdown");
}

#[tokio::test]
async fn lost_connection_reconnects_and_resubscribes() {
    let mut harness = start(Duration::from_millis(200), |_| {});
    wait_for_state(&mut harness.state, SessionState::Ready).await;

    harness.transport.lose_connection("connection reset by peer");
    wait_for_state(&mut harness.state, SessionState::Disconnected).await;
    assert_eq!(harness.transport.connect_count(), 1);

    wait_for_state(&mut harness.state, SessionState::Ready).await;
    assert_eq!(harness.transport.connect_count(), 2);
    assert_eq!(
        harness.transport.subscribed_topics(),
        vec!["Image".to_string(), "Image".to_string()]
    );
    stop(harness).await.expect("clean shutdown");
}

#[tokio::test]
async fn stale_connect_completion_does_not_change_state() {
    let mut harness = start(Duration::from_millis(50), |_| {});
    wait_for_state(&mut harness.state, SessionState::Ready).await;

    let first_connect = harness.transport.connect_action_ids()[0];
    harness
        .transport
        .complete(ActionCompletion::failure(first_connect, "late refusal"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*harness.state.borrow(), SessionState::Ready);
    assert_eq!(harness.transport.connect_count(), 1);
    stop(harness).await.expect("clean shutdown");
}

#[tokio::test]
async fn connect_call_error_is_fatal() {
    let harness = start(Duration::from_millis(50), |transport| {
        transport.set_fail_connect_call(true);
    });

    let err = timeout(Duration::from_secs(3), harness.task)
        .await
        .expect("session should end")
        .expect("session task should not panic")
        .expect_err("connect call failure must be fatal");
    assert_eq!(err.kind, SessionErrorKind::Fatal);
    assert!(err.message.contains("broker.test:1883"));
    assert_eq!(harness.observer.failures().len(), 1);
}

#[tokio::test]
async fn shutdown_cancels_a_pending_reconnect_wait() {
    let mut harness = start(Duration::from_secs(30), |transport| {
        transport.script_connects([ScriptedReply::Refuse("server unavailable".to_string())]);
    });
    wait_for_state(&mut harness.state, SessionState::Disconnected).await;

    let transport = harness.transport.clone();
    let mut state = harness.state.clone();
    stop(harness).await.expect("shutdown during reconnect wait is clean");

    assert_eq!(*state.borrow_and_update(), SessionState::Terminated);
    assert_eq!(transport.connect_count(), 1, "no connect after shutdown");
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test]
async fn disconnect_failure_on_shutdown_is_fatal() {
    let mut harness = start(Duration::from_millis(50), |transport| {
        transport.set_fail_disconnect(true);
    });
    wait_for_state(&mut harness.state, SessionState::Ready).await;

    let err = stop(harness)
        .await
        .expect_err("disconnect failure must surface");
    assert_eq!(err.kind, SessionErrorKind::Fatal);
}

#[tokio::test]
async fn closed_event_channel_is_fatal() {
    let (transport, session_rx, inbound_rx) = ScriptedTransport::wired(4);
    let observer = Arc::new(RecordingActionObserver::default());
    let tracker = Arc::new(ActionTracker::new(observer.clone()));
    // Dropping every sender closes the event channel.
    drop(transport);
    let (stand_in, _unused_rx, _unused_inbound) = ScriptedTransport::wired(1);

    let harness = start_with(
        stand_in,
        session_rx,
        inbound_rx,
        tracker,
        observer,
        Duration::from_millis(50),
    );
    let err = timeout(Duration::from_secs(3), harness.task)
        .await
        .expect("session should end")
        .expect("session task should not panic")
        .expect_err("closed event channel must be fatal");
    assert_eq!(err.kind, SessionErrorKind::Fatal);
}

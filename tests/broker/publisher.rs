use std::sync::Arc;

use bytes::Bytes;

use porichoy::{
    broker::{ActionCompletion, ActionTracker, BrokerPublisher},
    testing::{RecordingActionObserver, ScriptedTransport},
    types::QoS,
};

fn publisher() -> (
    BrokerPublisher,
    Arc<ScriptedTransport>,
    Arc<ActionTracker>,
    Arc<RecordingActionObserver>,
) {
    let (transport, _session_rx, _inbound_rx) = ScriptedTransport::wired(1);
    let observer = Arc::new(RecordingActionObserver::default());
    let tracker = Arc::new(ActionTracker::new(observer.clone()));
    let publisher = BrokerPublisher::new(transport.clone(), tracker.clone());
    (publisher, transport, tracker, observer)
}

#[tokio::test]
async fn publish_is_tracked_until_the_broker_confirms() {
    let (publisher, transport, tracker, observer) = publisher();
    transport.set_auto_complete_publishes(false);

    let action_id = publisher
        .publish("Result", QoS::AtLeastOnce, Bytes::from_static(b"alice"))
        .await;
    assert!(tracker.is_pending(action_id));
    assert_eq!(
        transport.published(),
        vec![("Result".to_string(), QoS::AtLeastOnce, "alice".to_string())]
    );

    let resolved = tracker
        .resolve(ActionCompletion::success(action_id).with_message_id(12))
        .expect("pending publish resolves");
    assert_eq!(resolved.completion.message_id, Some(12));
    assert_eq!(observer.successes(), vec![action_id]);
    assert_eq!(tracker.outstanding(), 0);
}

#[tokio::test]
async fn publish_that_cannot_be_issued_fails_its_action() {
    let (publisher, transport, tracker, observer) = publisher();
    transport.set_fail_publish_call(true);

    let action_id = publisher
        .publish("Result", QoS::AtMostOnce, Bytes::from_static(b"No match found"))
        .await;

    assert!(!tracker.is_pending(action_id));
    let failures = observer.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, action_id);
    assert!(failures[0].1.contains("Result"));
}

#[tokio::test]
async fn abandoning_resolves_every_outstanding_publish() {
    let (publisher, transport, tracker, observer) = publisher();
    transport.set_auto_complete_publishes(false);

    let first = publisher
        .publish("Result", QoS::AtLeastOnce, Bytes::from_static(b"a"))
        .await;
    let second = publisher
        .publish("Result", QoS::ExactlyOnce, Bytes::from_static(b"b"))
        .await;

    let abandoned = tracker.abandon_all("session terminated");
    assert_eq!(abandoned.len(), 2);
    let failed: Vec<_> = observer.failures().into_iter().map(|(id, _)| id).collect();
    assert_eq!(failed, vec![first, second]);
    assert_eq!(tracker.outstanding(), 0);
}

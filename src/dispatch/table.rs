use std::{collections::BTreeMap, sync::Arc};

use crate::{
    broker::{
        actions::{ActionId, ActionKind, ActionTracker},
        ports::BrokerTransport,
    },
    dispatch::{
        error::{DispatchError, registration_invalid, topic_conflict},
        ports::TopicHandler,
    },
    types::QoS,
};

struct SubscriptionEntry {
    qos: QoS,
    handler: Arc<dyn TopicHandler>,
}

/// Topic name to handler mapping, populated once at startup.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: BTreeMap<String, SubscriptionEntry>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        topic: impl Into<String>,
        qos: QoS,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<(), DispatchError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(registration_invalid("topic name cannot be empty"));
        }
        if topic.contains(['+', '#']) {
            return Err(registration_invalid(format!(
                "topic '{topic}' contains a wildcard; only exact topic names are routable"
            )));
        }
        if self.entries.contains_key(&topic) {
            return Err(topic_conflict(format!("topic already registered: {topic}")));
        }

        self.entries.insert(topic, SubscriptionEntry { qos, handler });
        Ok(())
    }

    pub fn resolve(&self, topic: &str) -> Option<Arc<dyn TopicHandler>> {
        self.entries
            .get(topic)
            .map(|entry| Arc::clone(&entry.handler))
    }

    pub fn topics(&self) -> impl Iterator<Item = (&str, QoS)> {
        self.entries
            .iter()
            .map(|(topic, entry)| (topic.as_str(), entry.qos))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Issues one tracked subscribe per table entry and returns the action ids.
///
/// Requests the transport refuses to issue are resolved as failed right away.
pub async fn issue_subscriptions(
    table: &SubscriptionTable,
    transport: &dyn BrokerTransport,
    tracker: &ActionTracker,
) -> Vec<ActionId> {
    let mut issued = Vec::with_capacity(table.len());
    for (topic, qos) in table.topics() {
        let action_id = tracker.begin(ActionKind::Subscribe, "Subscription", Some(topic));
        tracing::info!(
            target: "dispatch",
            topic = %topic,
            qos = qos.level(),
            action_id = action_id.0,
            "subscribe_issued"
        );
        if let Err(err) = transport.subscribe(topic, qos, action_id).await {
            tracker.fail(action_id, format!("subscribe to '{topic}' not issued: {err}"));
        }
        issued.push(action_id);
    }
    issued
}

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;

use crate::{broker::ports::BrokerTransport, types::QoS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Connect,
    Subscribe,
    Publish,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Connect => "connect",
            ActionKind::Subscribe => "subscribe",
            ActionKind::Publish => "publish",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub id: ActionId,
    pub kind: ActionKind,
    pub label: String,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    Failure { reason: String },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCompletion {
    pub action_id: ActionId,
    pub outcome: ActionOutcome,
    pub message_id: Option<u16>,
    pub topics: Vec<String>,
}

impl ActionCompletion {
    pub fn success(action_id: ActionId) -> Self {
        Self {
            action_id,
            outcome: ActionOutcome::Success,
            message_id: None,
            topics: Vec::new(),
        }
    }

    pub fn failure(action_id: ActionId, reason: impl Into<String>) -> Self {
        Self {
            action_id,
            outcome: ActionOutcome::Failure {
                reason: reason.into(),
            },
            message_id: None,
            topics: Vec::new(),
        }
    }

    pub fn with_message_id(mut self, message_id: u16) -> Self {
        self.message_id = (message_id != 0).then_some(message_id);
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAction {
    pub action: PendingAction,
    pub completion: ActionCompletion,
}

/// Passive observer of action outcomes. Must not block.
pub trait ActionObserver: Send + Sync {
    fn on_success(&self, action: &PendingAction, completion: &ActionCompletion);

    fn on_failure(&self, action: &PendingAction, completion: &ActionCompletion, reason: &str);
}

pub struct TracingActionObserver;

impl ActionObserver for TracingActionObserver {
    fn on_success(&self, action: &PendingAction, completion: &ActionCompletion) {
        tracing::info!(
            target: "actions",
            action_id = action.id.0,
            kind = action.kind.as_str(),
            label = %action.label,
            message_id = ?completion.message_id,
            topic = completion.topics.first().map(String::as_str).unwrap_or(""),
            "action_succeeded"
        );
    }

    fn on_failure(&self, action: &PendingAction, completion: &ActionCompletion, reason: &str) {
        tracing::warn!(
            target: "actions",
            action_id = action.id.0,
            kind = action.kind.as_str(),
            label = %action.label,
            message_id = ?completion.message_id,
            reason = %reason,
            "action_failed"
        );
    }
}

/// Correlates asynchronous broker completions with the actions that caused them.
///
/// Resolution removes the pending entry, so an action resolves at most once;
/// [`ActionTracker::abandon_all`] guarantees it resolves at least once.
pub struct ActionTracker {
    next_id: AtomicU64,
    pending: Mutex<BTreeMap<ActionId, PendingAction>>,
    observer: Arc<dyn ActionObserver>,
}

impl ActionTracker {
    pub fn new(observer: Arc<dyn ActionObserver>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(BTreeMap::new()),
            observer,
        }
    }

    pub fn begin(
        &self,
        kind: ActionKind,
        label: impl Into<String>,
        topic: Option<&str>,
    ) -> ActionId {
        let id = ActionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let action = PendingAction {
            id,
            kind,
            label: label.into(),
            topic: topic.map(str::to_string),
        };
        tracing::debug!(
            target: "actions",
            action_id = id.0,
            kind = kind.as_str(),
            label = %action.label,
            "action_issued"
        );
        self.pending.lock().expect("lock poisoned").insert(id, action);
        id
    }

    pub fn resolve(&self, completion: ActionCompletion) -> Option<ResolvedAction> {
        let removed = self
            .pending
            .lock()
            .expect("lock poisoned")
            .remove(&completion.action_id);
        let Some(action) = removed else {
            tracing::debug!(
                target: "actions",
                action_id = completion.action_id.0,
                "completion_for_unknown_action_ignored"
            );
            return None;
        };

        match &completion.outcome {
            ActionOutcome::Success => self.observer.on_success(&action, &completion),
            ActionOutcome::Failure { reason } => {
                self.observer.on_failure(&action, &completion, reason)
            }
        }

        Some(ResolvedAction { action, completion })
    }

    pub fn fail(&self, action_id: ActionId, reason: impl Into<String>) -> Option<ResolvedAction> {
        self.resolve(ActionCompletion::failure(action_id, reason))
    }

    pub fn abandon_all(&self, reason: &str) -> Vec<ResolvedAction> {
        let ids: Vec<ActionId> = self
            .pending
            .lock()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.into_iter()
            .filter_map(|id| self.fail(id, reason))
            .collect()
    }

    pub fn outstanding(&self) -> usize {
        self.pending.lock().expect("lock poisoned").len()
    }

    pub fn is_pending(&self, action_id: ActionId) -> bool {
        self.pending
            .lock()
            .expect("lock poisoned")
            .contains_key(&action_id)
    }
}

/// Outbound publish capability handed to handlers.
#[derive(Clone)]
pub struct BrokerPublisher {
    transport: Arc<dyn BrokerTransport>,
    tracker: Arc<ActionTracker>,
}

impl BrokerPublisher {
    pub fn new(transport: Arc<dyn BrokerTransport>, tracker: Arc<ActionTracker>) -> Self {
        Self { transport, tracker }
    }

    /// Issues a tracked publish. Failures are reported through the tracker only.
    pub async fn publish(&self, topic: &str, qos: QoS, payload: Bytes) -> ActionId {
        let action_id = self
            .tracker
            .begin(ActionKind::Publish, "Publish", Some(topic));
        if let Err(err) = self.transport.publish(topic, qos, payload, action_id).await {
            self.tracker
                .fail(action_id, format!("publish to '{topic}' not issued: {err}"));
        }
        action_id
    }
}

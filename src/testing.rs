use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    broker::{
        actions::{ActionCompletion, ActionId, ActionObserver, PendingAction},
        error::{TransportError, not_connected, request_rejected, transport_closed},
        ports::{BrokerTransport, ConnectOptions, SessionEvent, TransportChannels},
    },
    dispatch::{error::HandlerError, ports::TopicHandler},
    pipeline::{
        analyzer::Analyzer,
        error::{PipelineError, launch_failed},
    },
    types::{InboundMessage, QoS},
};

pub use crate::record::MemoryRecordSink;

/// One request observed by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect {
        client_id: String,
        action_id: ActionId,
    },
    Subscribe {
        topic: String,
        qos: QoS,
        action_id: ActionId,
    },
    Publish {
        topic: String,
        qos: QoS,
        payload: Bytes,
        action_id: ActionId,
    },
    Acknowledge {
        topic: String,
        message_id: Option<u16>,
    },
    Disconnect,
}

/// How the broker answers a connect or subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Accept,
    Refuse(String),
    /// No completion is emitted; the test resolves the action itself.
    Silent,
}

/// In-memory broker transport driven by the test.
///
/// Connects and subscribes complete immediately unless a reply is scripted.
/// QoS 0 publishes complete on issue; others wait for [`Self::complete`]
/// unless `auto_complete_publishes` is set.
pub struct ScriptedTransport {
    channels: TransportChannels,
    calls: Mutex<Vec<TransportCall>>,
    connect_replies: Mutex<VecDeque<ScriptedReply>>,
    subscribe_replies: Mutex<VecDeque<ScriptedReply>>,
    auto_complete_publishes: AtomicBool,
    fail_connect_call: AtomicBool,
    fail_publish_call: AtomicBool,
    fail_acknowledge: AtomicBool,
    fail_disconnect: AtomicBool,
}

impl ScriptedTransport {
    pub fn new(channels: TransportChannels) -> Arc<Self> {
        Arc::new(Self {
            channels,
            calls: Mutex::new(Vec::new()),
            connect_replies: Mutex::new(VecDeque::new()),
            subscribe_replies: Mutex::new(VecDeque::new()),
            auto_complete_publishes: AtomicBool::new(true),
            fail_connect_call: AtomicBool::new(false),
            fail_publish_call: AtomicBool::new(false),
            fail_acknowledge: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
        })
    }

    /// Builds a transport together with the receiving ends of its channels.
    pub fn wired(
        inbound_capacity: usize,
    ) -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<SessionEvent>,
        mpsc::Receiver<InboundMessage>,
    ) {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        let transport = Self::new(TransportChannels {
            session: session_tx,
            inbound: inbound_tx,
        });
        (transport, session_rx, inbound_rx)
    }

    pub fn script_connects(&self, replies: impl IntoIterator<Item = ScriptedReply>) {
        self.connect_replies
            .lock()
            .expect("lock poisoned")
            .extend(replies);
    }

    pub fn script_subscribes(&self, replies: impl IntoIterator<Item = ScriptedReply>) {
        self.subscribe_replies
            .lock()
            .expect("lock poisoned")
            .extend(replies);
    }

    pub fn set_auto_complete_publishes(&self, enabled: bool) {
        self.auto_complete_publishes.store(enabled, Ordering::SeqCst);
    }

    pub fn set_fail_connect_call(&self, failing: bool) {
        self.fail_connect_call.store(failing, Ordering::SeqCst);
    }

    pub fn set_fail_publish_call(&self, failing: bool) {
        self.fail_publish_call.store(failing, Ordering::SeqCst);
    }

    pub fn set_fail_acknowledge(&self, failing: bool) {
        self.fail_acknowledge.store(failing, Ordering::SeqCst);
    }

    pub fn set_fail_disconnect(&self, failing: bool) {
        self.fail_disconnect.store(failing, Ordering::SeqCst);
    }

    /// Emits a completion as if the broker had answered.
    pub fn complete(&self, completion: ActionCompletion) {
        let _ = self
            .channels
            .session
            .send(SessionEvent::ActionCompleted(completion));
    }

    pub fn lose_connection(&self, cause: impl Into<String>) {
        let _ = self.channels.session.send(SessionEvent::ConnectionLost {
            cause: cause.into(),
        });
    }

    /// Delivers an inbound message; waits while the inbound queue is full.
    pub async fn deliver(&self, message: InboundMessage) -> Result<(), TransportError> {
        self.channels
            .inbound
            .send(message)
            .await
            .map_err(|_| transport_closed("inbound queue closed"))
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    pub fn connect_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, TransportCall::Connect { .. }))
            .count()
    }

    pub fn connect_action_ids(&self) -> Vec<ActionId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Connect { action_id, .. } => Some(action_id),
                _ => None,
            })
            .collect()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe { topic, .. } => Some(topic),
                _ => None,
            })
            .collect()
    }

    /// `(topic, qos, payload text)` for every publish issued.
    pub fn published(&self) -> Vec<(String, QoS, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Publish {
                    topic,
                    qos,
                    payload,
                    ..
                } => Some((topic, qos, String::from_utf8_lossy(&payload).into_owned())),
                _ => None,
            })
            .collect()
    }

    pub fn acknowledged(&self) -> Vec<Option<u16>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Acknowledge { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect()
    }

    pub fn disconnect_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, TransportCall::Disconnect))
            .count()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().expect("lock poisoned").push(call);
    }

    fn next_reply(queue: &Mutex<VecDeque<ScriptedReply>>) -> ScriptedReply {
        queue
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or(ScriptedReply::Accept)
    }

    fn answer(&self, action_id: ActionId, reply: ScriptedReply) {
        match reply {
            ScriptedReply::Accept => self.complete(ActionCompletion::success(action_id)),
            ScriptedReply::Refuse(reason) => {
                self.complete(ActionCompletion::failure(action_id, reason))
            }
            ScriptedReply::Silent => {}
        }
    }
}

#[async_trait]
impl BrokerTransport for ScriptedTransport {
    async fn connect(
        &self,
        options: &ConnectOptions,
        action_id: ActionId,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Connect {
            client_id: options.client_id.clone(),
            action_id,
        });
        if self.fail_connect_call.load(Ordering::SeqCst) {
            return Err(request_rejected("scripted connect call failure"));
        }
        self.answer(action_id, Self::next_reply(&self.connect_replies));
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        action_id: ActionId,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Subscribe {
            topic: topic.to_string(),
            qos,
            action_id,
        });
        let reply = Self::next_reply(&self.subscribe_replies);
        let completion = match reply {
            ScriptedReply::Accept => ActionCompletion::success(action_id).with_topic(topic),
            ScriptedReply::Refuse(reason) => {
                ActionCompletion::failure(action_id, reason).with_topic(topic)
            }
            ScriptedReply::Silent => return Ok(()),
        };
        self.complete(completion);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: Bytes,
        action_id: ActionId,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Publish {
            topic: topic.to_string(),
            qos,
            payload,
            action_id,
        });
        if self.fail_publish_call.load(Ordering::SeqCst) {
            return Err(not_connected("scripted publish call failure"));
        }
        if qos == QoS::AtMostOnce || self.auto_complete_publishes.load(Ordering::SeqCst) {
            self.complete(ActionCompletion::success(action_id).with_topic(topic));
        }
        Ok(())
    }

    async fn acknowledge(&self, message: &InboundMessage) -> Result<(), TransportError> {
        self.record(TransportCall::Acknowledge {
            topic: message.topic.clone(),
            message_id: message.message_id,
        });
        if self.fail_acknowledge.load(Ordering::SeqCst) {
            return Err(not_connected("scripted acknowledge failure"));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Disconnect);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(transport_closed("scripted disconnect failure"));
        }
        Ok(())
    }
}

/// Analyzer returning canned output. Captures the staged bytes on each call.
pub struct StaticAnalyzer {
    outputs: Mutex<VecDeque<String>>,
    fallback: String,
    delay: Duration,
    failure: Option<String>,
    invocations: Mutex<Vec<(PathBuf, Vec<u8>)>>,
}

impl StaticAnalyzer {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            outputs: Mutex::new(VecDeque::new()),
            fallback: output.into(),
            delay: Duration::ZERO,
            failure: None,
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Analyzer whose process can never be launched.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Outputs returned in order before falling back to the default output.
    pub fn with_outputs(self, outputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outputs
            .lock()
            .expect("lock poisoned")
            .extend(outputs.into_iter().map(Into::into));
        self
    }

    pub fn invocations(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.invocations.lock().expect("lock poisoned").clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().expect("lock poisoned").len()
    }
}

#[async_trait]
impl Analyzer for StaticAnalyzer {
    async fn analyze(&self, artifact: &Path) -> Result<String, PipelineError> {
        if let Some(message) = &self.failure {
            return Err(launch_failed(message.clone()));
        }
        let staged = tokio::fs::read(artifact).await.unwrap_or_default();
        self.invocations
            .lock()
            .expect("lock poisoned")
            .push((artifact.to_path_buf(), staged));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.outputs.lock().expect("lock poisoned").pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Topic handler that records every message it sees.
#[derive(Default)]
pub struct RecordingHandler {
    messages: Mutex<Vec<InboundMessage>>,
    failure: Option<String>,
}

impl RecordingHandler {
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    pub fn messages(&self) -> Vec<InboundMessage> {
        self.messages.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl TopicHandler for RecordingHandler {
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError> {
        self.messages
            .lock()
            .expect("lock poisoned")
            .push(message.clone());
        match &self.failure {
            Some(reason) => Err(HandlerError::new(message.topic.clone(), reason.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct RecordingActionObserver {
    successes: Mutex<Vec<ActionId>>,
    failures: Mutex<Vec<(ActionId, String)>>,
}

impl RecordingActionObserver {
    pub fn successes(&self) -> Vec<ActionId> {
        self.successes.lock().expect("lock poisoned").clone()
    }

    pub fn failures(&self) -> Vec<(ActionId, String)> {
        self.failures.lock().expect("lock poisoned").clone()
    }
}

impl ActionObserver for RecordingActionObserver {
    fn on_success(&self, action: &PendingAction, _completion: &ActionCompletion) {
        self.successes
            .lock()
            .expect("lock poisoned")
            .push(action.id);
    }

    fn on_failure(&self, action: &PendingAction, _completion: &ActionCompletion, reason: &str) {
        self.failures
            .lock()
            .expect("lock poisoned")
            .push((action.id, reason.to_string()));
    }
}

/// Polls `condition` every few milliseconds until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

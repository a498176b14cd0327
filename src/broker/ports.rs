use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    broker::{
        actions::{ActionCompletion, ActionId},
        error::TransportError,
    },
    types::{InboundMessage, QoS},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub address: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub clean_session: bool,
}

/// Notifications the transport raises towards the session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ActionCompleted(ActionCompletion),
    ConnectionLost { cause: String },
}

/// Where a transport delivers what it observes.
///
/// Control events and inbound messages travel on separate channels so that a
/// busy dispatcher never delays connection-loss detection.
#[derive(Debug, Clone)]
pub struct TransportChannels {
    pub session: mpsc::UnboundedSender<SessionEvent>,
    pub inbound: mpsc::Sender<InboundMessage>,
}

/// Capability-level broker client.
///
/// Every request method returns as soon as the request is issued. The outcome
/// of connect/subscribe/publish arrives later as
/// [`SessionEvent::ActionCompleted`] carrying the given action id. An `Err`
/// means the request could not be issued at all.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn connect(
        &self,
        options: &ConnectOptions,
        action: ActionId,
    ) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        action: ActionId,
    ) -> Result<(), TransportError>;

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: Bytes,
        action: ActionId,
    ) -> Result<(), TransportError>;

    async fn acknowledge(&self, message: &InboundMessage) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

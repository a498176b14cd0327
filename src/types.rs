use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Broker delivery guarantee for a subscription or publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("unsupported qos level {other}, expected 0, 1 or 2")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos.level()
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QoS{}", self.level())
    }
}

/// A message delivered by the broker on a subscribed topic.
///
/// Owned by the dispatcher; handlers only ever see a shared reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub message_id: Option<u16>,
    /// Transport connection that delivered the message. Acknowledgements
    /// are only valid on that same connection.
    pub connection: u64,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            message_id: None,
            connection: 0,
        }
    }

    pub fn with_message_id(mut self, message_id: u16) -> Self {
        self.message_id = (message_id != 0).then_some(message_id);
        self
    }

    pub fn with_connection(mut self, connection: u64) -> Self {
        self.connection = connection;
        self
    }

    pub fn requires_ack(&self) -> bool {
        self.qos != QoS::AtMostOnce && self.message_id.is_some()
    }
}

/// One completed recognition request as persisted by the record sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub request_time: String,
    pub response: String,
}

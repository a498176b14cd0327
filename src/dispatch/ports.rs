use async_trait::async_trait;

use crate::{dispatch::error::HandlerError, types::InboundMessage};

#[async_trait]
pub trait TopicHandler: Send + Sync {
    /// Processes one message. The payload is only valid for the duration of the call.
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError>;
}

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    broker::ports::BrokerTransport,
    dispatch::{error::HandlerError, table::SubscriptionTable},
    types::InboundMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    Discarded,
}

/// Routes inbound messages to their topic handler, one message at a time.
pub struct TopicDispatcher {
    table: Arc<SubscriptionTable>,
    transport: Arc<dyn BrokerTransport>,
}

impl TopicDispatcher {
    pub fn new(table: Arc<SubscriptionTable>, transport: Arc<dyn BrokerTransport>) -> Self {
        Self { table, transport }
    }

    pub async fn dispatch(&self, message: InboundMessage) -> Result<DispatchOutcome, HandlerError> {
        tracing::info!(
            target: "dispatch",
            topic = %message.topic,
            size_bytes = message.payload.len(),
            qos = message.qos.level(),
            message_id = ?message.message_id,
            "message_arrived"
        );

        let outcome = match self.table.resolve(&message.topic) {
            Some(handler) => {
                handler.handle(&message).await?;
                DispatchOutcome::Handled
            }
            None => {
                tracing::info!(
                    target: "dispatch",
                    topic = %message.topic,
                    "message_discarded_no_handler"
                );
                DispatchOutcome::Discarded
            }
        };

        if message.requires_ack()
            && let Err(err) = self.transport.acknowledge(&message).await
        {
            tracing::warn!(
                target: "dispatch",
                topic = %message.topic,
                message_id = ?message.message_id,
                error = %err,
                "acknowledge_failed"
            );
        }

        Ok(outcome)
    }

    /// Handles messages in arrival order until shutdown or until the queue closes.
    ///
    /// Shutdown is only observed between messages, so a run in progress
    /// always completes.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        shutdown: CancellationToken,
    ) -> Result<(), HandlerError> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                message = inbound.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    self.dispatch(message).await?;
                }
            }
        }

        tracing::info!(target: "dispatch", "dispatcher_stopped");
        Ok(())
    }
}

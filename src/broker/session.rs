use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;

use crate::{
    broker::{
        actions::{ActionId, ActionKind, ActionTracker, ResolvedAction},
        error::{SessionError, fatal, invalid_config},
        ports::{BrokerTransport, ConnectOptions, SessionEvent},
    },
    dispatch::{SubscriptionTable, issue_subscriptions},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribing,
    Ready,
    Terminated,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Subscribing => "subscribing",
            SessionState::Ready => "ready",
            SessionState::Terminated => "terminated",
        }
    }

    fn is_established(self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Subscribing | SessionState::Ready
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub address: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub reconnect_delay: Duration,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.address.trim().is_empty() {
            return Err(invalid_config("broker address cannot be empty"));
        }
        if self.client_id.trim().is_empty() {
            return Err(invalid_config("broker client_id cannot be empty"));
        }
        Ok(())
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            address: self.address.clone(),
            client_id: self.client_id.clone(),
            keep_alive: self.keep_alive,
            clean_session: self.clean_session,
        }
    }
}

/// Owns the broker connection lifecycle.
///
/// The session task is the only writer of [`SessionState`]. Transport
/// notifications arrive on the event channel; reconnects are scheduled as a
/// deadline inside the same `select!` so a pending wait never hides a later
/// event and is cancelled by shutdown.
pub struct BrokerSession {
    config: SessionConfig,
    transport: Arc<dyn BrokerTransport>,
    tracker: Arc<ActionTracker>,
    subscriptions: Arc<SubscriptionTable>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
    pending_connect: Option<ActionId>,
    pending_subscribes: BTreeSet<ActionId>,
    reconnect_at: Option<Instant>,
    connect_attempts: u64,
}

impl BrokerSession {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn BrokerTransport>,
        tracker: Arc<ActionTracker>,
        subscriptions: Arc<SubscriptionTable>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Ok(Self {
            config,
            transport,
            tracker,
            subscriptions,
            events,
            state_tx,
            pending_connect: None,
            pending_subscribes: BTreeSet::new(),
            reconnect_at: None,
            connect_attempts: 0,
        })
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SessionError> {
        if shutdown.is_cancelled() {
            self.set_state(SessionState::Terminated);
            return Ok(());
        }

        self.connect().await?;

        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = self.events.recv() => {
                    let Some(event) = event else {
                        return Err(fatal("transport event channel closed"));
                    };
                    self.on_event(event).await?;
                }
                _ = async move {
                    if let Some(deadline) = reconnect_at {
                        sleep_until(deadline).await;
                    }
                }, if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.connect().await?;
                }
            }
        }

        self.terminate().await
    }

    async fn connect(&mut self) -> Result<(), SessionError> {
        self.connect_attempts = self.connect_attempts.saturating_add(1);
        self.set_state(SessionState::Connecting);

        let action_id = self.tracker.begin(ActionKind::Connect, "Connect", None);
        self.pending_connect = Some(action_id);
        tracing::info!(
            target: "session",
            address = %self.config.address,
            client_id = %self.config.client_id,
            attempt = self.connect_attempts,
            action_id = action_id.0,
            "connect_issued"
        );

        if let Err(err) = self
            .transport
            .connect(&self.config.connect_options(), action_id)
            .await
        {
            self.tracker
                .fail(action_id, format!("connect call failed: {err}"));
            self.pending_connect = None;
            tracing::error!(
                target: "session",
                address = %self.config.address,
                error = %err,
                "connect_call_failed"
            );
            return Err(fatal(format!(
                "unable to connect to broker '{}': {err}",
                self.config.address
            )));
        }

        Ok(())
    }

    async fn on_event(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        match event {
            SessionEvent::ActionCompleted(completion) => {
                if let Some(resolved) = self.tracker.resolve(completion) {
                    self.on_resolved(resolved).await;
                }
            }
            SessionEvent::ConnectionLost { cause } => self.on_connection_lost(&cause),
        }
        Ok(())
    }

    async fn on_resolved(&mut self, resolved: ResolvedAction) {
        let action_id = resolved.action.id;
        match resolved.action.kind {
            ActionKind::Connect => {
                if self.pending_connect != Some(action_id) {
                    tracing::debug!(
                        target: "session",
                        action_id = action_id.0,
                        "stale_connect_completion_ignored"
                    );
                    return;
                }
                self.pending_connect = None;

                if resolved.completion.outcome.is_success() {
                    tracing::info!(
                        target: "session",
                        address = %self.config.address,
                        attempt = self.connect_attempts,
                        "connected"
                    );
                    self.set_state(SessionState::Connected);
                    self.subscribe_all().await;
                } else {
                    self.set_state(SessionState::Disconnected);
                    self.schedule_reconnect("connect_failed");
                }
            }
            ActionKind::Subscribe => {
                if self.pending_subscribes.remove(&action_id) {
                    self.promote_if_subscribed();
                }
            }
            ActionKind::Publish => {}
        }
    }

    async fn subscribe_all(&mut self) {
        self.set_state(SessionState::Subscribing);
        let issued =
            issue_subscriptions(&self.subscriptions, self.transport.as_ref(), &self.tracker).await;
        self.pending_subscribes = issued
            .into_iter()
            .filter(|id| self.tracker.is_pending(*id))
            .collect();
        self.promote_if_subscribed();
    }

    fn promote_if_subscribed(&mut self) {
        if self.pending_subscribes.is_empty() && *self.state_tx.borrow() == SessionState::Subscribing
        {
            tracing::info!(
                target: "session",
                topics = self.subscriptions.len(),
                "session_ready"
            );
            self.set_state(SessionState::Ready);
        }
    }

    fn on_connection_lost(&mut self, cause: &str) {
        let state = *self.state_tx.borrow();
        tracing::warn!(
            target: "session",
            state = %state,
            cause = %cause,
            "connection_lost"
        );
        if !state.is_established() {
            return;
        }

        for id in std::mem::take(&mut self.pending_subscribes) {
            self.tracker.fail(id, "connection lost before subscribe completed");
        }
        self.set_state(SessionState::Disconnected);
        self.schedule_reconnect("connection_lost");
    }

    fn schedule_reconnect(&mut self, reason: &'static str) {
        let delay = self.config.reconnect_delay;
        tracing::info!(
            target: "session",
            reason = reason,
            delay_ms = delay.as_millis() as u64,
            attempt = self.connect_attempts,
            "reconnect_scheduled"
        );
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn terminate(mut self) -> Result<(), SessionError> {
        let previous = *self.state_tx.borrow();
        self.reconnect_at = None;
        self.set_state(SessionState::Terminated);
        tracing::info!(
            target: "session",
            previous_state = %previous,
            "disconnect_requested"
        );

        let result = self.transport.disconnect().await;
        let abandoned = self.tracker.abandon_all("session terminated");
        if !abandoned.is_empty() {
            tracing::debug!(
                target: "session",
                count = abandoned.len(),
                "pending_actions_abandoned"
            );
        }

        result.map_err(|err| fatal(format!("failed to disconnect from broker: {err}")))
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            tracing::debug!(
                target: "session",
                from = %previous,
                to = %next,
                "state_transition"
            );
        }
    }
}

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish,
    SubAck, SubscribeReasonCode,
};
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
    time::timeout,
};

use crate::{
    broker::{
        actions::{ActionCompletion, ActionId},
        error::{TransportError, invalid_options, not_connected, request_rejected},
        ports::{BrokerTransport, ConnectOptions, SessionEvent, TransportChannels},
    },
    types::{InboundMessage, QoS},
};

const DEFAULT_MQTT_PORT: u16 = 1883;
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
const DISCONNECT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Splits `host:port` (optionally prefixed with `tcp://` or `mqtt://`).
pub fn parse_address(address: &str) -> Result<(String, u16), TransportError> {
    let trimmed = address.trim();
    let bare = ["tcp://", "mqtt://"]
        .iter()
        .find_map(|scheme| trimmed.strip_prefix(scheme))
        .unwrap_or(trimmed);
    if bare.is_empty() {
        return Err(invalid_options("broker address cannot be empty"));
    }

    match bare.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(invalid_options(format!(
                    "broker address '{address}' is missing a host"
                )));
            }
            let port = port.parse::<u16>().map_err(|err| {
                invalid_options(format!("broker address '{address}' has invalid port: {err}"))
            })?;
            Ok((host.to_string(), port))
        }
        None => Ok((bare.to_string(), DEFAULT_MQTT_PORT)),
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn from_mqtt_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Pairs outgoing packet ids with the actions that produced them.
///
/// rumqttc assigns packet ids inside its event loop and reports them in
/// request order, so queued actions are matched FIFO per packet kind.
#[derive(Default)]
struct PacketLedger {
    queued_subscribes: VecDeque<(ActionId, String)>,
    queued_publishes: VecDeque<(ActionId, QoS, String)>,
    awaiting_suback: BTreeMap<u16, (ActionId, String)>,
    awaiting_puback: BTreeMap<u16, (ActionId, String)>,
}

impl PacketLedger {
    fn on_outgoing_subscribe(&mut self, pkid: u16) {
        if let Some(entry) = self.queued_subscribes.pop_front() {
            self.awaiting_suback.insert(pkid, entry);
        }
    }

    fn on_suback(&mut self, ack: &SubAck) -> Option<ActionCompletion> {
        let (action_id, topic) = self.awaiting_suback.remove(&ack.pkid)?;
        let rejected = ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure));
        let completion = if rejected {
            ActionCompletion::failure(
                action_id,
                format!("broker rejected subscription to '{topic}'"),
            )
        } else {
            ActionCompletion::success(action_id)
        };
        Some(completion.with_message_id(ack.pkid).with_topic(topic))
    }

    fn on_outgoing_publish(&mut self, pkid: u16) -> Option<ActionCompletion> {
        let (action_id, qos, topic) = self.queued_publishes.pop_front()?;
        if qos == QoS::AtMostOnce {
            return Some(ActionCompletion::success(action_id).with_topic(topic));
        }
        self.awaiting_puback.insert(pkid, (action_id, topic));
        None
    }

    fn on_publish_acked(&mut self, pkid: u16) -> Option<ActionCompletion> {
        let (action_id, topic) = self.awaiting_puback.remove(&pkid)?;
        Some(
            ActionCompletion::success(action_id)
                .with_message_id(pkid)
                .with_topic(topic),
        )
    }

    fn drain_failed(&mut self, reason: &str) -> Vec<ActionCompletion> {
        let subscribes = self
            .queued_subscribes
            .drain(..)
            .chain(std::mem::take(&mut self.awaiting_suback).into_values());
        let publishes = self
            .queued_publishes
            .drain(..)
            .map(|(action_id, _, topic)| (action_id, topic))
            .chain(std::mem::take(&mut self.awaiting_puback).into_values());

        let mut failed: Vec<ActionCompletion> = subscribes
            .chain(publishes)
            .map(|(action_id, topic)| {
                ActionCompletion::failure(action_id, reason).with_topic(topic)
            })
            .collect();
        failed.sort_by_key(|completion| completion.action_id);
        failed
    }
}

#[derive(Default)]
struct ConnectionSlot {
    generation: u64,
    client: Option<AsyncClient>,
    connected: bool,
    ledger: PacketLedger,
    driver: Option<JoinHandle<()>>,
}

enum DriverExit {
    Failed(String),
    Disconnected,
    InboundClosed,
    Superseded,
}

/// [`BrokerTransport`] backed by a rumqttc client and event loop.
///
/// Each connect builds a fresh client and spawns a driver task polling its
/// event loop. The driver never reconnects on its own; when the connection
/// drops it reports once and exits, leaving the retry policy to the session.
pub struct RumqttTransport {
    channels: TransportChannels,
    request_capacity: usize,
    slot: Arc<Mutex<ConnectionSlot>>,
    request_lock: AsyncMutex<()>,
}

impl RumqttTransport {
    pub fn new(channels: TransportChannels, request_capacity: usize) -> Self {
        Self {
            channels,
            request_capacity: request_capacity.max(1),
            slot: Arc::new(Mutex::new(ConnectionSlot::default())),
            request_lock: AsyncMutex::new(()),
        }
    }

    fn emit_all(&self, completions: Vec<ActionCompletion>) {
        for completion in completions {
            let _ = self
                .channels
                .session
                .send(SessionEvent::ActionCompleted(completion));
        }
    }

    fn current_client(&self) -> Result<AsyncClient, TransportError> {
        self.slot
            .lock()
            .expect("lock poisoned")
            .client
            .clone()
            .ok_or_else(|| not_connected("no broker connection has been issued"))
    }
}

#[async_trait]
impl BrokerTransport for RumqttTransport {
    async fn connect(
        &self,
        options: &ConnectOptions,
        action: ActionId,
    ) -> Result<(), TransportError> {
        let (host, port) = parse_address(&options.address)?;
        if options.client_id.trim().is_empty() {
            return Err(invalid_options("client_id cannot be empty"));
        }

        let mut mqtt = MqttOptions::new(options.client_id.clone(), host, port);
        mqtt.set_keep_alive(options.keep_alive.max(MIN_KEEP_ALIVE));
        mqtt.set_clean_session(options.clean_session);
        mqtt.set_manual_acks(true);
        let (client, eventloop) = AsyncClient::new(mqtt, self.request_capacity);

        let superseded = {
            let mut slot = self.slot.lock().expect("lock poisoned");
            if let Some(previous) = slot.driver.take() {
                previous.abort();
            }
            let superseded = slot.ledger.drain_failed("superseded by a new connection");
            slot.generation = slot.generation.saturating_add(1);
            slot.client = Some(client);
            slot.connected = false;
            slot.driver = Some(tokio::spawn(drive(
                eventloop,
                slot.generation,
                action,
                Arc::clone(&self.slot),
                self.channels.clone(),
            )));
            superseded
        };
        self.emit_all(superseded);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        action: ActionId,
    ) -> Result<(), TransportError> {
        let _ordering = self.request_lock.lock().await;
        let client = self.current_client()?;
        self.slot
            .lock()
            .expect("lock poisoned")
            .ledger
            .queued_subscribes
            .push_back((action, topic.to_string()));

        if let Err(err) = client.subscribe(topic, to_mqtt_qos(qos)).await {
            self.slot
                .lock()
                .expect("lock poisoned")
                .ledger
                .queued_subscribes
                .retain(|(id, _)| *id != action);
            return Err(request_rejected(format!("subscribe request failed: {err}")));
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: Bytes,
        action: ActionId,
    ) -> Result<(), TransportError> {
        let _ordering = self.request_lock.lock().await;
        let client = self.current_client()?;
        self.slot
            .lock()
            .expect("lock poisoned")
            .ledger
            .queued_publishes
            .push_back((action, qos, topic.to_string()));

        if let Err(err) = client
            .publish(topic, to_mqtt_qos(qos), false, payload.to_vec())
            .await
        {
            self.slot
                .lock()
                .expect("lock poisoned")
                .ledger
                .queued_publishes
                .retain(|(id, _, _)| *id != action);
            return Err(request_rejected(format!("publish request failed: {err}")));
        }
        Ok(())
    }

    async fn acknowledge(&self, message: &InboundMessage) -> Result<(), TransportError> {
        let Some(message_id) = message.message_id else {
            return Ok(());
        };
        let client = {
            let slot = self.slot.lock().expect("lock poisoned");
            if slot.generation != message.connection {
                tracing::debug!(
                    target: "transport",
                    topic = %message.topic,
                    message_id,
                    connection = message.connection,
                    current_connection = slot.generation,
                    "stale_acknowledgement_skipped"
                );
                return Ok(());
            }
            slot.client
                .clone()
                .ok_or_else(|| not_connected("no broker connection has been issued"))?
        };
        let mut publish = Publish::new(
            message.topic.clone(),
            to_mqtt_qos(message.qos),
            Vec::new(),
        );
        publish.pkid = message_id;
        client
            .ack(&publish)
            .await
            .map_err(|err| request_rejected(format!("acknowledge request failed: {err}")))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let (client, driver, connected) = {
            let mut slot = self.slot.lock().expect("lock poisoned");
            (slot.client.take(), slot.driver.take(), slot.connected)
        };

        match (client, connected) {
            (Some(client), true) => {
                client
                    .disconnect()
                    .await
                    .map_err(|err| request_rejected(format!("disconnect request failed: {err}")))?;
                if let Some(driver) = driver {
                    let abort = driver.abort_handle();
                    if timeout(DISCONNECT_DRAIN_TIMEOUT, driver).await.is_err() {
                        tracing::warn!(target: "transport", "disconnect_drain_timed_out");
                        abort.abort();
                    }
                }
            }
            _ => {
                if let Some(driver) = driver {
                    driver.abort();
                }
            }
        }

        tracing::info!(target: "transport", "disconnected");
        Ok(())
    }
}

fn with_ledger<T>(
    slot: &Mutex<ConnectionSlot>,
    generation: u64,
    apply: impl FnOnce(&mut PacketLedger) -> Option<T>,
) -> Option<T> {
    let mut slot = slot.lock().expect("lock poisoned");
    if slot.generation != generation {
        return None;
    }
    apply(&mut slot.ledger)
}

fn emit(channels: &TransportChannels, completion: Option<ActionCompletion>) {
    if let Some(completion) = completion {
        let _ = channels
            .session
            .send(SessionEvent::ActionCompleted(completion));
    }
}

/// Moves delivered messages into the bounded inbound queue.
///
/// The event loop must keep being polled while the dispatcher is busy, since
/// the dispatcher's own publishes and acknowledgements are drained by that
/// poll. Messages wait here instead of in the driver.
async fn forward_inbound(
    mut pending: mpsc::UnboundedReceiver<InboundMessage>,
    inbound: mpsc::Sender<InboundMessage>,
) {
    while let Some(message) = pending.recv().await {
        if inbound.send(message).await.is_err() {
            break;
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    generation: u64,
    connect_action: ActionId,
    slot: Arc<Mutex<ConnectionSlot>>,
    channels: TransportChannels,
) {
    let mut connected = false;
    let (backlog, pending) = mpsc::unbounded_channel();
    tokio::spawn(forward_inbound(pending, channels.inbound.clone()));

    let exit = loop {
        let event = match eventloop.poll().await {
            Ok(event) => event,
            Err(err) => break DriverExit::Failed(err.to_string()),
        };

        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    break DriverExit::Failed(format!("broker refused connection: {:?}", ack.code));
                }
                {
                    let mut slot = slot.lock().expect("lock poisoned");
                    if slot.generation != generation {
                        break DriverExit::Superseded;
                    }
                    slot.connected = true;
                }
                connected = true;
                tracing::debug!(target: "transport", generation, "connack_received");
                emit(&channels, Some(ActionCompletion::success(connect_action)));
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let message = InboundMessage::new(
                    publish.topic,
                    publish.payload,
                    from_mqtt_qos(publish.qos),
                )
                .with_message_id(publish.pkid)
                .with_connection(generation);
                if backlog.send(message).is_err() {
                    break DriverExit::InboundClosed;
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                emit(&channels, with_ledger(&slot, generation, |ledger| ledger.on_suback(&ack)));
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                emit(
                    &channels,
                    with_ledger(&slot, generation, |ledger| ledger.on_publish_acked(ack.pkid)),
                );
            }
            Event::Incoming(Packet::PubComp(comp)) => {
                emit(
                    &channels,
                    with_ledger(&slot, generation, |ledger| ledger.on_publish_acked(comp.pkid)),
                );
            }
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                with_ledger(&slot, generation, |ledger| {
                    ledger.on_outgoing_subscribe(pkid);
                    Some(())
                });
            }
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                emit(
                    &channels,
                    with_ledger(&slot, generation, |ledger| ledger.on_outgoing_publish(pkid)),
                );
            }
            Event::Outgoing(Outgoing::Disconnect) => break DriverExit::Disconnected,
            _ => {}
        }
    };

    let reason = match &exit {
        DriverExit::Failed(cause) => format!("connection failed: {cause}"),
        DriverExit::Disconnected => "disconnected".to_string(),
        DriverExit::InboundClosed => "inbound queue closed".to_string(),
        DriverExit::Superseded => "superseded by a new connection".to_string(),
    };
    let failed = {
        let mut slot = slot.lock().expect("lock poisoned");
        if slot.generation == generation {
            slot.client = None;
            slot.connected = false;
            slot.driver = None;
            slot.ledger.drain_failed(&reason)
        } else {
            Vec::new()
        }
    };
    for completion in failed {
        emit(&channels, Some(completion));
    }

    match exit {
        DriverExit::Disconnected | DriverExit::Superseded => {}
        _ if connected => {
            let _ = channels.session.send(SessionEvent::ConnectionLost {
                cause: reason.clone(),
            });
        }
        DriverExit::Failed(cause) => {
            emit(&channels, Some(ActionCompletion::failure(connect_action, cause)));
        }
        DriverExit::InboundClosed => {
            emit(
                &channels,
                Some(ActionCompletion::failure(connect_action, reason.clone())),
            );
        }
    }
    tracing::debug!(target: "transport", generation, reason = %reason, "driver_stopped");
}

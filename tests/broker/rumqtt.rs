use std::time::Duration;

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};

use porichoy::{
    broker::{
        actions::ActionId,
        adapters::RumqttTransport,
        ports::{BrokerTransport, ConnectOptions, SessionEvent, TransportChannels},
    },
    types::{InboundMessage, QoS},
};

const WAIT: Duration = Duration::from_secs(10);

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const PUBACK: u8 = 4;

/// One MQTT control packet as the broker side sees it.
struct RawPacket {
    header: u8,
    body: Vec<u8>,
}

impl RawPacket {
    fn kind(&self) -> u8 {
        self.header >> 4
    }
}

async fn read_packet<R: AsyncRead + Unpin>(stream: &mut R) -> std::io::Result<RawPacket> {
    let header = stream.read_u8().await?;
    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        length |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; length];
    stream.read_exact(&mut body).await?;
    Ok(RawPacket { header, body })
}

fn encode(header: u8, body: &[u8]) -> Vec<u8> {
    let mut frame = vec![header];
    let mut remaining = body.len();
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        frame.push(byte);
        if remaining == 0 {
            break;
        }
    }
    frame.extend_from_slice(body);
    frame
}

fn connack() -> Vec<u8> {
    encode(0x20, &[0x00, 0x00])
}

fn publish_frame(topic: &str, packet_id: Option<u16>, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    let header = match packet_id {
        Some(id) => {
            body.extend_from_slice(&id.to_be_bytes());
            0x32
        }
        None => 0x30,
    };
    body.extend_from_slice(payload);
    encode(header, &body)
}

struct Client {
    transport: RumqttTransport,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    inbound: mpsc::Receiver<InboundMessage>,
    options: ConnectOptions,
}

impl Client {
    async fn connect(&self, action: u64) {
        self.transport
            .connect(&self.options, ActionId(action))
            .await
            .expect("connect request should be issued");
    }

    async fn next_event(&mut self) -> SessionEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("transport should report in time")
            .expect("event channel open")
    }

    async fn expect_connected(&mut self, action: u64) {
        match self.next_event().await {
            SessionEvent::ActionCompleted(completion) => {
                assert_eq!(completion.action_id, ActionId(action));
                assert!(completion.outcome.is_success(), "connect should succeed");
            }
            other => panic!("expected connect completion, got {other:?}"),
        }
    }

    async fn next_message(&mut self) -> InboundMessage {
        timeout(WAIT, self.inbound.recv())
            .await
            .expect("message should be delivered in time")
            .expect("inbound channel open")
    }
}

async fn fake_broker(inbound_capacity: usize, request_capacity: usize) -> (TcpListener, Client) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let port = listener.local_addr().expect("local addr").port();

    let (session_tx, events) = mpsc::unbounded_channel();
    let (inbound_tx, inbound) = mpsc::channel(inbound_capacity);
    let transport = RumqttTransport::new(
        TransportChannels {
            session: session_tx,
            inbound: inbound_tx,
        },
        request_capacity,
    );
    let options = ConnectOptions {
        address: format!("127.0.0.1:{port}"),
        client_id: "porichoy-test".to_string(),
        keep_alive: Duration::from_secs(60),
        clean_session: true,
    };

    (
        listener,
        Client {
            transport,
            events,
            inbound,
            options,
        },
    )
}

async fn accept(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("client should dial in time")
        .expect("accept should succeed");
    let connect = read_packet(&mut stream)
        .await
        .expect("client should send CONNECT");
    assert_eq!(connect.kind(), CONNECT);
    stream
        .write_all(&connack())
        .await
        .expect("CONNACK should be written");
    stream
}

#[tokio::test]
async fn connack_completes_connect_and_dropped_socket_reports_loss() {
    let (listener, mut client) = fake_broker(4, 4).await;

    client.connect(1).await;
    let stream = accept(&listener).await;
    client.expect_connected(1).await;

    drop(stream);
    match client.next_event().await {
        SessionEvent::ConnectionLost { cause } => {
            assert!(cause.starts_with("connection failed"), "cause: {cause}");
        }
        other => panic!("expected connection loss, got {other:?}"),
    }
}

#[tokio::test]
async fn delivered_messages_carry_topic_payload_and_packet_id() {
    let (listener, mut client) = fake_broker(4, 4).await;

    client.connect(1).await;
    let mut stream = accept(&listener).await;
    client.expect_connected(1).await;

    stream
        .write_all(&publish_frame("Image", Some(7), b"jpeg-bytes"))
        .await
        .expect("PUBLISH should be written");
    let message = client.next_message().await;
    assert_eq!(message.topic, "Image");
    assert_eq!(message.payload, Bytes::from_static(b"jpeg-bytes"));
    assert_eq!(message.qos, QoS::AtLeastOnce);
    assert_eq!(message.message_id, Some(7));

    client
        .transport
        .acknowledge(&message)
        .await
        .expect("acknowledge should be issued");
    let ack = timeout(WAIT, read_packet(&mut stream))
        .await
        .expect("PUBACK should arrive in time")
        .expect("PUBACK should be readable");
    assert_eq!(ack.kind(), PUBACK);
    assert_eq!(ack.body, 7u16.to_be_bytes().to_vec());
}

#[tokio::test]
async fn acknowledgement_from_an_earlier_connection_is_not_sent_on_the_new_one() {
    let (listener, mut client) = fake_broker(4, 4).await;

    client.connect(1).await;
    let mut first = accept(&listener).await;
    client.expect_connected(1).await;
    first
        .write_all(&publish_frame("Image", Some(1), b"old"))
        .await
        .expect("PUBLISH should be written");
    let old = client.next_message().await;
    assert_eq!(old.payload, Bytes::from_static(b"old"));

    drop(first);
    assert!(matches!(
        client.next_event().await,
        SessionEvent::ConnectionLost { .. }
    ));

    client.connect(2).await;
    let mut second = accept(&listener).await;
    client.expect_connected(2).await;
    second
        .write_all(&publish_frame("Image", Some(1), b"new"))
        .await
        .expect("PUBLISH should be written");
    let new = client.next_message().await;
    assert_eq!(new.payload, Bytes::from_static(b"new"));
    assert_eq!(old.message_id, new.message_id);
    assert_ne!(old.connection, new.connection);

    client
        .transport
        .acknowledge(&old)
        .await
        .expect("stale acknowledgement is skipped, not an error");
    assert!(
        timeout(Duration::from_millis(300), read_packet(&mut second))
            .await
            .is_err(),
        "no PUBACK may reach the new connection for the old message"
    );

    client
        .transport
        .acknowledge(&new)
        .await
        .expect("acknowledge should be issued");
    let ack = timeout(WAIT, read_packet(&mut second))
        .await
        .expect("PUBACK should arrive in time")
        .expect("PUBACK should be readable");
    assert_eq!(ack.kind(), PUBACK);
    assert_eq!(ack.body, 1u16.to_be_bytes().to_vec());
}

#[tokio::test]
async fn burst_of_deliveries_does_not_stall_result_publishes() {
    const BURST: usize = 200;
    let (listener, mut client) = fake_broker(1, 2).await;

    client.connect(1).await;
    let stream = accept(&listener).await;
    client.expect_connected(1).await;
    let (mut reader, mut writer) = stream.into_split();

    let mut frames = Vec::new();
    for index in 0..BURST {
        frames.extend(publish_frame("Image", None, format!("image-{index}").as_bytes()));
    }
    writer
        .write_all(&frames)
        .await
        .expect("burst should be written");

    let broker = tokio::spawn(async move {
        let mut results = 0;
        while results < BURST {
            let packet = read_packet(&mut reader)
                .await
                .expect("client should keep writing");
            if packet.kind() == PUBLISH {
                results += 1;
            }
        }
        results
    });

    for index in 0..BURST {
        let message = client.next_message().await;
        assert_eq!(message.payload, Bytes::from(format!("image-{index}")));
        timeout(
            WAIT,
            client.transport.publish(
                "Result",
                QoS::AtMostOnce,
                Bytes::from_static(b"No match found"),
                ActionId(100 + index as u64),
            ),
        )
        .await
        .expect("result publish must not stall behind inbound deliveries")
        .expect("publish should be issued");
    }

    let results = timeout(WAIT, broker)
        .await
        .expect("broker should see every result")
        .expect("broker task should not panic");
    assert_eq!(results, BURST);
    drop(writer);
}

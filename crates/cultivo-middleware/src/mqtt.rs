//! `rumqttc`-backed [`Transport`].
//!
//! Every [`Transport::connect`] builds a fresh [`AsyncClient`] /
//! [`EventLoop`] pair and drives the event loop until the broker's CONNACK
//! arrives, so a session never inherits half-sent state from the previous
//! one.  Reconnection is *not* left to `rumqttc`: the event loop is dropped as
//! soon as it reports an error and the
//! [`ConnectionManager`][crate::connection::ConnectionManager] decides when
//! to try again.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cultivo_types::{SyncConfig, SyncError};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeReasonCode,
};
use tracing::{debug, instrument};

use crate::transport::{Publisher, Transport};

/// Default size of the client's outgoing request queue.
pub const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// How long [`Transport::disconnect`] waits for the DISCONNECT packet to be
/// flushed.
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
    /// Publications that arrived while waiting for SUBACKs.
    pending: VecDeque<(String, Vec<u8>)>,
}

/// MQTT 3.1.1 transport over TCP.
pub struct MqttTransport {
    options: MqttOptions,
    request_capacity: usize,
    connect_timeout: Duration,
    session: Option<Session>,
}

impl MqttTransport {
    pub fn new(options: MqttOptions, connect_timeout: Duration) -> Self {
        Self {
            options,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            connect_timeout,
            session: None,
        }
    }

    /// Build the transport from the engine configuration.
    pub fn from_config(cfg: &SyncConfig) -> Self {
        let mut options = MqttOptions::new(
            cfg.client_id.clone(),
            cfg.broker_host.clone(),
            cfg.broker_port,
        );
        options.set_keep_alive(cfg.keep_alive());
        options.set_clean_session(true);
        if let Some(credentials) = &cfg.credentials {
            options.set_credentials(credentials.username.clone(), credentials.password.clone());
        }
        Self::new(options, cfg.connect_timeout())
    }

    /// Override the outgoing request queue size (builder-style).  Must be at
    /// least the number of inbound topics.
    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity.max(1);
        self
    }

    pub fn options(&self) -> &MqttOptions {
        &self.options
    }

    fn session(&mut self) -> Result<&mut Session, SyncError> {
        self.session
            .as_mut()
            .ok_or_else(|| SyncError::Transport("no open MQTT session".to_string()))
    }
}

#[async_trait]
impl Transport for MqttTransport {
    #[instrument(skip(self), fields(broker = ?self.options.broker_address()))]
    async fn connect(&mut self) -> Result<Arc<dyn Publisher>, SyncError> {
        self.disconnect().await;

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), self.request_capacity);
        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return check_connack(ack.code),
                    Ok(_) => continue,
                    Err(e) => return Err(map_connection_error(e)),
                }
            }
        };
        match tokio::time::timeout(self.connect_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SyncError::Transport(format!(
                    "no CONNACK within {:?}",
                    self.connect_timeout
                )));
            }
        }

        debug!("MQTT session established");
        let publisher = Arc::new(MqttPublisher {
            client: client.clone(),
        });
        self.session = Some(Session {
            client,
            eventloop,
            pending: VecDeque::new(),
        });
        Ok(publisher)
    }

    #[instrument(skip(self, topics), fields(count = topics.len()))]
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), SyncError> {
        let timeout = self.connect_timeout;
        let session = self.session()?;

        for topic in topics {
            session
                .client
                .try_subscribe(topic.clone(), QoS::AtMostOnce)
                .map_err(|e| SyncError::Transport(format!("subscribe '{topic}' failed: {e}")))?;
        }

        let wait_for_acks = async {
            let mut acked = 0;
            while acked < topics.len() {
                match session.eventloop.poll().await {
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        if ack
                            .return_codes
                            .iter()
                            .any(|code| matches!(code, SubscribeReasonCode::Failure))
                        {
                            return Err(SyncError::Transport(
                                "broker refused a subscription".to_string(),
                            ));
                        }
                        acked += ack.return_codes.len();
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        session
                            .pending
                            .push_back((publish.topic, publish.payload.to_vec()));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(map_connection_error(e)),
                }
            }
            Ok(())
        };
        match tokio::time::timeout(timeout, wait_for_acks).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Transport(format!("no SUBACK within {timeout:?}"))),
        }
    }

    async fn next_message(&mut self) -> Result<(String, Vec<u8>), SyncError> {
        let session = self.session()?;
        if let Some(message) = session.pending.pop_front() {
            return Ok(message);
        }
        loop {
            match session.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok((publish.topic, publish.payload.to_vec()));
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return Err(SyncError::Transport("broker closed the session".to_string()));
                }
                Ok(_) => continue,
                Err(e) => return Err(map_connection_error(e)),
            }
        }
    }

    async fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if session.client.try_disconnect().is_err() {
            return;
        }
        let flush = async {
            loop {
                match session.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        let _ = tokio::time::timeout(DISCONNECT_FLUSH, flush).await;
        debug!("MQTT session closed");
    }
}

struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SyncError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| SyncError::Transport(format!("publish to '{topic}' refused: {e}")))
    }
}

/// Classify a CONNACK return code.
fn check_connack(code: ConnectReturnCode) -> Result<(), SyncError> {
    match code {
        ConnectReturnCode::Success => Ok(()),
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
            Err(SyncError::AuthRejected(format!("{code:?}")))
        }
        other => Err(SyncError::Transport(format!("connection refused: {other:?}"))),
    }
}

fn map_connection_error(error: ConnectionError) -> SyncError {
    match error {
        ConnectionError::ConnectionRefused(code) => match check_connack(code) {
            Err(e) => e,
            Ok(()) => SyncError::Transport("connection refused".to_string()),
        },
        other => SyncError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cultivo_types::Credentials;

    #[test]
    fn connack_success_is_ok() {
        assert!(check_connack(ConnectReturnCode::Success).is_ok());
    }

    #[test]
    fn bad_credentials_are_auth_rejections() {
        assert!(matches!(
            check_connack(ConnectReturnCode::BadUserNamePassword),
            Err(SyncError::AuthRejected(_))
        ));
        assert!(matches!(
            check_connack(ConnectReturnCode::NotAuthorized),
            Err(SyncError::AuthRejected(_))
        ));
    }

    #[test]
    fn other_refusals_are_transient() {
        assert!(matches!(
            check_connack(ConnectReturnCode::ServiceUnavailable),
            Err(SyncError::Transport(_))
        ));
        assert!(matches!(
            map_connection_error(ConnectionError::ConnectionRefused(
                ConnectReturnCode::BadUserNamePassword
            )),
            SyncError::AuthRejected(_)
        ));
    }

    #[test]
    fn from_config_copies_broker_settings() {
        let cfg = SyncConfig {
            broker_host: "192.168.1.100".to_string(),
            broker_port: 1884,
            client_id: "rack-dashboard".to_string(),
            credentials: Some(Credentials::new("adrian", "secret")),
            ..SyncConfig::default()
        };
        let transport = MqttTransport::from_config(&cfg);
        assert_eq!(
            transport.options().broker_address(),
            ("192.168.1.100".to_string(), 1884)
        );
        assert_eq!(transport.options().client_id(), "rack-dashboard");
        assert_eq!(transport.options().keep_alive(), Duration::from_secs(60));
    }

    // ── In-process MQTT 3.1.1 broker ────────────────────────────────────────

    use bytes::BytesMut;
    use rumqttc::mqttbytes::{self, v4};
    use rumqttc::{ConnAck, Publish, SubAck};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    const WATER_TEMP: &str = "rack0/sens/water/temperature";

    async fn read_packet(socket: &mut TcpStream, buf: &mut BytesMut) -> v4::Packet {
        loop {
            match v4::read(buf, 64 * 1024) {
                Ok(packet) => return packet,
                Err(mqttbytes::Error::InsufficientBytes(_)) => {}
                Err(e) => panic!("malformed packet from client: {e:?}"),
            }
            let n = socket.read_buf(buf).await.unwrap();
            assert!(n > 0, "client closed the socket");
        }
    }

    async fn send(socket: &mut TcpStream, write: impl FnOnce(&mut BytesMut)) {
        let mut out = BytesMut::new();
        write(&mut out);
        socket.write_all(&out).await.unwrap();
    }

    /// Scripted broker: CONNACK, then one early PUBLISH after the SUBSCRIBE,
    /// then the SUBACK once `release` fires, then one more PUBLISH.
    struct Script {
        code: SubscribeReasonCode,
        subscribed: oneshot::Sender<Vec<String>>,
        release: oneshot::Receiver<()>,
    }

    async fn serve(listener: TcpListener, script: Script) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = BytesMut::new();

        assert!(matches!(read_packet(&mut socket, &mut buf).await, v4::Packet::Connect(_)));
        send(&mut socket, |out| {
            ConnAck::new(ConnectReturnCode::Success, false).write(out).unwrap();
        })
        .await;

        let v4::Packet::Subscribe(subscribe) = read_packet(&mut socket, &mut buf).await else {
            panic!("expected SUBSCRIBE");
        };
        let filters = subscribe.filters.iter().map(|f| f.path.clone()).collect();
        send(&mut socket, |out| {
            Publish::new(WATER_TEMP, QoS::AtMostOnce, "21.5").write(out).unwrap();
        })
        .await;
        script.subscribed.send(filters).unwrap();

        script.release.await.unwrap();
        send(&mut socket, |out| {
            SubAck::new(subscribe.pkid, vec![script.code]).write(out).unwrap();
            Publish::new(WATER_TEMP, QoS::AtMostOnce, "21.6").write(out).unwrap();
        })
        .await;

        // Hold the session open until the client goes away.
        let mut sink = [0u8; 256];
        while socket.read(&mut sink).await.is_ok_and(|n| n > 0) {}
    }

    async fn scripted_broker(
        code: SubscribeReasonCode,
    ) -> (MqttTransport, oneshot::Receiver<Vec<String>>, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (subscribed_tx, subscribed_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        tokio::spawn(serve(listener, Script {
            code,
            subscribed: subscribed_tx,
            release: release_rx,
        }));
        let transport = MqttTransport::new(
            MqttOptions::new("cultivo-test", "127.0.0.1", port),
            Duration::from_secs(5),
        );
        (transport, subscribed_rx, release_tx)
    }

    #[tokio::test]
    async fn subscribe_waits_for_suback_and_keeps_early_publishes() {
        let (mut transport, subscribed, release) =
            scripted_broker(SubscribeReasonCode::Success(QoS::AtMostOnce)).await;
        transport.connect().await.unwrap();

        let topics = vec![WATER_TEMP.to_string()];
        {
            let subscribe = transport.subscribe(&topics);
            tokio::pin!(subscribe);
            let filters = tokio::select! {
                result = &mut subscribe => panic!("subscribe returned before SUBACK: {result:?}"),
                filters = subscribed => filters.unwrap(),
            };
            assert_eq!(filters, topics);
            tokio::select! {
                result = &mut subscribe => panic!("subscribe returned before SUBACK: {result:?}"),
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
            release.send(()).unwrap();
            subscribe.await.unwrap();
        }

        let (topic, payload) = transport.next_message().await.unwrap();
        assert_eq!((topic.as_str(), payload.as_slice()), (WATER_TEMP, b"21.5".as_slice()));
        let (_, payload) = transport.next_message().await.unwrap();
        assert_eq!(payload, b"21.6");
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn refused_subscription_is_a_transport_error() {
        let (mut transport, subscribed, release) =
            scripted_broker(SubscribeReasonCode::Failure).await;
        transport.connect().await.unwrap();

        let topics = vec![WATER_TEMP.to_string()];
        let (result, _) = tokio::join!(transport.subscribe(&topics), async {
            subscribed.await.unwrap();
            release.send(()).unwrap();
        });
        assert!(matches!(result, Err(SyncError::Transport(_))), "{result:?}");
    }

    #[tokio::test]
    async fn operations_without_session_fail_cleanly() {
        let mut transport = MqttTransport::from_config(&SyncConfig::default());
        assert!(matches!(
            transport.subscribe(&["a/b".to_string()]).await,
            Err(SyncError::Transport(_))
        ));
        assert!(matches!(transport.next_message().await, Err(SyncError::Transport(_))));
        // Must be a no-op.
        transport.disconnect().await;
    }
}

//! MQTT transport implementation using `rumqttc`.
//!
//! This module provides an implementation of the `Transport` trait backed by
//! an MQTT broker connection. It follows an **actor-based concurrency model**
//! to safely integrate with the underlying MQTT client.
//!
//! ## Concurrency model
//!
//! - A single background **actor task** owns the MQTT `EventLoop`.
//! - The actor is responsible for:
//!   - publishing outbound messages via `AsyncClient`,
//!   - registering broker subscriptions,
//!   - polling the `EventLoop` for incoming publishes,
//!   - clean shutdown of the connection.
//! - All interaction with the MQTT client is serialized through this actor;
//!   no other task ever touches the event loop directly. The actor only uses
//!   the non-blocking `try_*` client calls, so it never waits on a request
//!   queue that only it can drain.
//!
//! ## Connection behavior
//!
//! [`create_transport`] blocks until the first CONNACK (or
//! `connect_timeout`). Any failure before that point is fatal and reported
//! as [`RpcError::Connection`]. After the first successful connect, link loss
//! moves the link signal to `Disconnected`; the actor keeps polling, which
//! makes rumqttc reconnect, and every known topic is resubscribed on the
//! next CONNACK.
//!
//! ## Message delivery semantics
//!
//! Incoming publishes are demultiplexed by exact topic and fanned out to all
//! local subscribers registered for that topic. Delivery is best-effort,
//! QoS 0, non-retained.
//!
//! ## Subscription confirmation
//!
//! Subscriptions wait for SUBACK confirmation before returning. SUBACK
//! packets carry only packet ids, so pending subscriptions are matched in
//! send order.

use rumqttc::{
    //
    AsyncClient,
    ConnectReturnCode,
    Event,
    EventLoop,
    MqttOptions,
    Outgoing,
    Packet,
    Publish,
    QoS,
};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_warn,
    Address,
    ConnectionState,
    Delivery,
    LinkSignal,
    Result,
    RpcConfig,
    RpcError,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportPtr,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const CLIENT_CAPACITY: usize = 64;
const INBOX_CAPACITY: usize = 256;
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

type SubscriberMap = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Delivery>>>>>;
type Responder = oneshot::Sender<Result<()>>;

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        topic: String,
        payload: Bytes,
        resp: Responder,
    },
    Subscribe {
        topic: String,
        resp: Responder,
    },
    Close {
        resp: Responder,
    },
}

enum ActorStep {
    //
    Continue,
    Stop,
}

impl Cmd {
    // ---

    /// Dispatches an actor command to the correct handler on the actor
    async fn handle(self, actor: &mut MqttActor) -> ActorStep {
        // ---
        match self {
            Cmd::Publish {
                topic,
                payload,
                resp,
            } => {
                let _ = resp.send(actor.handle_publish(topic, payload));
                ActorStep::Continue
            }
            Cmd::Subscribe { topic, resp } => {
                actor.handle_subscribe(topic, resp);
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                actor.handle_close().await;
                let _ = resp.send(Ok(()));
                ActorStep::Stop
            }
        }
    }
}

/// MQTT-based implementation of the `Transport` trait.
///
/// Represents a single broker connection.
struct RumqttcTransport {
    // ---
    base: TransportBase,
    cmd_tx: mpsc::Sender<Cmd>,
    subscribers: SubscriberMap,
    actor: Mutex<Option<JoinHandle<()>>>,
}

struct MqttActor {
    // ---
    transport_id: String, // for logging only
    client: AsyncClient,
    event_loop: EventLoop,
    cmd_rx: mpsc::Receiver<Cmd>,
    subscribers: SubscriberMap,
    link: LinkSignal,

    /// Resolved by the first CONNACK, or by the first error before it.
    connect_tx: Option<Responder>,

    /// Subscriptions awaiting SUBACK, in send order.
    pending_subscribes: VecDeque<(String, Responder)>,

    /// SUBACKs expected for reconnect resubscriptions; nobody awaits them.
    resubscribe_acks: usize,

    reconnect: bool,
}

impl MqttActor {
    // ---

    async fn run(mut self) {
        // ---
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd.handle(&mut self).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                event = self.event_loop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            self.handle_incoming(publish).await;
                        }
                        Ok(Event::Incoming(Packet::SubAck(suback))) => {
                            self.handle_suback(suback);
                        }
                        Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                            if matches!(self.handle_connack(connack).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        Ok(_event) => {
                            // Other events (PingResp, PubAck, etc.) - ignore
                            log_debug!("{}: received mqtt event (ignored):{:?}",
                                       self.transport_id, _event);
                        }
                        Err(err) => {
                            if let Some(resp) = self.connect_tx.take() {
                                log_error!("{}: connect failed: {err}", self.transport_id);
                                let _ = resp.send(Err(RpcError::Connection(err.to_string())));
                                break;
                            }

                            if is_disconnect(&err) {
                                self.reconnect = true;
                                self.link.set(ConnectionState::Disconnected);
                                self.fail_pending_subscribes();
                                log_error!("{}: broker disconnected: {err}", self.transport_id);
                            } else {
                                log_error!("{}: mqtt error: {err}", self.transport_id);
                            }
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            }
        }

        log_debug!("{}: mqtt actor stopped", self.transport_id);
    }

    /// Publishes payload bytes with QoS 0 (at most once), no retain.
    fn handle_publish(&mut self, topic: String, payload: Bytes) -> Result<()> {
        // ---
        self.client
            .try_publish(topic.as_str(), QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|err| {
                log_error!(
                    "{}: publish failed for topic {topic}: {err}",
                    self.transport_id
                );
                RpcError::Transport(format!("publish to {topic} failed: {err}"))
            })
    }

    /// Sends a SUBSCRIBE and queues the responder for SUBACK confirmation.
    fn handle_subscribe(&mut self, topic: String, resp: Responder) {
        // ---
        if let Err(err) = self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            log_error!(
                "{}: failed to send subscribe for topic {topic}: {err}",
                self.transport_id
            );
            let _ = resp.send(Err(RpcError::Transport(format!(
                "subscribe to {topic} failed: {err}"
            ))));
            return;
        }

        self.pending_subscribes.push_back((topic, resp));
    }

    /// Completes the oldest pending subscription (or a resubscription).
    fn handle_suback(&mut self, suback: rumqttc::SubAck) {
        // ---
        if self.resubscribe_acks > 0 {
            self.resubscribe_acks -= 1;
            log_debug!("{}: SUBACK received for reconnect re-subscribe", self.transport_id);
            if self.resubscribe_acks == 0 {
                self.link.set(ConnectionState::Connected);
            }
            return;
        }

        let Some((topic, responder)) = self.pending_subscribes.pop_front() else {
            log_warn!("{}: unexpected SUBACK {}", self.transport_id, suback.pkid);
            return;
        };

        let success = suback
            .return_codes
            .iter()
            .all(|code| !matches!(code, rumqttc::SubscribeReasonCode::Failure));

        if success {
            log_info!("{}: successfully subscribed to topic {topic}", self.transport_id);
            let _ = responder.send(Ok(()));
        } else {
            log_error!(
                "{}: subscription failed for topic {topic}: {:?}",
                self.transport_id,
                suback.return_codes
            );
            let _ = responder.send(Err(RpcError::Transport(format!(
                "broker rejected subscription to {topic}"
            ))));
        }
    }

    /// Processes a CONNACK: resolves the initial connect or resubscribes.
    async fn handle_connack(&mut self, connack: rumqttc::ConnAck) -> ActorStep {
        // ---
        if connack.code != ConnectReturnCode::Success {
            log_error!(
                "{}: connection refused: {:?}",
                self.transport_id,
                connack.code
            );
            if let Some(resp) = self.connect_tx.take() {
                let _ = resp.send(Err(RpcError::Connection(format!(
                    "broker refused connection: {:?}",
                    connack.code
                ))));
                return ActorStep::Stop;
            }
            return ActorStep::Continue;
        }

        log_info!("{}: connected to broker", self.transport_id);

        if let Some(resp) = self.connect_tx.take() {
            let _ = resp.send(Ok(()));
        }

        if self.reconnect {
            self.reconnect = false;

            let topics: Vec<String> = {
                let map = self.subscribers.read().await;
                map.keys().cloned().collect()
            };

            for topic in topics {
                match self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                    Ok(()) => {
                        self.resubscribe_acks += 1;
                        log_info!("{}: resubscribed to {topic}", self.transport_id);
                    }
                    Err(err) => {
                        log_error!("{}: resubscribe failed for {topic}: {err}", self.transport_id);
                    }
                }
            }
        }

        // After a reconnect the link is up only once every resubscription is
        // acknowledged; see `handle_suback`.
        if self.resubscribe_acks == 0 {
            self.link.set(ConnectionState::Connected);
        }
        ActorStep::Continue
    }

    fn fail_pending_subscribes(&mut self) {
        // ---
        self.resubscribe_acks = 0;
        for (topic, responder) in self.pending_subscribes.drain(..) {
            let _ = responder.send(Err(RpcError::Transport(format!(
                "link lost before SUBACK for {topic}"
            ))));
        }
    }

    /// Disconnects from the MQTT broker, flushing the DISCONNECT packet.
    async fn handle_close(&mut self) {
        // ---
        log_debug!("{}: disconnecting mqtt client", self.transport_id);

        if let Err(_err) = self.client.try_disconnect() {
            log_debug!("{}: mqtt disconnect failed: {_err}", self.transport_id);
            return;
        }

        let flush = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        let _ = tokio::time::timeout(DISCONNECT_FLUSH, flush).await;
    }

    /// Fans an incoming publish out to local subscribers of its topic.
    ///
    /// Subscribers whose handle was dropped are evicted. A full inbox drops
    /// the message for that subscriber only.
    async fn handle_incoming(&mut self, publish: Publish) {
        // ---
        let senders = {
            let map = self.subscribers.read().await;
            map.get(&publish.topic).cloned()
        };

        let Some(senders) = senders else {
            log_debug!("{}: no subscribers for {}", self.transport_id, publish.topic);
            return;
        };

        let delivery = Delivery {
            topic: Address::from(publish.topic.as_str()),
            payload: publish.payload,
        };

        let mut evicted = false;
        for tx in &senders {
            match tx.try_send(delivery.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log_warn!("{}: inbox full, dropping message on {}",
                              self.transport_id, delivery.topic);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => evicted = true,
            }
        }

        if evicted {
            let mut map = self.subscribers.write().await;
            if let Some(list) = map.get_mut(&publish.topic) {
                list.retain(|tx| !tx.is_closed());
            }
        }
    }
} // MqttActor

fn is_disconnect(err: &rumqttc::ConnectionError) -> bool {
    // ---
    matches!(
        err,
        rumqttc::ConnectionError::Io(_) | rumqttc::ConnectionError::MqttState(_)
    )
}

impl RumqttcTransport {
    // ---
    async fn request(&self, cmd: Cmd, rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        // ---
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| RpcError::Transport(format!("{}: transport closed", self.transport_id())))?;

        rx.await
            .map_err(|_| RpcError::Transport(format!("{}: actor stopped", self.transport_id())))?
    }
}

#[async_trait::async_trait]
impl Transport for RumqttcTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, topic: &Address, payload: Bytes) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();
        let cmd = Cmd::Publish {
            topic: topic.0.to_string(),
            payload,
            resp: tx,
        };
        self.request(cmd, rx).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        let topic = sub.0.to_string();

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        {
            let mut map = self.subscribers.write().await;
            map.entry(topic.clone()).or_default().push(tx);
        }

        let (resp_tx, resp_rx) = oneshot::channel();
        self.request(
            Cmd::Subscribe {
                topic,
                resp: resp_tx,
            },
            resp_rx,
        )
        .await?;

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self) -> Result<()> {
        // ---
        let Some(actor) = self.actor.lock().await.take() else {
            return Ok(());
        };

        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Cmd::Close { resp: tx }).await;
        let _ = rx.await;
        let _ = actor.await;

        self.subscribers.write().await.clear();
        self.base.link.set(ConnectionState::Closed);
        Ok(())
    }
}

/// Creates a rumqttc-based MQTT transport and connects it to the broker.
///
/// # Errors
///
/// Returns [`RpcError::Connection`] if the broker refuses the connection,
/// is unreachable, or does not answer within `config.connect_timeout`.
pub async fn create_transport(config: &RpcConfig) -> Result<TransportPtr> {
    // ---
    let (client, event_loop) = create_mqtt_client(config);

    let base = TransportBase::new(config.client_id.as_str(), ConnectionState::Connecting);
    let (cmd_tx, cmd_rx) = mpsc::channel(CLIENT_CAPACITY);
    let (connect_tx, connect_rx) = oneshot::channel();
    let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));

    let actor = MqttActor {
        transport_id: config.client_id.clone(),
        client,
        event_loop,
        cmd_rx,
        subscribers: Arc::clone(&subscribers),
        link: base.link.clone(),
        connect_tx: Some(connect_tx),
        pending_subscribes: VecDeque::new(),
        resubscribe_acks: 0,
        reconnect: false,
    };
    let handle = tokio::spawn(actor.run());

    log_info!(
        "{}: connecting to {}:{}",
        config.client_id,
        config.host,
        config.port
    );

    let outcome = tokio::time::timeout(config.connect_timeout, connect_rx).await;
    let connected = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(RpcError::Connection("mqtt actor stopped during connect".into())),
        Err(_) => Err(RpcError::Connection(format!(
            "no CONNACK from {}:{} within {:?}",
            config.host, config.port, config.connect_timeout
        ))),
    };

    if let Err(err) = connected {
        handle.abort();
        return Err(err);
    }

    Ok(Arc::new(RumqttcTransport {
        base,
        cmd_tx,
        subscribers,
        actor: Mutex::new(Some(handle)),
    }))
}

/// Creates an MQTT client and event loop from the given configuration.
///
/// `AsyncClient::new()` is infallible; the connection happens on first poll.
fn create_mqtt_client(config: &RpcConfig) -> (AsyncClient, EventLoop) {
    // ---
    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);

    if !config.username.is_empty() {
        mqtt_options.set_credentials(
            config.username.as_str(),
            config.password.clone().unwrap_or_default(),
        );
    }

    if let Some(keep_alive_secs) = config.keep_alive_secs {
        mqtt_options.set_keep_alive(Duration::from_secs(u64::from(keep_alive_secs)));
    }

    AsyncClient::new(mqtt_options, CLIENT_CAPACITY)
}

use crate::Config;
use crate::MqttError;
use crate::MqttMessage;
use futures::channel::mpsc;
use futures::channel::oneshot;
use futures::SinkExt;
use futures::StreamExt;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::EventLoop;
use rumqttc::Packet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use tracing::error;
use tracing::info;

/// A connection to some MQTT broker
///
/// The connection never gives up: on any transport error the event loop
/// pauses for the configured delay and retries, replaying the subscriptions
/// and the initial message when the broker accepts the client again.
pub struct Connection {
    /// The channel of the input messages received by this connection.
    pub received: mpsc::UnboundedReceiver<MqttMessage>,

    /// The channel of the output messages to be published on this connection.
    pub published: mpsc::UnboundedSender<MqttMessage>,

    /// A channel to notify that all the published messages have been actually published.
    pub pub_done: oneshot::Receiver<()>,
}

impl Connection {
    /// Open a connection to the MQTT broker defined by the given `config`.
    ///
    /// The connection only receives messages published on the subscription
    /// topics of the config. Messages are published by sending them on the
    /// `published` channel; messages received from the subscriptions are
    /// read from the `received` channel.
    pub async fn new(config: &Config) -> Result<Connection, MqttError> {
        let (received_sender, received_receiver) = mpsc::unbounded();
        let (published_sender, published_receiver) = mpsc::unbounded();
        let (pub_done_sender, pub_done_receiver) = oneshot::channel();

        let mqtt_options = config.rumqttc_options();
        let (mqtt_client, event_loop) = AsyncClient::new(mqtt_options, config.queue_capacity);

        info!(
            "MQTT connecting to broker: host={}:{} via {:?}, client_id={:?}",
            config.host, config.port, config.transport, config.client_id
        );

        tokio::spawn(Connection::receiver_loop(
            mqtt_client.clone(),
            config.clone(),
            event_loop,
            received_sender,
        ));
        tokio::spawn(Connection::sender_loop(
            mqtt_client,
            published_receiver,
            pub_done_sender,
        ));

        Ok(Connection {
            received: received_receiver,
            published: published_sender,
            pub_done: pub_done_receiver,
        })
    }

    /// Close the connection, waiting for the pending published messages.
    pub async fn close(self) {
        self.published.close_channel();
        let _ = self.pub_done.await;
    }

    /// Poll the broker, forwarding received messages to the client.
    ///
    /// On ConnAck the subscriptions are replayed and the initial message,
    /// if any, is published. Transport errors pause the loop but never
    /// terminate it.
    async fn receiver_loop(
        mqtt_client: AsyncClient,
        config: Config,
        mut event_loop: EventLoop,
        mut message_sender: mpsc::UnboundedSender<MqttMessage>,
    ) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    // Errors on send are ignored: it just means the client has closed the receiving channel.
                    // One has to continue the loop though, because rumqttc relies on this polling.
                    let _ = message_sender.send(msg.into()).await;
                }

                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != rumqttc::ConnectReturnCode::Success {
                        error!("MQTT connection rejected: {:?}", ack.code);
                        Connection::pause(config.reconnect_pause).await;
                        continue;
                    }

                    info!("MQTT connection established");

                    let subscriptions = config.subscriptions.filters();
                    if !subscriptions.is_empty() {
                        if let Err(err) = mqtt_client.subscribe_many(subscriptions).await {
                            error!("MQTT failed to subscribe: {err}");
                        }
                    }

                    if let Some(ref imsg_fn) = config.initial_message {
                        let message = imsg_fn.new_init_message();
                        if let Err(err) = mqtt_client
                            .publish(
                                message.topic.name.clone(),
                                message.qos,
                                message.retain,
                                message.payload_bytes().to_vec(),
                            )
                            .await
                        {
                            error!("MQTT failed to publish the initial message: {err}");
                        }
                    }
                }

                Ok(Event::Incoming(Packet::Disconnect))
                | Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                    info!("MQTT connection closed");
                    break;
                }

                Err(err) => {
                    error!(
                        "MQTT connection error on '{host}:{port}': {err}",
                        host = config.host,
                        port = config.port
                    );
                    Connection::pause(config.reconnect_pause).await;
                }
                _ => (),
            }
        }
        // No more messages will be forwarded to the client
        let _ = message_sender.close().await;
    }

    /// Forward the messages sent by the client to the broker.
    async fn sender_loop(
        mqtt_client: AsyncClient,
        mut messages_receiver: mpsc::UnboundedReceiver<MqttMessage>,
        done: oneshot::Sender<()>,
    ) {
        while let Some(message) = messages_receiver.next().await {
            let payload = Vec::from(message.payload_bytes());
            debug!("MQTT publish on {}", message.topic.name);
            if let Err(err) = mqtt_client
                .publish(message.topic, message.qos, message.retain, payload)
                .await
            {
                error!("MQTT failed to publish: {err}");
            }
        }

        // The sender channel has been closed by the client:
        // no more messages will be published.
        let _ = mqtt_client.disconnect().await;
        let _ = done.send(());
    }

    pub(crate) async fn pause(delay: Duration) {
        sleep(delay).await;
    }
}

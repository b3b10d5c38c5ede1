use crate::MqttMessage;
use crate::TopicFilter;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::sync::Arc;
use std::time::Duration;

/// How to reach the broker
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum Transport {
    /// Plain MQTT over TCP (usually port 1883)
    #[default]
    Tcp,

    /// MQTT over WebSocket, on the `/mqtt` path (usually port 8000)
    WebSocket,
}

/// Configuration of an MQTT connection
#[derive(Debug, Clone)]
pub struct Config {
    /// MQTT host to connect to
    ///
    /// Default: "localhost"
    pub host: String,

    /// MQTT port to connect to
    ///
    /// Default: 1883
    pub port: u16,

    /// The transport used to reach the broker
    ///
    /// Default: `Transport::Tcp`
    pub transport: Transport,

    /// The client identifier sent to the broker
    ///
    /// If none is provided, a random one is created on connect
    /// and the session is clean.
    ///
    /// Default: None
    pub client_id: Option<String>,

    /// The list of topics to subscribe to on connect
    ///
    /// Default: An empty topic list
    pub subscriptions: TopicFilter,

    /// Capacity of the internal message queues
    ///
    /// Default: `1024`.
    pub queue_capacity: usize,

    /// Maximum size for a message payload
    ///
    /// Default: `1024 * 1024`.
    pub max_packet_size: usize,

    /// A message published on connect and on every reconnect
    ///
    /// Default: None
    pub initial_message: Option<InitMessageFn>,

    /// How long to pause before polling the broker again after a transport error
    ///
    /// Default: 5 seconds
    pub reconnect_pause: Duration,
}

#[derive(Clone)]
pub struct InitMessageFn {
    initfn: Arc<dyn Fn() -> MqttMessage + Send + Sync>,
}

impl InitMessageFn {
    pub fn new(call_back: impl Fn() -> MqttMessage + Sync + Send + 'static) -> InitMessageFn {
        InitMessageFn {
            initfn: Arc::new(call_back),
        }
    }

    pub fn new_init_message(&self) -> MqttMessage {
        (*self.initfn)()
    }
}

impl Debug for InitMessageFn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Init message creation function")
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: String::from("localhost"),
            port: 1883,
            transport: Transport::Tcp,
            client_id: None,
            subscriptions: TopicFilter::empty(),
            queue_capacity: 1024,
            max_packet_size: 1024 * 1024,
            initial_message: None,
            reconnect_pause: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Set a custom host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set a custom port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the transport
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Set the client identifier
    pub fn with_client_id(self, id: impl Into<String>) -> Self {
        Self {
            client_id: Some(id.into()),
            ..self
        }
    }

    /// Add a list of topics to subscribe to on connect
    ///
    /// Can be called several times to subscribe to many topics.
    pub fn with_subscriptions(mut self, topics: TopicFilter) -> Self {
        self.subscriptions.add_all(topics);
        self
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(self, queue_capacity: usize) -> Self {
        Self {
            queue_capacity,
            ..self
        }
    }

    /// Set the initial message
    pub fn with_initial_message(
        self,
        initial_message: impl Fn() -> MqttMessage + Send + Sync + 'static,
    ) -> Self {
        Self {
            initial_message: Some(InitMessageFn::new(initial_message)),
            ..self
        }
    }

    /// Set the pause applied after a transport error
    pub fn with_reconnect_pause(self, reconnect_pause: Duration) -> Self {
        Self {
            reconnect_pause,
            ..self
        }
    }

    /// Wrap this config into an internal set of options for `rumqttc`.
    pub(crate) fn rumqttc_options(&self) -> rumqttc::MqttOptions {
        let id = match &self.client_id {
            None => std::iter::repeat_with(|| char::from(b'a' + rand::random::<u8>() % 26))
                .take(10)
                .collect(),
            Some(name) => name.clone(),
        };

        // With the websocket transport rumqttc expects the broker address
        // to be the full URL; the port argument is then ignored.
        let mut mqtt_options = match self.transport {
            Transport::Tcp => rumqttc::MqttOptions::new(id, &self.host, self.port),
            Transport::WebSocket => {
                let url = format!("ws://{}:{}/mqtt", self.host, self.port);
                let mut options = rumqttc::MqttOptions::new(id, url, self.port);
                options.set_transport(rumqttc::Transport::Ws);
                options
            }
        };

        // Sessions are not reused across connections: subscriptions are
        // replayed by the receiver loop on every ConnAck.
        mqtt_options.set_clean_session(true);
        mqtt_options.set_max_packet_size(self.max_packet_size, self.max_packet_size);

        mqtt_options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_local_broker() {
        let config = Config::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.transport, Transport::Tcp);
    }

    #[test]
    fn builder_accumulates_subscriptions() {
        let config = Config::default()
            .with_subscriptions(TopicFilter::new_unchecked("xsctrl/commands/xsedge-1"))
            .with_subscriptions(TopicFilter::new_unchecked("xsctrl/rules/all"));
        assert_eq!(config.subscriptions.patterns.len(), 2);
    }
}

//! The broker bridge.
//!
//! Three concurrent roles, each on its own broker connection so that a
//! failure of one cannot tear down the others:
//!
//! - the **publisher** relays bus events upstream as
//!   `xsedge/<edge_id>/<topic>` and announces the edge on `xsedge/register`
//!   whenever its connection is (re)established;
//! - the **command listener** feeds `xsctrl/commands/<edge_id>` into the
//!   command handler;
//! - the **rules listener** feeds `xsctrl/rules/<edge_id>` and
//!   `xsctrl/rules/all` into rules sync.
//!
//! Connection recovery is handled inside `xs_mqtt`: each role pauses five
//! seconds after a transport error and retries forever.

use crate::bus::BridgeSink;
use crate::bus::DataBus;
use crate::command::CommandHandler;
use crate::rules_sync::RulesSync;
use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use xs_api::topics;
use xs_api::RegisterPayload;
use xs_api::TelemetryEnvelope;
use xs_mqtt::Config;
use xs_mqtt::Connection;
use xs_mqtt::MqttError;
use xs_mqtt::MqttMessage;
use xs_mqtt::StreamExt;
use xs_mqtt::Transport;
use xs_mqtt::UnboundedSender;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    pub edge_id: String,
    pub version: String,
}

/// The edge identifier: as configured, else a random 4-digit suffix chosen
/// once per process.
pub fn edge_client_id(configured: Option<String>) -> String {
    configured
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("xsedge-{:04}", rand::rng().random_range(0..10_000)))
}

/// The bus-facing side of the publisher role.
///
/// Events are handed over to the publisher connection without waiting for
/// broker I/O: a transport failure never blocks the local bus.
pub struct BusUplink {
    edge_id: String,
    sender: UnboundedSender<MqttMessage>,
}

#[async_trait]
impl BridgeSink for BusUplink {
    async fn forward(&self, topic: &str, data: &Value) -> anyhow::Result<()> {
        let envelope = TelemetryEnvelope {
            edge_id: self.edge_id.clone(),
            topic: topic.to_string(),
            data: data.clone(),
        };
        let message =
            MqttMessage::json(&topics::telemetry_topic(&self.edge_id, topic), &envelope)?;
        self.sender
            .unbounded_send(message)
            .map_err(|_| anyhow::anyhow!("bridge publisher connection closed"))?;
        Ok(())
    }
}

pub struct MqttBridge {
    publisher: Connection,
    _command_publish: UnboundedSender<MqttMessage>,
    _rules_publish: UnboundedSender<MqttMessage>,
}

impl MqttBridge {
    /// Open the three role connections, attach the publisher to the bus and
    /// start the listener workers.
    pub async fn start(
        config: &BridgeConfig,
        bus: &Arc<DataBus>,
        command_handler: CommandHandler,
        rules_sync: RulesSync,
    ) -> Result<MqttBridge, MqttError> {
        info!(
            "[Bridge] Connecting to MQTT broker {}:{} as {}",
            config.host, config.port, config.edge_id
        );

        let base = Config::default()
            .with_host(&config.host)
            .with_port(config.port)
            .with_transport(config.transport);

        // Publisher role: no subscriptions, announces the edge on connect.
        let register = RegisterPayload {
            edge_id: config.edge_id.clone(),
            version: config.version.clone(),
        };
        let publisher_config = base
            .clone()
            .with_client_id(format!("{}-pub", config.edge_id))
            .with_initial_message(move || {
                let payload = serde_json::to_vec(&register).unwrap_or_default();
                MqttMessage::new(&topics::register_topic(), payload)
            });
        let publisher = Connection::new(&publisher_config).await?;

        let uplink = BusUplink {
            edge_id: config.edge_id.clone(),
            sender: publisher.published.clone(),
        };
        bus.attach_bridge(Arc::new(uplink));

        // Command listener role.
        let command_config = base
            .clone()
            .with_client_id(format!("{}-cmd", config.edge_id))
            .with_subscriptions(topics::command_filter(&config.edge_id));
        let commands = Connection::new(&command_config).await?;
        let command_publish = commands.published.clone();
        let mut command_messages = commands.received;
        tokio::spawn(async move {
            while let Some(message) = command_messages.next().await {
                command_handler.handle(message.payload_bytes()).await;
            }
        });

        // Rules listener role.
        let rules_config = base
            .with_client_id(format!("{}-rules", config.edge_id))
            .with_subscriptions(topics::rules_filter(&config.edge_id));
        let rules = Connection::new(&rules_config).await?;
        let rules_publish = rules.published.clone();
        let mut rules_messages = rules.received;
        tokio::spawn(async move {
            while let Some(message) = rules_messages.next().await {
                rules_sync.handle_update(message.payload_bytes()).await;
            }
        });

        info!("[Bridge] Connected to broker");
        Ok(MqttBridge {
            publisher,
            _command_publish: command_publish,
            _rules_publish: rules_publish,
        })
    }

    /// Detach from the bus side first, then close the publisher connection,
    /// waiting for pending publishes.
    pub async fn close(self, bus: &DataBus) {
        bus.detach_bridge();
        self.publisher.close().await;
        info!("[Bridge] Disconnected from broker");
    }
}

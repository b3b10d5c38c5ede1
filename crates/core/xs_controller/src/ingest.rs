//! The telemetry ingest loop.
//!
//! One subscription covers everything the fleet publishes (`xsedge/#`).
//! Register messages upsert the edge record; everything else is appended
//! to the telemetry log, correlated with pending commands when it carries
//! an acknowledgement, and fanned out to the live observers. A failure on
//! one message never stops the loop; broker loss pauses it five seconds
//! and the subscription is replayed on reconnect.

use crate::observers::ObserverRegistry;
use crate::store::ControllerStore;
use std::sync::Arc;
use tracing::debug;
use tracing::error;
use tracing::info;
use xs_api::topics;
use xs_api::topics::EdgeEvent;
use xs_api::RegisterPayload;
use xs_api::TelemetryEnvelope;
use xs_mqtt::Config;
use xs_mqtt::Connection;
use xs_mqtt::MqttError;
use xs_mqtt::MqttMessage;
use xs_mqtt::StreamExt;

pub async fn run(
    mqtt_config: Config,
    store: Arc<ControllerStore>,
    observers: Arc<ObserverRegistry>,
) -> Result<(), MqttError> {
    let connection = Connection::new(
        &mqtt_config.with_subscriptions(topics::edge_events_filter()),
    )
    .await?;
    info!("[MQTT] Subscribed xsedge/#");

    let mut received = connection.received;
    // Keeping the publish side alive keeps the connection open.
    let _publish = connection.published;

    while let Some(message) = received.next().await {
        handle_message(&store, &observers, &message);
    }
    Ok(())
}

/// Route one ingested message. Failures are logged per message.
pub(crate) fn handle_message(
    store: &ControllerStore,
    observers: &ObserverRegistry,
    message: &MqttMessage,
) {
    match EdgeEvent::parse(&message.topic.name) {
        EdgeEvent::Register => match message.payload_json::<RegisterPayload>() {
            Ok(register) => {
                if let Err(err) = store.upsert_edge(&register.edge_id, &register.version) {
                    error!("[REGISTER] Error processing registration: {err}");
                } else {
                    info!(
                        "[REGISTER] Edge {} registered (v{})",
                        register.edge_id, register.version
                    );
                }
            }
            Err(err) => error!("[REGISTER] Error processing registration: {err}"),
        },

        EdgeEvent::Telemetry { .. } => {
            let envelope = match message.payload_json::<TelemetryEnvelope>() {
                Ok(envelope) => envelope,
                Err(err) => {
                    error!("[MQTT] payload error: {err}");
                    return;
                }
            };

            let data = envelope.data.to_string();
            if let Err(err) = store.insert_telemetry(&envelope.edge_id, &envelope.topic, &data) {
                error!("[MQTT] cannot persist telemetry: {err}");
            }
            debug!(
                "[MQTT] saved telemetry from {} topic={}",
                envelope.edge_id, envelope.topic
            );

            if topics::is_ack_channel(&envelope.topic) {
                correlate_ack(store, &envelope);
            }

            if let Ok(payload) = message.payload_str() {
                observers.broadcast(payload);
            }
        }

        EdgeEvent::Unknown => debug!("[MQTT] ignoring {}", message.topic.name),
    }
}

/// Mark the command named by the ack payload as acknowledged.
fn correlate_ack(store: &ControllerStore, envelope: &TelemetryEnvelope) {
    let Some(cmd_id) = envelope.data.get("cmd_id").and_then(|id| id.as_str()) else {
        // Rules-update acks carry no cmd_id; nothing to correlate.
        return;
    };
    let result = envelope
        .data
        .get("result")
        .and_then(|result| result.as_str())
        .unwrap_or("");

    match store.ack_command(cmd_id, result) {
        Ok(true) => info!("[ACK] Command {cmd_id} acknowledged: {result}"),
        Ok(false) => debug!("[ACK] No pending command {cmd_id}"),
        Err(err) => error!("[ACK] cannot update command {cmd_id}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xs_mqtt::Topic;

    fn message(topic: &str, payload: serde_json::Value) -> MqttMessage {
        MqttMessage::new(&Topic::new_unchecked(topic), payload.to_string())
    }

    #[test]
    fn register_messages_upsert_the_edge() {
        let store = ControllerStore::open_in_memory().unwrap();
        let observers = ObserverRegistry::new();

        handle_message(
            &store,
            &observers,
            &message("xsedge/register", json!({"edge_id": "edge-A", "version": "1.0.0"})),
        );

        let edges = store.list_edges().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge_id, "edge-A");
        assert_eq!(edges[0].status, "ONLINE");
        // Register messages are not telemetry.
        assert!(store.latest_telemetry(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn telemetry_is_persisted_and_broadcast() {
        let store = ControllerStore::open_in_memory().unwrap();
        let observers = ObserverRegistry::new();
        let (_id, mut observer) = observers.add();

        let payload = json!({
            "edge_id": "edge-A",
            "topic": "network/metrics",
            "data": {"network_latency": 182},
        });
        handle_message(&store, &observers, &message("xsedge/edge-A/network/metrics", payload.clone()));

        let rows = store.latest_telemetry(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].topic, "network/metrics");

        let broadcast = observer.recv().await.unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&broadcast).unwrap(),
            payload
        );
    }

    #[test]
    fn acks_transition_their_command_exactly_once() {
        let store = ControllerStore::open_in_memory().unwrap();
        let observers = ObserverRegistry::new();
        store.insert_command("cmd-1", "edge-A", "{}").unwrap();

        let ack = json!({
            "edge_id": "edge-A",
            "topic": "ack/cmd-1",
            "data": {"cmd_id": "cmd-1", "edge_id": "edge-A", "status": "ack", "result": "Reloaded 1 rules"},
        });
        handle_message(&store, &observers, &message("xsedge/edge-A/ack/cmd-1", ack.clone()));
        handle_message(&store, &observers, &message("xsedge/edge-A/ack/cmd-1", ack));

        let entry = store.command("cmd-1").unwrap().unwrap();
        assert_eq!(entry.status, "ACK");
        assert_eq!(entry.result.as_deref(), Some("Reloaded 1 rules"));

        // The ack is also ordinary telemetry.
        assert_eq!(store.latest_telemetry(10).unwrap().len(), 2);
    }

    #[test]
    fn rules_acks_without_cmd_id_are_plain_telemetry() {
        let store = ControllerStore::open_in_memory().unwrap();
        let observers = ObserverRegistry::new();

        let ack = json!({
            "edge_id": "edge-A",
            "topic": "ack/rules_update/edge-A",
            "data": {"edge_id": "edge-A", "status": "ack", "result": "2 rules updated"},
        });
        handle_message(
            &store,
            &observers,
            &message("xsedge/edge-A/ack/rules_update/edge-A", ack),
        );

        assert_eq!(store.latest_telemetry(10).unwrap().len(), 1);
    }

    #[test]
    fn malformed_payloads_do_not_stop_the_loop() {
        let store = ControllerStore::open_in_memory().unwrap();
        let observers = ObserverRegistry::new();

        handle_message(
            &store,
            &observers,
            &MqttMessage::new(&Topic::new_unchecked("xsedge/edge-A/t"), "not json"),
        );
        handle_message(
            &store,
            &observers,
            &MqttMessage::new(&Topic::new_unchecked("xsedge/register"), "{}"),
        );

        assert!(store.latest_telemetry(10).unwrap().is_empty());
        assert!(store.list_edges().unwrap().is_empty());
    }
}

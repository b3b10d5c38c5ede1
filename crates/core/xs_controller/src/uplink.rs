//! The controller's long-lived publish connection.
//!
//! Command dispatch and rules push share this single connection; the
//! `xs_mqtt` sender loop serializes their publishes in submission order.

use serde::Serialize;
use xs_mqtt::MqttError;
use xs_mqtt::MqttMessage;
use xs_mqtt::Topic;
use xs_mqtt::UnboundedSender;

#[derive(Clone)]
pub struct CtrlUplink {
    sender: UnboundedSender<MqttMessage>,
}

impl CtrlUplink {
    pub fn new(sender: UnboundedSender<MqttMessage>) -> Self {
        CtrlUplink { sender }
    }

    /// Hand a JSON payload to the publish connection.
    ///
    /// Fails when the payload cannot be encoded or the connection has been
    /// closed; transport errors after hand-over are logged by the
    /// connection itself and the message is dropped (no retry).
    pub fn publish_json<T: Serialize>(&self, topic: &Topic, value: &T) -> Result<(), MqttError> {
        let message = MqttMessage::json(topic, value)?;
        self.sender
            .unbounded_send(message)
            .map_err(|_| MqttError::SendOnClosedConnection)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn publishes_are_encoded_as_json() {
        let (sender, mut receiver) = mpsc::unbounded();
        let uplink = CtrlUplink::new(sender);

        uplink
            .publish_json(&Topic::new_unchecked("xsctrl/commands/edge-A"), &json!({"a": 1}))
            .unwrap();

        let message = receiver.next().await.unwrap();
        assert_eq!(message.topic.name, "xsctrl/commands/edge-A");
        assert_eq!(message.payload_str().unwrap(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn a_closed_connection_is_reported() {
        let (sender, receiver) = mpsc::unbounded();
        drop(receiver);
        let uplink = CtrlUplink::new(sender);

        let result = uplink.publish_json(&Topic::new_unchecked("t"), &json!({}));
        assert!(result.is_err());
    }
}

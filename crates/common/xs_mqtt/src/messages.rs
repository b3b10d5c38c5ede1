use crate::errors::MqttError;
use crate::topics::Topic;
use rumqttc::Publish;
use rumqttc::QoS;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A message to be sent to or received from MQTT.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MqttMessage {
    pub topic: Topic,
    pub payload: Payload,
    pub qos: QoS,
    pub retain: bool,
}

/// A message payload
pub type Payload = Vec<u8>;

impl MqttMessage {
    pub fn new<B>(topic: &Topic, payload: B) -> MqttMessage
    where
        B: Into<Payload>,
    {
        MqttMessage {
            topic: topic.clone(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        }
    }

    /// Build a message carrying the JSON encoding of the given value.
    pub fn json<T: Serialize>(topic: &Topic, value: &T) -> Result<MqttMessage, MqttError> {
        let payload = serde_json::to_vec(value)?;
        Ok(MqttMessage::new(topic, payload))
    }

    pub fn with_qos(self, qos: QoS) -> Self {
        Self { qos, ..self }
    }

    pub fn with_retain(self) -> Self {
        Self {
            retain: true,
            ..self
        }
    }

    /// The payload string (unless this payload is not UTF8)
    pub fn payload_str(&self) -> Result<&str, MqttError> {
        let bytes = self.payload_bytes();
        std::str::from_utf8(bytes).map_err(|err| MqttError::new_invalid_utf8_payload(bytes, err))
    }

    /// The payload decoded from JSON
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T, MqttError> {
        Ok(serde_json::from_slice(self.payload_bytes())?)
    }

    /// The bytes of the payload (except any trailing null char)
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload
            .strip_suffix(&[0])
            .unwrap_or(self.payload.as_slice())
    }
}

impl From<MqttMessage> for Publish {
    fn from(val: MqttMessage) -> Self {
        let mut publish = Publish::new(&val.topic.name, val.qos, val.payload);
        publish.retain = val.retain;
        publish
    }
}

impl From<Publish> for MqttMessage {
    fn from(msg: Publish) -> Self {
        let Publish {
            topic,
            payload,
            qos,
            retain,
            ..
        } = msg;

        MqttMessage {
            topic: Topic::new_unchecked(&topic),
            payload: payload.to_vec(),
            qos,
            retain,
        }
    }
}

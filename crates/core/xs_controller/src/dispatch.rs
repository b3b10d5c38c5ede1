//! Command dispatch.
//!
//! Each accepted request gets a fresh 128-bit hex `cmd_id`, a `SENT` log
//! entry, and a publish on the edge's command topic. The matching ack is
//! correlated by the ingest loop; a command whose publish fails stays
//! `SENT` pending operator action.

use crate::store::ControllerStore;
use crate::store::StoreError;
use crate::uplink::CtrlUplink;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use xs_api::topics;
use xs_api::CommandMessage;
use xs_api::Rule;
use xs_mqtt::MqttError;

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("Missing edge_id or command")]
    MissingField,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Broker publish failed: {0}")]
    Publish(#[from] MqttError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendCommandRequest {
    pub edge_id: Option<String>,
    pub command: Option<CommandBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandBody {
    pub action: Option<String>,
    #[serde(default)]
    pub params: Value,
    pub rules: Option<Vec<Rule>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReceipt {
    pub cmd_id: String,
    pub status: String,
}

pub struct CommandDispatcher {
    store: Arc<ControllerStore>,
    uplink: CtrlUplink,
}

impl CommandDispatcher {
    pub fn new(store: Arc<ControllerStore>, uplink: CtrlUplink) -> Self {
        CommandDispatcher { store, uplink }
    }

    pub fn send(&self, request: SendCommandRequest) -> Result<DispatchReceipt, DispatchError> {
        let (Some(edge_id), Some(command)) = (request.edge_id, request.command) else {
            return Err(DispatchError::MissingField);
        };

        let cmd_id = new_cmd_id();
        let action = command.action.as_deref().unwrap_or("reload_rules");
        let mut message = CommandMessage::new(&cmd_id, &edge_id, action, command.params);
        message.rules = command.rules;

        let encoded = serde_json::to_string(&message).unwrap_or_default();
        self.store.insert_command(&cmd_id, &edge_id, &encoded)?;

        // The log entry stays SENT if the publish fails: no retry here.
        self.uplink
            .publish_json(&topics::command_topic(&edge_id), &message)?;
        info!("[CMD] Sent to {edge_id}: {encoded}");

        Ok(DispatchReceipt {
            cmd_id,
            status: "sent".to_string(),
        })
    }
}

/// A fresh 128-bit command identifier, hex-encoded.
pub fn new_cmd_id() -> String {
    format!("{:032x}", rand::rng().random::<u128>())
}

use crate::Rule;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// The JSON envelope wrapping every bus event bridged upstream.
///
/// Published on `xsedge/<edge_id>/<topic>`; `data` is arbitrary JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryEnvelope {
    pub edge_id: String,
    pub topic: String,
    pub data: Value,
}

/// Published on `xsedge/register` whenever an edge (re)connects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterPayload {
    pub edge_id: String,
    #[serde(default = "unknown_version")]
    pub version: String,
}

fn unknown_version() -> String {
    "unknown".to_string()
}

/// A controller command, published on `xsctrl/commands/<edge_id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandMessage {
    pub cmd_id: String,
    pub edge_id: String,
    #[serde(rename = "type", default = "command_type")]
    pub kind: String,
    pub action: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// `reload_rules` may carry the new ruleset inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,
}

fn command_type() -> String {
    "command".to_string()
}

impl CommandMessage {
    pub fn new(cmd_id: &str, edge_id: &str, action: &str, params: Value) -> Self {
        CommandMessage {
            cmd_id: cmd_id.to_string(),
            edge_id: edge_id.to_string(),
            kind: command_type(),
            action: action.to_string(),
            params,
            timestamp: Some(now_rfc3339()),
            rules: None,
        }
    }
}

/// The acknowledgement an edge emits after executing a command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd_id: Option<String>,
    pub edge_id: String,
    pub status: String,
    pub result: String,
}

impl AckPayload {
    pub fn for_command(cmd_id: &str, edge_id: &str, result: impl Into<String>) -> Self {
        AckPayload {
            cmd_id: Some(cmd_id.to_string()),
            edge_id: edge_id.to_string(),
            status: "ack".to_string(),
            result: result.into(),
        }
    }

    pub fn for_rules_update(edge_id: &str, rule_count: usize) -> Self {
        AckPayload {
            cmd_id: None,
            edge_id: edge_id.to_string(),
            status: "ack".to_string(),
            result: format!("{rule_count} rules updated"),
        }
    }
}

/// A pushed ruleset: either `{"rules": […]}` or a bare array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RulesPayload {
    Wrapped { rules: Vec<Rule> },
    Bare(Vec<Rule>),
}

impl RulesPayload {
    pub fn into_rules(self) -> Vec<Rule> {
        match self {
            RulesPayload::Wrapped { rules } => rules,
            RulesPayload::Bare(rules) => rules,
        }
    }
}

/// The current wall-clock instant, RFC3339-encoded for wire payloads.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

//! Execution of controller commands.
//!
//! Every well-formed command produces exactly one acknowledgement on the
//! bus topic `ack/<cmd_id>`, whatever the outcome; failures are captured in
//! the ack's `result` and never retried locally.

use crate::bus::DataBus;
use crate::file::write_file_atomic;
use crate::rules::RulesEngine;
use camino::Utf8PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing::info;
use xs_api::topics;
use xs_api::AckPayload;
use xs_api::CommandMessage;
use xs_api::Rule;

pub struct CommandHandler {
    edge_id: String,
    rules_path: Utf8PathBuf,
    rules: Arc<RulesEngine>,
    bus: Arc<DataBus>,
}

impl CommandHandler {
    pub fn new(
        edge_id: impl Into<String>,
        rules_path: Utf8PathBuf,
        rules: Arc<RulesEngine>,
        bus: Arc<DataBus>,
    ) -> Self {
        CommandHandler {
            edge_id: edge_id.into(),
            rules_path,
            rules,
            bus,
        }
    }

    /// Decode and execute one command, then acknowledge it.
    ///
    /// A payload that is not a command is dropped with an error log.
    pub async fn handle(&self, payload: &[u8]) {
        let command: CommandMessage = match serde_json::from_slice(payload) {
            Ok(command) => command,
            Err(err) => {
                error!("[CMD] dropping malformed command: {err}");
                return;
            }
        };

        let result = self.execute(&command);
        info!(
            "[CMD] {} executed '{}' -> {result}",
            self.edge_id, command.action
        );

        let ack = AckPayload::for_command(&command.cmd_id, &self.edge_id, result);
        let channel = topics::command_ack_channel(&command.cmd_id);
        match serde_json::to_value(&ack) {
            Ok(payload) => self.bus.publish(&channel, payload).await,
            Err(err) => error!("[CMD] cannot encode ack for {}: {err}", command.cmd_id),
        }
    }

    fn execute(&self, command: &CommandMessage) -> String {
        match command.action.as_str() {
            "reload_rules" => match self.reload_rules(command.rules.as_deref()) {
                Ok(count) => format!("Reloaded {count} rules"),
                Err(err) => format!("Error: {err}"),
            },
            action => format!("Unhandled action: {action}"),
        }
    }

    /// Persist the inline ruleset, if any, then reload the engine.
    fn reload_rules(&self, rules: Option<&[Rule]>) -> anyhow::Result<usize> {
        if let Some(rules) = rules {
            let text = serde_json::to_vec_pretty(rules)?;
            write_file_atomic(&self.rules_path, &text)?;
        }
        Ok(self.rules.load(&self.rules_path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serde_json::Value;

    fn handler(dir: &tempfile::TempDir) -> (CommandHandler, Arc<DataBus>, Arc<RulesEngine>) {
        let bus = Arc::new(DataBus::new(None));
        let rules = Arc::new(RulesEngine::new(None));
        let rules_path =
            Utf8PathBuf::from_path_buf(dir.path().join("config/rules_demo.json")).unwrap();
        let handler = CommandHandler::new("xsedge-0042", rules_path, rules.clone(), bus.clone());
        (handler, bus, rules)
    }

    #[tokio::test]
    async fn reload_rules_persists_and_acknowledges() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, bus, rules) = handler(&dir);
        let mut acks = bus.subscribe("ack/cmd-1");

        let command = json!({
            "cmd_id": "cmd-1",
            "edge_id": "xsedge-0042",
            "action": "reload_rules",
            "rules": [{"name": "HighLatency", "if": "network_latency > 150", "then": "alert"}],
        });
        handler.handle(command.to_string().as_bytes()).await;

        let ack: Value = acks.recv().await.unwrap();
        assert_eq!(ack["status"], "ack");
        assert_eq!(ack["cmd_id"], "cmd-1");
        assert_eq!(ack["result"], "Reloaded 1 rules");
        assert_eq!(rules.rule_count(), 1);
    }

    #[tokio::test]
    async fn unknown_actions_are_acknowledged_as_unhandled() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, bus, _rules) = handler(&dir);
        let mut acks = bus.subscribe("ack/cmd-2");

        let command = json!({
            "cmd_id": "cmd-2",
            "edge_id": "xsedge-0042",
            "action": "self_destruct",
        });
        handler.handle(command.to_string().as_bytes()).await;

        let ack: Value = acks.recv().await.unwrap();
        assert_eq!(ack["result"], "Unhandled action: self_destruct");
    }

    #[tokio::test]
    async fn execution_failures_are_captured_in_the_ack() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, bus, rules) = handler(&dir);
        let mut acks = bus.subscribe("ack/cmd-3");

        // No inline rules and no rules file on disk: the reload fails.
        let command = json!({
            "cmd_id": "cmd-3",
            "edge_id": "xsedge-0042",
            "action": "reload_rules",
        });
        handler.handle(command.to_string().as_bytes()).await;

        let ack: Value = acks.recv().await.unwrap();
        assert_eq!(ack["status"], "ack");
        assert!(ack["result"].as_str().unwrap().starts_with("Error:"));
        assert_eq!(rules.rule_count(), 0);
    }

    #[tokio::test]
    async fn malformed_commands_are_dropped_without_an_ack() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, bus, _rules) = handler(&dir);

        handler.handle(b"not json at all").await;

        let stats = bus.stats();
        assert!(stats.is_empty());
    }
}

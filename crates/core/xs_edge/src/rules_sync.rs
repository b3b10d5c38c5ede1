//! Application of controller-pushed rulesets.
//!
//! The pushed payload is persisted to the rules file, the engine is
//! reloaded from it, and an acknowledgement is published on
//! `ack/rules_update/<edge_id>`. Malformed payloads change nothing.

use crate::bus::DataBus;
use crate::file::write_file_atomic;
use crate::rules::RulesEngine;
use camino::Utf8PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing::info;
use tracing::warn;
use xs_api::topics;
use xs_api::AckPayload;
use xs_api::Rule;
use xs_api::RulesPayload;

pub struct RulesSync {
    edge_id: String,
    rules_path: Utf8PathBuf,
    rules: Arc<RulesEngine>,
    bus: Arc<DataBus>,
}

impl RulesSync {
    pub fn new(
        edge_id: impl Into<String>,
        rules_path: Utf8PathBuf,
        rules: Arc<RulesEngine>,
        bus: Arc<DataBus>,
    ) -> Self {
        RulesSync {
            edge_id: edge_id.into(),
            rules_path,
            rules,
            bus,
        }
    }

    /// Process one pushed ruleset, accepting both `{"rules": […]}` and a
    /// bare array.
    pub async fn handle_update(&self, payload: &[u8]) {
        let rules = match serde_json::from_slice::<RulesPayload>(payload) {
            Ok(payload) => payload.into_rules(),
            Err(err) => {
                warn!("[RulesSync] Unexpected format: {err}");
                return;
            }
        };

        if let Err(err) = self.apply(&rules) {
            error!("[RulesSync] Error processing rules update: {err}");
            return;
        }
        info!(
            "[RulesSync] Saved {} rules to {}",
            rules.len(),
            self.rules_path
        );

        let ack = AckPayload::for_rules_update(&self.edge_id, rules.len());
        let channel = topics::rules_ack_channel(&self.edge_id);
        match serde_json::to_value(&ack) {
            Ok(payload) => self.bus.publish(&channel, payload).await,
            Err(err) => error!("[RulesSync] cannot encode ack: {err}"),
        }
    }

    fn apply(&self, rules: &[Rule]) -> anyhow::Result<()> {
        let text = serde_json::to_vec_pretty(rules)?;
        write_file_atomic(&self.rules_path, &text)?;
        self.rules.load(&self.rules_path)?;
        Ok(())
    }
}

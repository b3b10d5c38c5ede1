//! Rules distribution.
//!
//! A push request names its targets explicitly (`edge_id`, `edges`) or asks
//! for a broadcast; the ruleset is saved for audit, recorded per target and
//! published sequentially on the uplink connection.

use crate::store::ControllerStore;
use crate::store::StoreError;
use crate::uplink::CtrlUplink;
use camino::Utf8PathBuf;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use xs_api::topics;
use xs_api::Rule;
use xs_mqtt::MqttError;

/// The sentinel recorded for a broadcast push.
const BROADCAST_TARGET: &str = "ALL";

#[derive(thiserror::Error, Debug)]
pub enum PushError {
    #[error("rules missing or empty")]
    NoRules,

    #[error("edge_id, edges or broadcast required")]
    NoTarget,

    #[error("Cannot save the ruleset: {0}")]
    Audit(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Broker publish failed: {0}")]
    Publish(#[from] MqttError),
}

impl PushError {
    /// Client mistakes get a 400; everything else is on the controller.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PushError::NoRules | PushError::NoTarget)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RulesPushRequest {
    pub edge_id: Option<String>,
    #[serde(default)]
    pub edges: Vec<String>,
    #[serde(default)]
    pub broadcast: bool,
    pub rules: Option<Vec<Rule>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RulesPushReceipt {
    pub status: String,
    pub targets: Vec<String>,
    pub rule_count: usize,
    pub topics: Vec<String>,
}

pub struct RulesPublisher {
    store: Arc<ControllerStore>,
    uplink: CtrlUplink,
    audit_path: Utf8PathBuf,
}

impl RulesPublisher {
    pub fn new(store: Arc<ControllerStore>, uplink: CtrlUplink, audit_path: Utf8PathBuf) -> Self {
        RulesPublisher {
            store,
            uplink,
            audit_path,
        }
    }

    pub fn push(&self, request: RulesPushRequest) -> Result<RulesPushReceipt, PushError> {
        let rules = match request.rules {
            Some(rules) if !rules.is_empty() => rules,
            _ => return Err(PushError::NoRules),
        };

        let mut targets: BTreeSet<String> = request.edges.into_iter().collect();
        if let Some(edge_id) = request.edge_id {
            targets.insert(edge_id);
        }
        if targets.is_empty() && !request.broadcast {
            return Err(PushError::NoTarget);
        }

        // Audit copy of the latest pushed ruleset.
        let encoded = serde_json::to_string_pretty(&rules).unwrap_or_default();
        std::fs::write(&self.audit_path, &encoded)?;
        info!("[Rules] Saved new ruleset -> {}", self.audit_path);

        let recorded = serde_json::to_string(&rules).unwrap_or_default();
        let mut published = Vec::new();

        for edge_id in &targets {
            let topic = topics::rules_topic(edge_id);
            self.store.insert_ruleset(edge_id, &recorded)?;
            self.uplink.publish_json(&topic, &rules)?;
            info!("[Rules] Published {} rules to {}", rules.len(), topic.name);
            published.push(topic.name);
        }

        if request.broadcast {
            let topic = topics::rules_broadcast_topic();
            self.store.insert_ruleset(BROADCAST_TARGET, &recorded)?;
            self.uplink.publish_json(&topic, &rules)?;
            info!("[Rules] Broadcasted {} rules to all edges", rules.len());
            published.push(topic.name);
        }

        let targets = if targets.is_empty() {
            vec![BROADCAST_TARGET.to_string()]
        } else {
            targets.into_iter().collect()
        };

        Ok(RulesPushReceipt {
            status: "published".to_string(),
            targets,
            rule_count: rules.len(),
            topics: published,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::channel::mpsc;
    use futures::StreamExt;

    fn publisher(
        dir: &tempfile::TempDir,
    ) -> (
        RulesPublisher,
        mpsc::UnboundedReceiver<xs_mqtt::MqttMessage>,
    ) {
        let store = Arc::new(ControllerStore::open_in_memory().unwrap());
        let (sender, receiver) = mpsc::unbounded();
        let audit_path =
            Utf8PathBuf::from_path_buf(dir.path().join("rules_latest.json")).unwrap();
        (
            RulesPublisher::new(store, CtrlUplink::new(sender), audit_path),
            receiver,
        )
    }

    fn rules() -> Vec<Rule> {
        vec![Rule {
            name: "HighLatency".to_string(),
            condition: "network_latency > 150".to_string(),
            action: "alert".to_string(),
        }]
    }

    #[tokio::test]
    async fn a_single_target_push_publishes_to_its_topic() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, mut published) = publisher(&dir);

        let receipt = publisher
            .push(RulesPushRequest {
                edge_id: Some("edge-A".to_string()),
                edges: Vec::new(),
                broadcast: false,
                rules: Some(rules()),
            })
            .unwrap();

        assert_eq!(receipt.status, "published");
        assert_eq!(receipt.targets, vec!["edge-A"]);
        assert_eq!(receipt.rule_count, 1);
        assert_eq!(receipt.topics, vec!["xsctrl/rules/edge-A"]);

        let message = published.next().await.unwrap();
        assert_eq!(message.topic.name, "xsctrl/rules/edge-A");
        let sent: Vec<Rule> = message.payload_json().unwrap();
        assert_eq!(sent, rules());

        assert!(dir.path().join("rules_latest.json").exists());
    }

    #[tokio::test]
    async fn a_multi_target_push_covers_every_edge_once() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, _published) = publisher(&dir);

        let receipt = publisher
            .push(RulesPushRequest {
                edge_id: Some("edge-A".to_string()),
                edges: vec!["edge-B".to_string(), "edge-A".to_string()],
                broadcast: false,
                rules: Some(rules()),
            })
            .unwrap();

        assert_eq!(receipt.targets, vec!["edge-A", "edge-B"]);
        assert_eq!(
            receipt.topics,
            vec!["xsctrl/rules/edge-A", "xsctrl/rules/edge-B"]
        );
    }

    #[tokio::test]
    async fn a_broadcast_push_targets_all() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, mut published) = publisher(&dir);

        let receipt = publisher
            .push(RulesPushRequest {
                edge_id: None,
                edges: Vec::new(),
                broadcast: true,
                rules: Some(rules()),
            })
            .unwrap();

        assert_eq!(receipt.targets, vec!["ALL"]);
        assert_eq!(receipt.topics, vec!["xsctrl/rules/all"]);
        assert_eq!(
            published.next().await.unwrap().topic.name,
            "xsctrl/rules/all"
        );
    }

    #[tokio::test]
    async fn requests_without_rules_or_target_are_client_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, _published) = publisher(&dir);

        let no_rules = publisher
            .push(RulesPushRequest {
                edge_id: Some("edge-A".to_string()),
                edges: Vec::new(),
                broadcast: false,
                rules: Some(Vec::new()),
            })
            .unwrap_err();
        assert!(no_rules.is_client_error());
        assert_matches!(no_rules, PushError::NoRules);

        let no_target = publisher
            .push(RulesPushRequest {
                edge_id: None,
                edges: Vec::new(),
                broadcast: false,
                rules: Some(rules()),
            })
            .unwrap_err();
        assert!(no_target.is_client_error());
        assert_matches!(no_target, PushError::NoTarget);
    }
}

//! Round trips through the edge runtime, broker excluded: pushed rules are
//! applied and fire, commands are executed and acknowledged over the bus.

use camino::Utf8PathBuf;
use serde_json::json;
use serde_json::Value;
use std::sync::Arc;
use xs_edge::bus::DataBus;
use xs_edge::command::CommandHandler;
use xs_edge::rules::context_from_payload;
use xs_edge::rules::RulesEngine;
use xs_edge::rules_sync::RulesSync;
use xs_edge::store::EventStore;
use xs_edge::store::SqliteEventStore;

fn rules_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join("config/rules_demo.json")).unwrap()
}

#[tokio::test]
async fn a_pushed_rule_fires_on_matching_context_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteEventStore::open_in_memory().unwrap());
    let hook: Arc<dyn EventStore> = store.clone();
    let bus = Arc::new(DataBus::new(Some(hook.clone())));
    let rules = Arc::new(RulesEngine::new(Some(hook)));
    let sync = RulesSync::new("edge-A", rules_path(&dir), rules.clone(), bus.clone());

    // The ruleset arrives as the controller pushes it.
    let pushed = json!([
        {"name": "HighLatency", "if": "network_latency > 150", "then": "alert"}
    ]);
    sync.handle_update(pushed.to_string().as_bytes()).await;
    assert_eq!(rules.rule_count(), 1);

    // A matching context fires and is recorded; a lower reading is not.
    let fired = rules.evaluate(&context_from_payload(&json!({"network_latency": 200})));
    assert_eq!(fired, vec!["HighLatency"]);
    let fired = rules.evaluate(&context_from_payload(&json!({"network_latency": 100})));
    assert!(fired.is_empty());

    let events = store.recent_events(10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].rule, "HighLatency");
}

#[tokio::test]
async fn a_reload_command_is_acknowledged_with_the_new_rule_count() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(DataBus::new(None));
    let rules = Arc::new(RulesEngine::new(None));
    let handler = CommandHandler::new("edge-A", rules_path(&dir), rules.clone(), bus.clone());

    let cmd_id = "74ad21d6f644b19812e97b5d87165829";
    let mut acks = bus.subscribe(&format!("ack/{cmd_id}"));

    let command = json!({
        "cmd_id": cmd_id,
        "edge_id": "edge-A",
        "type": "command",
        "action": "reload_rules",
        "params": {},
        "rules": [
            {"name": "HighLatency", "if": "network_latency > 150", "then": "alert"},
            {"name": "LowEnergy", "if": "energy_level < 30", "then": "alert"},
        ],
    });
    handler.handle(command.to_string().as_bytes()).await;

    let ack: Value = acks.recv().await.unwrap();
    assert_eq!(ack["cmd_id"], cmd_id);
    assert_eq!(ack["edge_id"], "edge-A");
    assert_eq!(ack["status"], "ack");
    assert_eq!(ack["result"], "Reloaded 2 rules");
    assert_eq!(rules.rule_count(), 2);

    // The persisted file survives for the next engine load.
    let on_disk = std::fs::read_to_string(rules_path(&dir)).unwrap();
    assert!(on_disk.contains("HighLatency"));
}

#[tokio::test]
async fn rules_pushed_twice_leave_the_engine_in_the_same_state() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(DataBus::new(None));
    let rules = Arc::new(RulesEngine::new(None));
    let sync = RulesSync::new("edge-A", rules_path(&dir), rules.clone(), bus.clone());

    let pushed = json!({"rules": [
        {"name": "HighLatency", "if": "network_latency > 150", "then": "alert"}
    ]});
    sync.handle_update(pushed.to_string().as_bytes()).await;
    let first = rules.evaluate(&context_from_payload(&json!({"network_latency": 200})));

    sync.handle_update(pushed.to_string().as_bytes()).await;
    let second = rules.evaluate(&context_from_payload(&json!({"network_latency": 200})));

    assert_eq!(first, second);
    assert_eq!(rules.rule_count(), 1);
}

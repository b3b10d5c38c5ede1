//! The MQTT topic taxonomy.
//!
//! | Direction | Topic | Payload |
//! |---|---|---|
//! | Edge → Ctrl | `xsedge/register` | [`RegisterPayload`](crate::RegisterPayload) |
//! | Edge → Ctrl | `xsedge/<edge_id>/<channel>` | [`TelemetryEnvelope`](crate::TelemetryEnvelope) |
//! | Ctrl → Edge | `xsctrl/commands/<edge_id>` | [`CommandMessage`](crate::CommandMessage) |
//! | Ctrl → Edge | `xsctrl/rules/<edge_id>` or `xsctrl/rules/all` | [`RulesPayload`](crate::RulesPayload) |
//!
//! Acknowledgements travel as ordinary telemetry: the edge-local bus topics
//! `ack/<cmd_id>` and `ack/rules_update/<edge_id>` are bridged upstream as
//! `xsedge/<edge_id>/ack/…`, and the controller treats any telemetry channel
//! with an `ack` path segment as an acknowledgement.

use xs_mqtt::Topic;
use xs_mqtt::TopicFilter;

pub const EDGE_ROOT: &str = "xsedge";
pub const CTRL_ROOT: &str = "xsctrl";
pub const REGISTER_TOPIC: &str = "xsedge/register";
pub const RULES_BROADCAST_TOPIC: &str = "xsctrl/rules/all";

/// The topic an edge publishes its presence on.
pub fn register_topic() -> Topic {
    Topic::new_unchecked(REGISTER_TOPIC)
}

/// The topic carrying one edge-local channel upstream.
pub fn telemetry_topic(edge_id: &str, channel: &str) -> Topic {
    Topic::new_unchecked(&format!("{EDGE_ROOT}/{edge_id}/{channel}"))
}

/// The per-edge command topic.
pub fn command_topic(edge_id: &str) -> Topic {
    Topic::new_unchecked(&format!("{CTRL_ROOT}/commands/{edge_id}"))
}

/// The per-edge ruleset topic.
pub fn rules_topic(edge_id: &str) -> Topic {
    Topic::new_unchecked(&format!("{CTRL_ROOT}/rules/{edge_id}"))
}

/// The broadcast ruleset topic.
pub fn rules_broadcast_topic() -> Topic {
    Topic::new_unchecked(RULES_BROADCAST_TOPIC)
}

/// Everything the edges publish, as subscribed by the controller.
pub fn edge_events_filter() -> TopicFilter {
    TopicFilter::new_unchecked(&format!("{EDGE_ROOT}/#"))
}

/// The subscriptions of one edge's command listener.
pub fn command_filter(edge_id: &str) -> TopicFilter {
    TopicFilter::new_unchecked(&format!("{CTRL_ROOT}/commands/{edge_id}"))
}

/// The subscriptions of one edge's rules listener: its own topic plus the broadcast.
pub fn rules_filter(edge_id: &str) -> TopicFilter {
    let mut filter = TopicFilter::new_unchecked(&format!("{CTRL_ROOT}/rules/{edge_id}"));
    filter.add_all(TopicFilter::new_unchecked(RULES_BROADCAST_TOPIC));
    filter
}

/// The edge-local bus topic for a command acknowledgement.
pub fn command_ack_channel(cmd_id: &str) -> String {
    format!("ack/{cmd_id}")
}

/// The edge-local bus topic for a rules update acknowledgement.
pub fn rules_ack_channel(edge_id: &str) -> String {
    format!("ack/rules_update/{edge_id}")
}

/// An upstream topic, as seen by the controller ingest loop.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EdgeEvent {
    /// `xsedge/register`
    Register,
    /// `xsedge/<edge_id>/<channel>`
    Telemetry { edge_id: String, channel: String },
    /// Anything else under `xsedge/`
    Unknown,
}

impl EdgeEvent {
    pub fn parse(topic: &str) -> EdgeEvent {
        if topic == REGISTER_TOPIC {
            return EdgeEvent::Register;
        }
        match topic.strip_prefix("xsedge/") {
            Some(rest) => match rest.split_once('/') {
                Some((edge_id, channel)) if !edge_id.is_empty() && !channel.is_empty() => {
                    EdgeEvent::Telemetry {
                        edge_id: edge_id.to_string(),
                        channel: channel.to_string(),
                    }
                }
                _ => EdgeEvent::Unknown,
            },
            None => EdgeEvent::Unknown,
        }
    }
}

/// True for telemetry channels carrying an acknowledgement.
pub fn is_ack_channel(channel: &str) -> bool {
    channel.split('/').any(|segment| segment == "ack")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_register() {
        assert_eq!(EdgeEvent::parse("xsedge/register"), EdgeEvent::Register);
    }

    #[test]
    fn parse_telemetry() {
        assert_eq!(
            EdgeEvent::parse("xsedge/xsedge-0042/network/metrics"),
            EdgeEvent::Telemetry {
                edge_id: "xsedge-0042".into(),
                channel: "network/metrics".into(),
            }
        );
    }

    #[test]
    fn parse_foreign_topics() {
        assert_eq!(EdgeEvent::parse("xsctrl/rules/all"), EdgeEvent::Unknown);
        assert_eq!(EdgeEvent::parse("xsedge/"), EdgeEvent::Unknown);
        assert_eq!(EdgeEvent::parse("xsedge/orphan"), EdgeEvent::Unknown);
    }

    #[test]
    fn ack_channels() {
        assert!(is_ack_channel("ack/74ad21"));
        assert!(is_ack_channel("ack/rules_update/xsedge-0042"));
        assert!(!is_ack_channel("network/metrics"));
        assert!(!is_ack_channel("backtrack/metrics"));
    }

    #[test]
    fn rules_filter_covers_broadcast() {
        let filter = rules_filter("xsedge-0042");
        assert!(filter.accept_topic(&rules_topic("xsedge-0042")));
        assert!(filter.accept_topic(&rules_broadcast_topic()));
        assert!(!filter.accept_topic(&rules_topic("xsedge-0001")));
    }

    #[test]
    fn telemetry_topic_matches_controller_subscription() {
        let filter = edge_events_filter();
        assert!(filter.accept_topic(&telemetry_topic("xsedge-0042", "energy/status")));
        assert!(filter.accept_topic(&register_topic()));
    }
}

use serde::Deserialize;
use serde::Serialize;

/// One rule of an edge ruleset.
///
/// The `if` field is a boolean predicate over named numeric variables
/// (comparisons plus `and`/`or`/`not`); the `then` field is an action tag
/// the engine records but does not interpret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    #[serde(rename = "if")]
    pub condition: String,
    #[serde(rename = "then")]
    pub action: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_uses_wire_field_names() {
        let rule: Rule = serde_json::from_str(
            r#"{"name": "HighLatency", "if": "network_latency > 150", "then": "alert"}"#,
        )
        .unwrap();
        assert_eq!(rule.condition, "network_latency > 150");
        assert_eq!(rule.action, "alert");

        let text = serde_json::to_string(&rule).unwrap();
        assert!(text.contains(r#""if""#));
        assert!(text.contains(r#""then""#));
    }
}

use crate::rules::parser::ParseError;
use crate::rules::parser::Predicate;
use crate::store::EventStore;
use crate::store::StoreError;
use camino::Utf8Path;
use serde_json::Value;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::error;
use tracing::info;
use tracing::warn;
use xs_api::Rule;

#[derive(thiserror::Error, Debug)]
pub enum RulesError {
    #[error("Failed to read rules from {path}: {source}")]
    CannotRead {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to decode rules from {path}: {source}")]
    CannotDecode {
        path: String,
        source: serde_json::Error,
    },

    #[error("Invalid predicate in rule {rule:?}: {source}")]
    InvalidPredicate { rule: String, source: ParseError },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A rule with its predicate compiled.
#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    action: String,
    predicate: Predicate,
    variables: BTreeSet<String>,
}

/// Evaluates the loaded ruleset against contexts assembled from bus events.
///
/// `load` replaces the rule list atomically: on any failure the previous
/// list is retained. Rule firings are recorded through the event store.
pub struct RulesEngine {
    store: Option<Arc<dyn EventStore>>,
    rules: Mutex<Vec<CompiledRule>>,
}

impl RulesEngine {
    pub fn new(store: Option<Arc<dyn EventStore>>) -> Self {
        RulesEngine {
            store,
            rules: Mutex::new(Vec::new()),
        }
    }

    /// Load a ruleset from a JSON file, replacing the current one.
    ///
    /// Returns the number of loaded rules. The current list is kept on any
    /// read, decode or compile failure.
    pub fn load(&self, path: &Utf8Path) -> Result<usize, RulesError> {
        let text = std::fs::read_to_string(path).map_err(|source| RulesError::CannotRead {
            path: path.to_string(),
            source,
        })?;
        let rules: Vec<Rule> =
            serde_json::from_str(&text).map_err(|source| RulesError::CannotDecode {
                path: path.to_string(),
                source,
            })?;
        let count = self.replace(&rules)?;
        info!("Loaded {count} rules from {path}");
        Ok(count)
    }

    /// Replace the current list with already-decoded rules.
    pub fn replace(&self, rules: &[Rule]) -> Result<usize, RulesError> {
        let compiled = rules
            .iter()
            .map(|rule| {
                let predicate = Predicate::parse(&rule.condition).map_err(|source| {
                    RulesError::InvalidPredicate {
                        rule: rule.name.clone(),
                        source,
                    }
                })?;
                let variables = predicate.variables();
                Ok(CompiledRule {
                    name: rule.name.clone(),
                    action: rule.action.clone(),
                    predicate,
                    variables,
                })
            })
            .collect::<Result<Vec<_>, RulesError>>()?;

        let count = compiled.len();
        *self.rules.lock().unwrap() = compiled;
        Ok(count)
    }

    /// Evaluate every rule whose variables are all present in the context.
    ///
    /// Each firing is recorded through the store and returned. A predicate
    /// that fails to evaluate is reported and skipped; the remaining rules
    /// are still evaluated.
    pub fn evaluate(&self, ctx: &HashMap<String, f64>) -> Vec<String> {
        let rules = self.rules.lock().unwrap().clone();
        let mut fired = Vec::new();

        for rule in &rules {
            if !rule.variables.iter().all(|name| ctx.contains_key(name)) {
                continue;
            }
            match rule.predicate.evaluate(ctx) {
                Ok(true) => {
                    warn!("Rule {} triggered (action: {})", rule.name, rule.action);
                    if let Some(store) = &self.store {
                        let data = context_json(ctx);
                        if let Err(err) = store.insert_event(&rule.name, &data) {
                            error!("Failed to record firing of {}: {err}", rule.name);
                        }
                    }
                    fired.push(rule.name.clone());
                }
                Ok(false) => {}
                Err(err) => error!("Rule {} skipped: {err}", rule.name),
            }
        }

        fired
    }

    pub fn rule_count(&self) -> usize {
        self.rules.lock().unwrap().len()
    }
}

/// Assemble an evaluation context from an event payload: every top-level
/// numeric field becomes a variable.
pub fn context_from_payload(payload: &Value) -> HashMap<String, f64> {
    let mut ctx = HashMap::new();
    if let Value::Object(fields) = payload {
        for (name, value) in fields {
            if let Some(number) = value.as_f64() {
                ctx.insert(name.clone(), number);
            }
        }
    }
    ctx
}

fn context_json(ctx: &HashMap<String, f64>) -> Value {
    Value::Object(
        ctx.iter()
            .map(|(name, value)| (name.clone(), Value::from(*value)))
            .collect(),
    )
}

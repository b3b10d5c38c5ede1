//! Plugin hosting.
//!
//! A plugin bundle is a directory with a `plugin.toml` manifest and,
//! optionally, an entry artifact covered by a SHA-256 digest. Plugin
//! implementations themselves are compiled in and selected by manifest
//! name; the manifest only describes and gates what runs.

mod builtin;
mod supervisor;

pub use supervisor::*;

use crate::bus::DataBus;
use crate::rules::RulesEngine;
use crate::store::EventStore;
use async_trait::async_trait;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(thiserror::Error, Debug)]
pub enum PluginError {
    #[error("Plugin failure: {0}")]
    Failure(String),

    #[error("Cannot read manifest {path}: {source}")]
    CannotReadManifest {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot decode manifest {path}: {source}")]
    CannotDecodeManifest {
        path: Utf8PathBuf,
        source: toml::de::Error,
    },
}

/// The manifest of a plugin bundle (`plugin.toml`).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// The bundle's entry artifact, relative to the bundle directory.
    pub entry: Option<String>,
    /// Hex SHA-256 digest of the entry artifact.
    pub sha256: Option<String>,
}

impl PluginManifest {
    pub fn read(path: &Utf8Path) -> Result<PluginManifest, PluginError> {
        let text =
            std::fs::read_to_string(path).map_err(|source| PluginError::CannotReadManifest {
                path: path.to_owned(),
                source,
            })?;
        toml::from_str(&text).map_err(|source| PluginError::CannotDecodeManifest {
            path: path.to_owned(),
            source,
        })
    }
}

/// What a plugin is allowed to touch.
///
/// Deliberately a flat capability set: plugins get handles to the bus, the
/// store and the rules engine, never a back-pointer to the supervisor.
#[derive(Clone)]
pub struct PluginContext {
    pub bus: Arc<DataBus>,
    pub store: Option<Arc<dyn EventStore>>,
    pub rules: Arc<RulesEngine>,
    pub meta: PluginMetadata,
    pub heartbeat: Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl From<&PluginManifest> for PluginMetadata {
    fn from(manifest: &PluginManifest) -> Self {
        PluginMetadata {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
        }
    }
}

/// Single-writer (the plugin), single-reader (the watchdog) timestamp.
#[derive(Clone, Default)]
pub struct Heartbeat(Arc<AtomicU64>);

impl Heartbeat {
    pub fn new() -> Self {
        Heartbeat::default()
    }

    /// Record the current instant. Called by the plugin on each iteration.
    pub fn beat(&self) {
        let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
        self.0.store(now, Ordering::Relaxed);
    }

    /// Seconds since the last beat, `None` before the first one.
    pub fn age_secs(&self) -> Option<u64> {
        let last = self.0.load(Ordering::Relaxed);
        if last == 0 {
            return None;
        }
        let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
        Some(now.saturating_sub(last))
    }
}

/// A unit of work hosted by the edge.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The long-running body: loop, do work, beat the heartbeat, suspend.
    /// Returning `Ok` stops the plugin; an error triggers a supervised
    /// restart.
    async fn on_start(&self, ctx: PluginContext) -> Result<(), PluginError>;

    /// Best-effort cleanup, bounded by the shutdown deadline.
    async fn on_stop(&self) -> Result<(), PluginError>;
}

/// The compiled-in plugin registry, keyed by manifest name.
pub fn instantiate(name: &str) -> Option<Arc<dyn Plugin>> {
    match name {
        "network_health" => Some(Arc::new(builtin::NetworkHealth)),
        "energy_optimizer" => Some(Arc::new(builtin::EnergyOptimizer)),
        "edgelink" => Some(Arc::new(builtin::EdgeLink)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_is_read_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.toml");
        std::fs::write(
            &path,
            r#"
name = "network_health"
version = "1.0.0"
description = "Publishes link latency readings"
entry = "bundle.bin"
sha256 = "d6f644b19812e97b5d871658d6d3400ecd4787faeb9b8990c1e7608288664be7"
"#,
        )
        .unwrap();

        let manifest = PluginManifest::read(Utf8Path::from_path(&path).unwrap()).unwrap();
        assert_eq!(manifest.name, "network_health");
        assert_eq!(manifest.entry.as_deref(), Some("bundle.bin"));
    }

    #[test]
    fn manifest_defaults_the_description() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.toml");
        std::fs::write(&path, "name = \"edgelink\"\nversion = \"0.1.0\"\n").unwrap();

        let manifest = PluginManifest::read(Utf8Path::from_path(&path).unwrap()).unwrap();
        assert_eq!(manifest.description, "");
        assert_eq!(manifest.sha256, None);
    }

    #[test]
    fn registry_knows_the_builtin_plugins() {
        assert!(instantiate("network_health").is_some());
        assert!(instantiate("energy_optimizer").is_some());
        assert!(instantiate("edgelink").is_some());
        assert!(instantiate("bitcoin_miner").is_none());
    }

    #[test]
    fn heartbeat_age() {
        let heartbeat = Heartbeat::new();
        assert_eq!(heartbeat.age_secs(), None);
        heartbeat.beat();
        assert!(heartbeat.age_secs().unwrap() < 2);
    }
}

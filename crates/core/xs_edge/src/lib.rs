//! The xs edge node runtime.
//!
//! An edge hosts plugins producing sensor-like readings, mediates them over
//! an in-process data bus, evaluates rules against the produced contexts,
//! and reconciles local state with the central controller over an MQTT
//! broker: telemetry and acknowledgements flow up, commands and rulesets
//! flow down.

pub mod auth;
pub mod bridge;
pub mod bus;
pub mod command;
pub mod config;
pub mod file;
pub mod http;
pub mod plugins;
pub mod rules;
pub mod rules_sync;
pub mod store;
pub mod watchdog;

use crate::auth::TokenAuthority;
use crate::bridge::edge_client_id;
use crate::bridge::BridgeConfig;
use crate::bridge::MqttBridge;
use crate::bus::DataBus;
use crate::command::CommandHandler;
use crate::config::EdgeOpt;
use crate::plugins::PluginSupervisor;
use crate::rules::RulesEngine;
use crate::rules_sync::RulesSync;
use crate::store::EventStore;
use crate::store::SqliteEventStore;
use crate::watchdog::Watchdog;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn run(opt: EdgeOpt) -> anyhow::Result<()> {
    info!("Starting xs-edge runtime...");

    let edge_id = edge_client_id(opt.edge_id.clone());
    let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::open(&opt.db_path)?);
    let bus = Arc::new(DataBus::new(Some(store.clone())));
    let rules = Arc::new(RulesEngine::new(Some(store.clone())));
    if let Err(err) = rules.load(&opt.rules_path) {
        error!("Failed to load rules from {}: {err}", opt.rules_path);
    }

    let (shutdown_sender, shutdown) = watch::channel(false);

    let mut supervisor = PluginSupervisor::new(bus.clone(), Some(store.clone()), rules.clone());
    let started = supervisor.load_all(&opt.plugin_dir, opt.plugin_verify_sha, shutdown.clone());
    info!("Started {started} plugins from {}", opt.plugin_dir);

    let bridge = if opt.mqtt_enabled {
        let bridge_config = BridgeConfig {
            host: opt.mqtt_broker.clone(),
            port: opt.mqtt_port,
            transport: opt.mqtt_transport.into(),
            edge_id: edge_id.clone(),
            version: VERSION.to_string(),
        };
        let command_handler = CommandHandler::new(
            &edge_id,
            opt.rules_path.clone(),
            rules.clone(),
            bus.clone(),
        );
        let rules_sync = RulesSync::new(
            &edge_id,
            opt.rules_path.clone(),
            rules.clone(),
            bus.clone(),
        );
        Some(MqttBridge::start(&bridge_config, &bus, command_handler, rules_sync).await?)
    } else {
        None
    };

    // Bearer tokens: the configured secret, else a development token
    // issued from the signing key and logged so the operator can call the
    // protected routes.
    let auth = match &opt.edge_token {
        Some(secret) => Arc::new(TokenAuthority::new(secret)),
        None => {
            let authority = Arc::new(TokenAuthority::new(&opt.plugin_signing_key));
            match authority.issue() {
                Ok(token) => {
                    warn!("No EDGE_TOKEN configured, issued a temporary one:");
                    warn!("   Bearer {token}");
                }
                Err(err) => error!("Cannot issue a development token: {err}"),
            }
            authority
        }
    };

    let state = http::AppState {
        records: supervisor.records(),
        bus: bus.clone(),
        store,
        auth,
        bridge: opt.mqtt_enabled.then(|| http::BridgeInfo {
            broker: opt.mqtt_broker.clone(),
            port: opt.mqtt_port,
            edge_id: edge_id.clone(),
        }),
        started_at: Instant::now(),
        version: VERSION,
    };
    let listener = TcpListener::bind(("0.0.0.0", opt.api_port)).await?;
    info!("xs-edge API running on http://0.0.0.0:{}", opt.api_port);
    let http_task = tokio::spawn(http::serve(listener, state));

    let watchdog = Watchdog::new(supervisor.records(), http_task, shutdown.clone());
    let watchdog_task = tokio::spawn(watchdog.run());

    shutdown_signal().await?;
    info!("Initiating graceful shutdown...");
    let _ = shutdown_sender.send(true);

    supervisor.stop_all().await;
    if let Some(bridge) = bridge {
        bridge.close(&bus).await;
    }
    watchdog_task.abort();

    info!("xs-edge shutdown complete.");
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

//! The xs controller runtime.
//!
//! The controller aggregates the fleet: it ingests everything the edges
//! publish, persists it, streams it to live observers, dispatches commands
//! with acknowledgement correlation, and distributes rulesets to targeted
//! edges or the whole fleet.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod ingest;
pub mod observers;
pub mod rules_push;
pub mod store;
pub mod uplink;

use crate::auth::CtrlAuth;
use crate::config::CtrlOpt;
use crate::dispatch::CommandDispatcher;
use crate::observers::ObserverRegistry;
use crate::rules_push::RulesPublisher;
use crate::store::ControllerStore;
use crate::uplink::CtrlUplink;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use xs_mqtt::Connection;

pub async fn run(opt: CtrlOpt) -> anyhow::Result<()> {
    info!("Starting xs-controller runtime...");

    let store = Arc::new(ControllerStore::open(&opt.db_path)?);
    let observers = Arc::new(ObserverRegistry::new());

    let mqtt_config = xs_mqtt::Config::default()
        .with_host(&opt.mqtt_broker)
        .with_port(opt.mqtt_port)
        .with_transport(opt.mqtt_transport.into());

    // One long-lived publish connection, shared by command dispatch and
    // rules push.
    let uplink_connection = Connection::new(
        &mqtt_config.clone().with_client_id("xs-controller-pub"),
    )
    .await?;
    let uplink = CtrlUplink::new(uplink_connection.published.clone());

    let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), uplink.clone()));
    let publisher = Arc::new(RulesPublisher::new(
        store.clone(),
        uplink,
        opt.rules_audit_path.clone(),
    ));
    let auth = Arc::new(CtrlAuth::new(&opt.master_key, &opt.jwt_secret));

    let ingest_task = tokio::spawn(ingest::run(
        mqtt_config.with_client_id("xs-controller-sub"),
        store.clone(),
        observers.clone(),
    ));

    let state = http::AppState {
        store,
        dispatcher,
        publisher,
        observers,
        auth,
    };
    let listener = TcpListener::bind(("0.0.0.0", opt.api_port)).await?;
    info!(
        "xs-controller API running on http://0.0.0.0:{}",
        opt.api_port
    );
    let http_task = tokio::spawn(http::serve(listener, state));

    shutdown_signal().await?;
    info!("Initiating graceful shutdown...");

    ingest_task.abort();
    http_task.abort();
    uplink_connection.close().await;

    info!("xs-controller shutdown complete.");
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

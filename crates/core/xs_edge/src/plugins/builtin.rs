//! The stand-in telemetry plugins.
//!
//! Each publishes random sensor-like readings on its bus channel every
//! 10 seconds and evaluates the rules against the context it produced.

use crate::plugins::Plugin;
use crate::plugins::PluginContext;
use crate::plugins::PluginError;
use crate::rules::context_from_payload;
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

const PUBLISH_INTERVAL: Duration = Duration::from_secs(10);

/// Publishes the current link latency on `network/metrics`.
pub struct NetworkHealth;

#[async_trait]
impl Plugin for NetworkHealth {
    async fn on_start(&self, ctx: PluginContext) -> Result<(), PluginError> {
        loop {
            ctx.heartbeat.beat();

            let latency = rand::rng().random_range(50..=250);
            let reading = json!({ "network_latency": latency });
            ctx.bus.publish("network/metrics", reading.clone()).await;
            ctx.rules.evaluate(&context_from_payload(&reading));
            info!("[Network] latency {latency} ms");

            sleep(PUBLISH_INTERVAL).await;
        }
    }

    async fn on_stop(&self) -> Result<(), PluginError> {
        info!("[network_health] cleaning up resources...");
        Ok(())
    }
}

/// Publishes the battery level on `energy/status`.
pub struct EnergyOptimizer;

#[async_trait]
impl Plugin for EnergyOptimizer {
    async fn on_start(&self, ctx: PluginContext) -> Result<(), PluginError> {
        loop {
            ctx.heartbeat.beat();

            let level = rand::rng().random_range(20..=100);
            let reading = json!({ "energy_level": level });
            ctx.bus.publish("energy/status", reading.clone()).await;
            ctx.rules.evaluate(&context_from_payload(&reading));
            info!("[Energy] level {level}%");

            sleep(PUBLISH_INTERVAL).await;
        }
    }

    async fn on_stop(&self) -> Result<(), PluginError> {
        info!("[energy_optimizer] cleaning up resources...");
        Ok(())
    }
}

/// Picks the lowest-latency uplink and publishes it on `edgelink/route`.
pub struct EdgeLink;

#[async_trait]
impl Plugin for EdgeLink {
    async fn on_start(&self, ctx: PluginContext) -> Result<(), PluginError> {
        loop {
            ctx.heartbeat.beat();

            let links = [
                ("5G", rand::rng().random_range(40..=120)),
                ("VSAT", rand::rng().random_range(120..=250)),
                ("LTE", rand::rng().random_range(60..=180)),
            ];
            let (best, latency) = links
                .iter()
                .min_by_key(|(_, latency)| *latency)
                .copied()
                .expect("links is non-empty");

            let reading = json!({ "edgelink_best": best, "network_latency": latency });
            ctx.bus.publish("edgelink/route", reading.clone()).await;
            ctx.rules.evaluate(&context_from_payload(&reading));
            info!("[EdgeLink] best {best} ({latency} ms)");

            sleep(PUBLISH_INTERVAL).await;
        }
    }

    async fn on_stop(&self) -> Result<(), PluginError> {
        info!("[edgelink] cleaning up resources...");
        Ok(())
    }
}

//! Last line of defence: restart the whole process when the HTTP server
//! dies, a plugin stays unresponsive for too long, or a plugin is stuck in
//! a supervised crash-restart loop.
//!
//! Restart is a re-execution of the current image with the original
//! argument vector, so a watchdog decision survives nothing but the
//! process id.

use crate::plugins::PluginRecord;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::error;
use tracing::warn;

const TICK: Duration = Duration::from_secs(10);
const HEARTBEAT_STALE_AFTER: Duration = Duration::from_secs(30);
const STRIKE_WINDOW: Duration = Duration::from_secs(60);
const STRIKE_LIMIT: usize = 3;

/// Per-plugin unresponsive observations within a sliding window.
#[derive(Default)]
pub(crate) struct StrikeLog {
    strikes: HashMap<String, VecDeque<Instant>>,
}

impl StrikeLog {
    /// Record an observation and return how many fall within the window.
    pub(crate) fn record(&mut self, name: &str, now: Instant) -> usize {
        let strikes = self.strikes.entry(name.to_string()).or_default();
        strikes.push_back(now);
        while let Some(oldest) = strikes.front() {
            if now.duration_since(*oldest) > STRIKE_WINDOW {
                strikes.pop_front();
            } else {
                break;
            }
        }
        strikes.len()
    }
}

pub struct Watchdog {
    records: Vec<Arc<PluginRecord>>,
    http_task: JoinHandle<std::io::Result<()>>,
    shutdown: watch::Receiver<bool>,
}

impl Watchdog {
    pub fn new(
        records: Vec<Arc<PluginRecord>>,
        http_task: JoinHandle<std::io::Result<()>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Watchdog {
            records,
            http_task,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut strikes = StrikeLog::default();
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = sleep(TICK) => {}
            }
            if *self.shutdown.borrow() {
                break;
            }

            if self.http_task.is_finished() {
                error!("API server stopped, restarting xs-edge...");
                restart_process();
            }

            // A plugin that crashes before its first heartbeat never goes
            // stale; the supervisor's restart counter is the signal there.
            if let Some(name) = crash_looping(&self.records) {
                error!("{name} restarted {STRIKE_LIMIT}x in 60 s, restarting xs-edge");
                restart_process();
            }

            let now = Instant::now();
            for record in &self.records {
                let name = &record.meta.name;
                let stale = match record.heartbeat_age_secs() {
                    Some(age) => age > HEARTBEAT_STALE_AFTER.as_secs(),
                    None => false,
                };
                if stale {
                    warn!("Plugin {name} unresponsive (>30 s)");
                    if strikes.record(name, now) >= STRIKE_LIMIT {
                        error!("{name} failed {STRIKE_LIMIT}x in 60 s, restarting xs-edge");
                        restart_process();
                    }
                }
            }
        }
    }
}

/// The first plugin whose supervised restarts crossed the limit within the
/// sliding window, if any.
fn crash_looping(records: &[Arc<PluginRecord>]) -> Option<&str> {
    records
        .iter()
        .find(|record| record.restart_count() >= STRIKE_LIMIT)
        .map(|record| record.meta.name.as_str())
}

/// Replace the process image with a fresh copy of itself, preserving the
/// original argument vector.
fn restart_process() -> ! {
    let args: Vec<String> = std::env::args().collect();
    let exe = std::env::current_exe().unwrap_or_else(|_| args[0].clone().into());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = std::process::Command::new(&exe).args(&args[1..]).exec();
        error!("Process re-execution failed: {err}");
    }

    // Non-unix targets (and a failed exec) fall back to exiting and letting
    // the service manager restart the unit.
    std::process::exit(1);
}

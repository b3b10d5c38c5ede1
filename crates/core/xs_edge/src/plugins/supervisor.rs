use crate::bus::DataBus;
use crate::plugins::instantiate;
use crate::plugins::Heartbeat;
use crate::plugins::Plugin;
use crate::plugins::PluginContext;
use crate::plugins::PluginManifest;
use crate::plugins::PluginMetadata;
use crate::rules::RulesEngine;
use crate::store::EventStore;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::error;
use tracing::info;
use tracing::warn;

const RESTART_BACKOFF: Duration = Duration::from_secs(2);
const RESTART_WINDOW: Duration = Duration::from_secs(60);
const STOP_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    Running,
    Crashed,
    Stopped,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Crashed => "crashed",
            RunState::Stopped => "stopped",
        }
    }
}

/// The runtime record of one hosted plugin.
///
/// Mutated only by the supervisor; the watchdog and the HTTP surface read.
pub struct PluginRecord {
    pub meta: PluginMetadata,
    heartbeat: Heartbeat,
    state: Mutex<RunState>,
    restarts: Mutex<VecDeque<Instant>>,
}

impl PluginRecord {
    fn new(meta: PluginMetadata, heartbeat: Heartbeat) -> Self {
        PluginRecord {
            meta,
            heartbeat,
            state: Mutex::new(RunState::Starting),
            restarts: Mutex::new(VecDeque::new()),
        }
    }

    #[cfg(test)]
    pub(crate) fn started_for_tests(meta: PluginMetadata, heartbeat: Heartbeat) -> PluginRecord {
        PluginRecord::new(meta, heartbeat)
    }

    #[cfg(test)]
    pub(crate) fn crashed_for_tests(&self) {
        self.record_crash();
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap() = state;
    }

    /// Seconds since the plugin last beat its heartbeat.
    pub fn heartbeat_age_secs(&self) -> Option<u64> {
        self.heartbeat.age_secs()
    }

    /// Restarts within the sliding window.
    pub fn restart_count(&self) -> usize {
        let mut restarts = self.restarts.lock().unwrap();
        Self::prune(&mut restarts);
        restarts.len()
    }

    fn record_crash(&self) {
        let mut restarts = self.restarts.lock().unwrap();
        restarts.push_back(Instant::now());
        Self::prune(&mut restarts);
    }

    fn prune(restarts: &mut VecDeque<Instant>) {
        while let Some(oldest) = restarts.front() {
            if oldest.elapsed() > RESTART_WINDOW {
                restarts.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Hosts the discovered plugins, each under a crash-restart loop.
pub struct PluginSupervisor {
    bus: Arc<DataBus>,
    store: Option<Arc<dyn EventStore>>,
    rules: Arc<RulesEngine>,
    plugins: Vec<(Arc<dyn Plugin>, Arc<PluginRecord>)>,
    tasks: Vec<JoinHandle<()>>,
    restart_backoff: Duration,
}

impl PluginSupervisor {
    pub fn new(
        bus: Arc<DataBus>,
        store: Option<Arc<dyn EventStore>>,
        rules: Arc<RulesEngine>,
    ) -> Self {
        PluginSupervisor {
            bus,
            store,
            rules,
            plugins: Vec::new(),
            tasks: Vec::new(),
            restart_backoff: RESTART_BACKOFF,
        }
    }

    /// Override the restart back-off (tests use a short one).
    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    /// Discover plugin bundles, verify them and start a supervised worker
    /// for each. Returns the number of started plugins.
    pub fn load_all(
        &mut self,
        plugin_root: &Utf8Path,
        verify_sha: bool,
        shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut started = 0;
        for (dir, manifest) in discover(plugin_root) {
            if verify_sha && !verify_bundle(&dir, &manifest) {
                continue;
            }
            let Some(plugin) = instantiate(&manifest.name) else {
                warn!("No implementation registered for plugin {}", manifest.name);
                continue;
            };
            self.start_plugin(plugin, PluginMetadata::from(&manifest), shutdown.clone());
            info!("Loaded plugin {}", manifest.name);
            started += 1;
        }
        started
    }

    /// Run one plugin under the crash-restart loop.
    pub fn start_plugin(
        &mut self,
        plugin: Arc<dyn Plugin>,
        meta: PluginMetadata,
        shutdown: watch::Receiver<bool>,
    ) {
        let heartbeat = Heartbeat::new();
        let record = Arc::new(PluginRecord::new(meta, heartbeat.clone()));
        let ctx = PluginContext {
            bus: self.bus.clone(),
            store: self.store.clone(),
            rules: self.rules.clone(),
            meta: record.meta.clone(),
            heartbeat,
        };

        let task = tokio::spawn(Self::supervise(
            plugin.clone(),
            record.clone(),
            ctx,
            shutdown,
            self.restart_backoff,
        ));

        self.plugins.push((plugin, record));
        self.tasks.push(task);
    }

    async fn supervise(
        plugin: Arc<dyn Plugin>,
        record: Arc<PluginRecord>,
        ctx: PluginContext,
        mut shutdown: watch::Receiver<bool>,
        backoff: Duration,
    ) {
        loop {
            if *shutdown.borrow() {
                record.set_state(RunState::Stopped);
                break;
            }
            record.set_state(RunState::Running);
            tokio::select! {
                _ = shutdown.changed() => {
                    record.set_state(RunState::Stopped);
                    break;
                }
                result = plugin.on_start(ctx.clone()) => match result {
                    Ok(()) => {
                        record.set_state(RunState::Stopped);
                        break;
                    }
                    Err(err) => {
                        record.record_crash();
                        record.set_state(RunState::Crashed);
                        error!(
                            "[{}] crashed: {err}. Restarting in {}s",
                            record.meta.name,
                            backoff.as_secs()
                        );
                        tokio::select! {
                            _ = shutdown.changed() => {
                                record.set_state(RunState::Stopped);
                                break;
                            }
                            _ = sleep(backoff) => {}
                        }
                    }
                }
            }
        }
    }

    /// Read-only iteration over the plugin records.
    pub fn records(&self) -> Vec<Arc<PluginRecord>> {
        self.plugins
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Invoke `on_stop` on every plugin, each bounded by the deadline, then
    /// abandon the supervision tasks.
    pub async fn stop_all(&self) {
        for (plugin, record) in &self.plugins {
            match timeout(STOP_DEADLINE, plugin.on_stop()).await {
                Ok(Ok(())) => info!("[{}] stopped cleanly", record.meta.name),
                Ok(Err(err)) => error!("[{}] error on stop: {err}", record.meta.name),
                Err(_) => error!("[{}] did not stop within the deadline", record.meta.name),
            }
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Each immediate subdirectory of the plugin root holding a manifest is a
/// plugin bundle. Unreadable entries are reported and skipped.
fn discover(plugin_root: &Utf8Path) -> Vec<(Utf8PathBuf, PluginManifest)> {
    let entries = match plugin_root.read_dir_utf8() {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Cannot read plugin root {plugin_root}: {err}");
            return Vec::new();
        }
    };

    let mut bundles = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let dir = entry.path().to_owned();
        if !dir.is_dir() {
            continue;
        }
        let manifest_path = dir.join("plugin.toml");
        if !manifest_path.exists() {
            continue;
        }
        match PluginManifest::read(&manifest_path) {
            Ok(manifest) => bundles.push((dir, manifest)),
            Err(err) => error!("{err}"),
        }
    }
    bundles.sort_by(|(a, _), (b, _)| a.cmp(b));
    bundles
}

/// Check the bundle's integrity digest. The digest covers the entry
/// artifact declared by the manifest.
fn verify_bundle(dir: &Utf8Path, manifest: &PluginManifest) -> bool {
    let (Some(entry), Some(declared)) = (&manifest.entry, &manifest.sha256) else {
        warn!("Plugin {} declares no integrity digest", manifest.name);
        return true;
    };
    let artifact = dir.join(entry);
    match sha256::try_digest(artifact.as_std_path()) {
        Ok(digest) if digest.eq_ignore_ascii_case(declared) => true,
        Ok(digest) => {
            warn!(
                "SHA mismatch on {}: expected {declared}, computed {digest}",
                manifest.name
            );
            false
        }
        Err(err) => {
            warn!("Cannot digest {artifact}: {err}");
            false
        }
    }
}

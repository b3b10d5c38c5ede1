use camino::Utf8PathBuf;
use std::io::IsTerminal;
use std::str::FromStr;

/// Broker transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MqttTransport {
    /// Plain MQTT over TCP (port 1883)
    Tcp,
    /// MQTT over WebSocket on the `/mqtt` path (typically port 8000)
    Ws,
}

impl From<MqttTransport> for xs_mqtt::Transport {
    fn from(transport: MqttTransport) -> Self {
        match transport {
            MqttTransport::Tcp => xs_mqtt::Transport::Tcp,
            MqttTransport::Ws => xs_mqtt::Transport::WebSocket,
        }
    }
}

#[derive(Debug, Clone, clap::Parser)]
#[clap(
name = clap::crate_name!(),
version = clap::crate_version!(),
about = clap::crate_description!()
)]
pub struct EdgeOpt {
    /// Turn-on the debug log level.
    ///
    /// If off only reports ERROR, WARN, and INFO
    /// If on also reports DEBUG
    #[clap(long)]
    pub debug: bool,

    /// Log level used when --debug is off
    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Port the HTTP API binds to
    #[clap(long, env = "API_PORT", default_value_t = 8000)]
    pub api_port: u16,

    /// Path of the local event database
    #[clap(long, env = "DB_PATH", default_value = "xsedge.db")]
    pub db_path: Utf8PathBuf,

    /// Relay bus events to the broker and listen for controller traffic
    #[clap(long, env = "MQTT_ENABLED", default_value_t = false, action = clap::ArgAction::Set)]
    pub mqtt_enabled: bool,

    /// Broker host
    #[clap(long, env = "MQTT_BROKER", default_value = "localhost")]
    pub mqtt_broker: String,

    /// Broker port
    #[clap(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// How to reach the broker
    #[clap(long, env = "MQTT_TRANSPORT", value_enum, default_value = "tcp")]
    pub mqtt_transport: MqttTransport,

    /// Stable edge identifier
    ///
    /// When omitted, a random 4-digit suffix is assigned once per process.
    #[clap(long, env = "EDGE_ID")]
    pub edge_id: Option<String>,

    /// Secret behind the HTTP bearer tokens
    ///
    /// When omitted, a development token is issued from the plugin signing
    /// key and logged at startup.
    #[clap(long, env = "EDGE_TOKEN", hide_env_values = true)]
    pub edge_token: Option<String>,

    /// Directory scanned for plugin bundles
    #[clap(long, env = "PLUGIN_DIR", default_value = "plugins")]
    pub plugin_dir: Utf8PathBuf,

    /// Fallback secret for development tokens
    #[clap(
        long,
        env = "PLUGIN_SIGNING_KEY",
        default_value = "EdgeOSDevSecret",
        hide_env_values = true
    )]
    pub plugin_signing_key: String,

    /// Verify the SHA-256 digest declared by plugin manifests
    #[clap(long, env = "PLUGIN_VERIFY_SHA", default_value_t = false, action = clap::ArgAction::Set)]
    pub plugin_verify_sha: bool,

    /// Path of the rules file
    #[clap(long, env = "RULES_PATH", default_value = "config/rules_demo.json")]
    pub rules_path: Utf8PathBuf,
}

/// Initializes a tracing subscriber from the flags and `LOG_LEVEL`, unless
/// the environment variable `RUST_LOG` overrides both.
///
/// Reports all the log events sent either with the `log` crate or the
/// `tracing` crate.
pub fn log_init(debug: bool, log_level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339());

    if debug {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
        return;
    }

    if std::env::var("RUST_LOG").is_ok() {
        subscriber
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
        return;
    }

    let level =
        tracing::Level::from_str(&log_level.to_uppercase()).unwrap_or(tracing::Level::INFO);
    subscriber.with_max_level(level).init();
}

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
pub struct CtrlOpt {
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
    #[clap(long, env = "API_PORT", default_value_t = 9000)]
    pub api_port: u16,

    /// Path of the controller database
    #[clap(long, env = "DB_PATH", default_value = "xscontroller.db")]
    pub db_path: Utf8PathBuf,

    /// Broker host
    #[clap(long, env = "MQTT_BROKER", default_value = "localhost")]
    pub mqtt_broker: String,

    /// Broker port
    #[clap(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// How to reach the broker
    #[clap(long, env = "MQTT_TRANSPORT", value_enum, default_value = "tcp")]
    pub mqtt_transport: MqttTransport,

    /// Master key exchanged for bearer tokens on /auth/token
    #[clap(
        long,
        env = "CTRL_MASTER_KEY",
        default_value = "CtrlMasterKey",
        hide_env_values = true
    )]
    pub master_key: String,

    /// Secret signing the bearer tokens
    #[clap(
        long,
        env = "CTRL_JWT_SECRET",
        default_value = "ControllerSecret",
        hide_env_values = true
    )]
    pub jwt_secret: String,

    /// Audit copy of the last pushed ruleset
    #[clap(long, env = "RULES_AUDIT_PATH", default_value = "rules_latest.json")]
    pub rules_audit_path: Utf8PathBuf,
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

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_match_the_documented_ones() {
        let opt = CtrlOpt::parse_from(["xs-controller"]);
        assert_eq!(opt.api_port, 9000);
        assert_eq!(opt.db_path, Utf8PathBuf::from("xscontroller.db"));
        assert_eq!(opt.mqtt_broker, "localhost");
        assert_eq!(opt.mqtt_transport, MqttTransport::Tcp);
        assert_eq!(opt.master_key, "CtrlMasterKey");
    }
}

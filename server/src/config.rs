use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::state::RelaySettings;

/// Presence and message relay server
///
/// Every setting is optional here so that only flags actually given (or their
/// env vars) take part in the merge; unset ones fall through to the TOML file.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "presence-relay", version, about = "Presence and message relay server")]
pub struct Cli {
    /// Port to listen on [default: 1984]
    #[arg(long, env = "RELAY_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "RELAY_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./relay.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RELAY_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys) [default: ./data]
    #[arg(long, env = "RELAY_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Seconds before an unrefreshed typing indicator is cleared [default: 3]
    #[arg(long, env = "RELAY_TYPING_TIMEOUT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typing_timeout_secs: Option<u64>,

    /// Characters of message content included in push previews [default: 100]
    #[arg(long, env = "RELAY_PREVIEW_CHARS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_chars: Option<usize>,

    /// Days to keep queued notifications before purging [default: 30]
    #[arg(long, env = "RELAY_NOTIFICATION_RETENTION_DAYS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_retention_days: Option<u32>,

    /// Seconds between notification queue cleanup runs [default: 3600]
    #[arg(long, env = "RELAY_NOTIFICATION_CLEANUP_INTERVAL_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_cleanup_interval_secs: Option<u64>,
}

/// Resolved server settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub data_dir: String,
    pub typing_timeout_secs: u64,
    pub preview_chars: usize,
    pub notification_retention_days: u32,
    pub notification_cleanup_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1984,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            data_dir: "./data".to_string(),
            typing_timeout_secs: 3,
            preview_chars: 100,
            notification_retention_days: 30,
            notification_cleanup_interval_secs: 3600,
        }
    }
}

impl Config {
    /// Layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("RELAY_"))
            .merge(Serialized::defaults(cli))
    }

    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        Self::figment(cli).extract()
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            // A zero timeout would clear typing flags before anyone sees them
            typing_timeout: Duration::from_secs(self.typing_timeout_secs.max(1)),
            preview_chars: self.preview_chars.max(1),
        }
    }

    pub fn notification_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.notification_cleanup_interval_secs.max(60))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Presence Relay Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 1984)
# port = 1984

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# ---- Relay ----

# Seconds before an unrefreshed typing indicator is cleared (default: 3)
# typing_timeout_secs = 3

# Characters of message content included in push previews (default: 100)
# preview_chars = 100

# ---- Notification queue (push fallback) ----

# Days to keep queued notifications before purging (default: 30)
# notification_retention_days = 30

# Interval in seconds between cleanup runs (default: 3600 = 1 hour)
# notification_cleanup_interval_secs = 3600
"#
    .to_string()
}

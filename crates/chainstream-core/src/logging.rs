//! Tracing initialisation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How log events are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Which stream events get logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for every target not listed in `crates`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Level per crate. Package names (`chainstream-rpc`) are accepted.
    #[serde(default)]
    pub crates: BTreeMap<String, String>,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            crates: BTreeMap::new(),
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    /// Raise one crate's level, e.g. `.with_crate("chainstream-core", "debug")`.
    pub fn with_crate(mut self, name: impl Into<String>, level: impl Into<String>) -> Self {
        self.crates.insert(name.into(), level.into());
        self
    }

    /// The `EnvFilter` directive string, e.g. `"info,chainstream_core=debug"`.
    pub fn directives(&self) -> String {
        self.crates
            .iter()
            .fold(self.level.clone(), |mut directives, (name, level)| {
                directives.push_str(&format!(",{}={}", name.replace('-', "_"), level));
                directives
            })
    }
}

/// Install the global subscriber. Call once at startup.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init().is_ok(),
        LogFormat::Text => registry.with(fmt::layer()).try_init().is_ok(),
    }
}

//! Observability configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation::LOG_LEVEL_RE;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Default `tracing` level when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    #[validate(regex(path = *LOG_LEVEL_RE))]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

//! # emnet Configuration System
//!
//! Hierarchical configuration for the emnet data plane: packet pool layout,
//! ARP and address conflict detection timing, IP output parameters and the
//! interfaces the stack is brought up with.
//!
//! ## Features
//! - **Layered sources**: defaults, YAML files and `EMNET_*` environment variables
//! - **Validation**: every section is checked with `validator` before use
//! - **Start-up only**: nothing here is consulted on the data path

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

mod arp;
mod error;
mod interface;
mod ip;
mod pools;
mod telemetry;
mod validation;

pub use arp::{AcdConfig, ArpConfig, MAX_PROBES};
pub use error::ConfigError;
pub use interface::InterfaceConfig;
pub use ip::IpConfig;
pub use pools::{PoolClassConfig, PoolsConfig};
pub use telemetry::TelemetryConfig;

const BASE_FILE: &str = "config/emnet.yaml";
const ENV_PREFIX: &str = "EMNET_";

/// Top-level configuration container for the stack.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct EmnetConfig {
    /// Packet pool layout.
    #[serde(default)]
    #[validate(nested)]
    pub pools: PoolsConfig,

    /// ARP table sizing and timers.
    #[serde(default)]
    #[validate(nested)]
    pub arp: ArpConfig,

    /// Address conflict detection.
    #[serde(default)]
    #[validate(nested)]
    pub acd: AcdConfig,

    #[serde(default)]
    #[validate(nested)]
    pub ip: IpConfig,

    /// Interfaces in index order.
    #[serde(default = "default_interfaces")]
    #[validate(length(min = 1, max = 255))]
    #[validate(nested)]
    pub interfaces: Vec<InterfaceConfig>,

    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

fn default_interfaces() -> Vec<InterfaceConfig> {
    vec![InterfaceConfig::default()]
}

impl Default for EmnetConfig {
    fn default() -> Self {
        Self {
            pools: PoolsConfig::default(),
            arp: ArpConfig::default(),
            acd: AcdConfig::default(),
            ip: IpConfig::default(),
            interfaces: default_interfaces(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl EmnetConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/emnet.yaml` - base settings. If missing, defaults are used.
    /// 3. `config/<EMNET_ENV>.yaml` - environment-specific overrides.
    /// 4. `EMNET_*` environment variables, `__` separating nested keys.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(EmnetConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        } else {
            debug!("{BASE_FILE} not found, using default configuration");
        }

        let env = std::env::var("EMNET_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract(figment)
    }

    /// Load configuration from a specific path plus environment overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment =
            Figment::from(Serialized::defaults(EmnetConfig::default())).merge(Yaml::file(path));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["ENV"]).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

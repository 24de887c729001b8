//! ARP table and address conflict detection timing.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Upper bound on configurable ACD probes.
pub const MAX_PROBES: u32 = 10;

/// ARP table configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct ArpConfig {
    /// Number of table rows, fixed at start-up.
    #[serde(default = "default_table_size")]
    #[validate(range(min = 1, max = 64))]
    pub table_size: usize,

    /// Resolved entries older than this are candidates for age-out.
    #[serde(default = "default_age_out")]
    #[validate(range(min = 1000))]
    pub age_out_ms: u64,

    /// Unresolved entries are dropped once this old.
    #[serde(default = "default_pending_timeout")]
    #[validate(range(min = 1))]
    pub pending_timeout_ms: u64,

    /// An aged entry is only freed after this long without use.
    #[serde(default = "default_idle")]
    pub idle_before_age_out_ms: u64,
}

fn default_table_size() -> usize {
    4
}

fn default_age_out() -> u64 {
    600_000 // 10 minutes.
}

fn default_pending_timeout() -> u64 {
    1000
}

fn default_idle() -> u64 {
    1000
}

impl Default for ArpConfig {
    fn default() -> Self {
        Self {
            table_size: default_table_size(),
            age_out_ms: default_age_out(),
            pending_timeout_ms: default_pending_timeout(),
            idle_before_age_out_ms: default_idle(),
        }
    }
}

/// Address conflict detection (RFC 5227 style) parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct AcdConfig {
    /// Probes sent, one per timer tick, before an address is claimed.
    #[serde(default = "default_probe_count")]
    #[validate(range(min = 1, max = MAX_PROBES))]
    pub probe_count: u32,

    /// Window in which a repeated conflict from the same host is not defended.
    #[serde(default = "default_defend_interval")]
    pub defend_interval_ms: u64,
}

fn default_probe_count() -> u32 {
    3
}

fn default_defend_interval() -> u64 {
    10_000
}

impl Default for AcdConfig {
    fn default() -> Self {
        Self {
            probe_count: default_probe_count(),
            defend_interval_ms: default_defend_interval(),
        }
    }
}

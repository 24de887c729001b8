//! Packet pool layout.
//!
//! Size classes are carved once at start-up by the allocator; nothing here
//! can be changed at run time.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::validation;

/// Packet pool configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
#[validate(schema(function = validate_reserve))]
pub struct PoolsConfig {
    /// Headroom left in front of every fresh packet (Ethernet + IPv4 header).
    #[serde(default = "default_header_reserve")]
    #[validate(range(max = 256))]
    pub header_reserve: usize,

    /// Surround every buffer with sentinel words checked on release.
    #[serde(default)]
    pub guard_words: bool,

    /// Size classes in strictly increasing order of buffer size.
    #[serde(default = "default_classes")]
    #[validate(custom(function = validation::validate_pool_classes))]
    #[validate(nested)]
    pub classes: Vec<PoolClassConfig>,
}

/// One size class: `count` buffers of `size` bytes.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, Copy, PartialEq, Eq)]
pub struct PoolClassConfig {
    #[validate(range(min = 16, max = 65536))]
    pub size: usize,
    #[validate(range(min = 1, max = 65535))]
    pub count: usize,
}

fn default_header_reserve() -> usize {
    34
}

fn default_classes() -> Vec<PoolClassConfig> {
    vec![
        PoolClassConfig { size: 128, count: 16 },
        PoolClassConfig { size: 1536, count: 8 },
    ]
}

fn validate_reserve(pools: &PoolsConfig) -> Result<(), ValidationError> {
    match pools.classes.first() {
        Some(smallest) if pools.header_reserve >= smallest.size => {
            Err(ValidationError::new("header_reserve_exceeds_smallest_class"))
        }
        _ => Ok(()),
    }
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            header_reserve: default_header_reserve(),
            guard_words: false,
            classes: default_classes(),
        }
    }
}

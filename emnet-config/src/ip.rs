//! IP output parameters.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct IpConfig {
    /// Time-to-live stamped on every outgoing datagram.
    #[serde(default = "default_ttl")]
    #[validate(range(min = 1))]
    pub ttl: u8,
}

fn default_ttl() -> u8 {
    64
}

impl Default for IpConfig {
    fn default() -> Self {
        Self { ttl: default_ttl() }
    }
}

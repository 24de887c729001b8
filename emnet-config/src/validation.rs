//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across multiple configuration modules.

use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

use crate::pools::PoolClassConfig;

lazy_static! {
    /// Six colon-separated hex octets.
    pub static ref MAC_RE: Regex =
        Regex::new("^[0-9a-fA-F]{2}(:[0-9a-fA-F]{2}){5}$").expect("static regex");
    /// Interface names: short identifiers as the link layer prints them.
    pub static ref IFACE_RE: Regex = Regex::new("^[a-zA-Z][a-zA-Z0-9_]{0,14}$").expect("static regex");
    pub static ref LOG_LEVEL_RE: Regex =
        Regex::new("^(?i)(trace|debug|info|warn|error|off)$").expect("static regex");
}

/// Validate that a MAC address is usable as an interface's own address.
pub fn validate_unicast_mac(mac: &str) -> Result<(), ValidationError> {
    if !MAC_RE.is_match(mac) {
        return Err(ValidationError::new("invalid_mac"));
    }
    // Group bit is the low bit of the first octet.
    let first = u8::from_str_radix(&mac[..2], 16).map_err(|_| ValidationError::new("invalid_mac"))?;
    if first & 0x01 != 0 || mac.bytes().all(|b| b == b'0' || b == b':') {
        return Err(ValidationError::new("mac_not_unicast"));
    }
    Ok(())
}

/// Validate pool size classes: non-empty, strictly increasing sizes.
pub fn validate_pool_classes(classes: &[PoolClassConfig]) -> Result<(), ValidationError> {
    if classes.is_empty() {
        return Err(ValidationError::new("no_pool_classes"));
    }
    if classes.windows(2).any(|pair| pair[1].size <= pair[0].size) {
        return Err(ValidationError::new("pool_sizes_not_increasing"));
    }
    Ok(())
}

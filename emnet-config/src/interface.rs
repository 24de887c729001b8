//! Network interface definitions.
//!
//! Each entry becomes one interface of the stack, in list order; the first
//! one is the default for packets that do not name an interface.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::validation::{self, IFACE_RE};

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
#[validate(schema(function = validate_gateway))]
pub struct InterfaceConfig {
    /// Interface name (`eth0`, `sim1`, ...).
    #[validate(regex(path = *IFACE_RE))]
    pub name: String,

    /// Local address and prefix, e.g. `192.168.1.10/24`.
    pub address: Ipv4Network,

    /// Default gateway, if any. Must be on the local subnet.
    #[serde(default)]
    pub gateway: Option<Ipv4Addr>,

    /// Link address as `aa:bb:cc:dd:ee:ff`.
    #[validate(custom(function = validation::validate_unicast_mac))]
    pub mac: String,

    /// Driver advertises IPv4 header checksum offload.
    #[serde(default)]
    pub checksum_offload: bool,
}

fn validate_gateway(iface: &InterfaceConfig) -> Result<(), ValidationError> {
    match iface.gateway {
        Some(gw) if !iface.address.contains(gw) => {
            Err(ValidationError::new("gateway_off_subnet"))
        }
        _ => Ok(()),
    }
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: "eth0".into(),
            address: Ipv4Network::new(Ipv4Addr::new(192, 168, 1, 10), 24)
                .unwrap_or_else(|_| Ipv4Network::from(Ipv4Addr::new(192, 168, 1, 10))),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            mac: "02:00:00:00:00:01".into(),
            checksum_offload: false,
        }
    }
}

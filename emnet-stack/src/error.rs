use std::net::Ipv4Addr;

use emnet_core::alloc::IfaceId;
use emnet_core::PoolError;
use emnet_protocols::MacParseError;
use thiserror::Error;

/// Failures on the task-context send paths.
///
/// Whenever one of these is returned from a call that took a packet, the
/// packet has already been released.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    #[error("No route to {0}")]
    NoRoute(Ipv4Addr),

    #[error("No packet buffer available")]
    NoBuffer,

    #[error("Address resolution for {0} already has a packet waiting")]
    ResolutionBusy(Ipv4Addr),

    #[error("Unknown interface {0}")]
    UnknownInterface(IfaceId),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Invalid address {0}")]
    InvalidAddress(Ipv4Addr),

    #[error("Datagram of {0} bytes exceeds the IPv4 total length limit")]
    DatagramTooLarge(usize),
}

/// Reported by a [`LinkDriver`](crate::iface::LinkDriver) that could not
/// take a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("Transmit queue full")]
    Busy,

    #[error("Link down")]
    Down,

    #[error("Frame of {len} bytes exceeds MTU {mtu}")]
    FrameTooLarge { len: usize, mtu: usize },
}

/// Bringing a stack up from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Packet pools: {0}")]
    Pool(#[from] PoolError),

    #[error("Interface {name}: {source}")]
    Mac {
        name: String,
        #[source]
        source: MacParseError,
    },

    #[error("{interfaces} interfaces configured but {drivers} link drivers supplied")]
    DriverCount { interfaces: usize, drivers: usize },

    #[error("At most 255 interfaces are supported, got {0}")]
    TooManyInterfaces(usize),
}

//! # emnet-stack
//!
//! Task-context half of the emnet data plane: interfaces, ARP resolution
//! with address conflict detection, and the IPv4 output router, all owned by
//! one [`NetStack`] behind one lock.
//!
//! ### Key Submodules:
//! - `iface`: interface bindings and the `LinkDriver` seam
//! - `link`: in-memory driver for tests and simulation
//! - `arp`: resolution table and ACD
//! - `ip`: route classification and datagram output
//! - `stack`: `NetStack`, the locked network context

pub mod arp;
pub mod error;
pub mod iface;
pub mod ip;
pub mod link;
pub mod stack;

pub use arp::{AcdPhase, AcdPolicy, ArpStatus, DefaultPolicy, EntryState};
pub use error::{LinkError, NetError, SetupError};
pub use iface::{Interface, LinkDriver};
pub use ip::{Delivery, Route};
pub use link::{Frame, SimLink, SimTap};
pub use stack::{allocator_config, NetContext, NetStack};

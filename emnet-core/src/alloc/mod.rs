//! ## emnet-core::alloc
//! **Fixed packet pools with reference-counted handles**
//!
//! ### Expectations (Production):
//! - Every buffer is carved at start-up; pools never grow
//! - `alloc` never blocks and reports exhaustion as `None`
//! - `release` is callable from driver completion context
//!
//! ### Key Submodules:
//! - `packet`: `Packet` handles and the `PacketBuf` they name
//! - `pool`: size classes, free lists and the `PacketAllocator`
//! - `stats`: allocation counters

pub mod packet;
pub mod pool;
pub mod stats;

pub use packet::{IfaceId, Packet, PacketBuf, GUARD_LEN, GUARD_WORD};
pub use pool::{AllocatorConfig, PacketAllocator, PoolClass};
pub use stats::{AllocStats, AllocStatsSnapshot};

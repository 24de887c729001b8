//! # emnet-core
//!
//! Foundation layer of the emnet data plane: the intrusive queue every list in
//! the stack is threaded through, the narrow critical section that guards
//! queues touched from completion context, the size-classed packet allocator
//! and the millisecond clocks that drive the protocol timers.
//!
//! ### Expectations (Production):
//! - Zero heap allocations after start-up on the alloc/release path
//! - Never blocks: exhaustion is reported, not awaited
//! - `release` is safe from any thread
//!
//! ### Key Submodules:
//! - `queue`: intrusive FIFO over an index arena
//! - `sync`: `Critical<T>` section used for queues shared with completion context
//! - `alloc`: packet pools, packet handles and statistics
//! - `time`: `Clock` trait, `VirtualClock` and `MonotonicClock`

pub mod alloc;
pub mod error;
pub mod queue;
pub mod sync;
pub mod time;

pub mod prelude {
    pub use crate::alloc::*;
    pub use crate::error::*;
    pub use crate::queue::*;
    pub use crate::sync::*;
    pub use crate::time::*;
}

pub use error::PoolError;
